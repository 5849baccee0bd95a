//! `Database` trait: the single async interface for contact persistence.
//!
//! Field groups are written separately so each pipeline stage only touches
//! the columns it owns.

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::contacts::model::{
    Contact, EnrichmentFields, EnrichmentStatus, OutreachFields, OutreachStatus, OwnerRole,
    PersonaFields, PersonaStatus, Phase, RoutingFields, ScoringFields,
};
use crate::error::DatabaseError;
use crate::pipeline::routing::{CompanyConflict, ConflictState};

/// Filters for [`Database::list_contacts`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    pub enrichment_status: Option<EnrichmentStatus>,
    pub persona_status: Option<PersonaStatus>,
    pub outreach_status: Option<OutreachStatus>,
    pub phase: Option<Phase>,
    pub owner: Option<String>,
    pub company_key: Option<String>,
    /// Skip contacts that are done, opted out or bounced.
    pub active_only: bool,
    pub limit: Option<usize>,
}

impl ContactFilter {
    /// Contacts that can still make progress.
    pub fn active(limit: usize) -> Self {
        Self {
            active_only: true,
            limit: Some(limit),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Insert a contact. Returns `false` when a contact with the same
    /// normalised name and company key already exists.
    async fn insert_contact(&self, contact: &Contact) -> Result<bool, DatabaseError>;

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError>;

    /// Look up by normalised name and company key.
    async fn find_by_identity(
        &self,
        normalized_name: &str,
        company_key: &str,
    ) -> Result<Option<Contact>, DatabaseError>;

    /// Contacts in insertion order.
    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<Contact>, DatabaseError>;

    async fn count_contacts(&self) -> Result<usize, DatabaseError>;

    // ── Field groups ────────────────────────────────────────────────

    async fn write_enrichment(&self, id: Uuid, fields: &EnrichmentFields)
    -> Result<(), DatabaseError>;

    /// Writes the score together with its derived priority band.
    async fn write_scoring(&self, id: Uuid, fields: &ScoringFields) -> Result<(), DatabaseError>;

    async fn write_persona(&self, id: Uuid, fields: &PersonaFields) -> Result<(), DatabaseError>;

    async fn write_routing(&self, id: Uuid, fields: &RoutingFields) -> Result<(), DatabaseError>;

    async fn write_outreach(&self, id: Uuid, fields: &OutreachFields) -> Result<(), DatabaseError>;

    // ── Routing state ───────────────────────────────────────────────

    async fn load_routing_cursors(&self) -> Result<BTreeMap<OwnerRole, u64>, DatabaseError>;

    async fn save_routing_cursors(
        &self,
        cursors: &BTreeMap<OwnerRole, u64>,
    ) -> Result<(), DatabaseError>;

    /// Start every round-robin from the first team member again.
    async fn reset_routing_cursors(&self) -> Result<(), DatabaseError>;

    // ── Conflicts ───────────────────────────────────────────────────

    /// Upsert by company key. A resolved conflict reopens only when its
    /// owner set changes.
    async fn record_conflict(
        &self,
        conflict: &CompanyConflict,
    ) -> Result<ConflictState, DatabaseError>;

    async fn list_conflicts(&self, open_only: bool) -> Result<Vec<CompanyConflict>, DatabaseError>;

    /// Mark a company's conflict as handled by a human and clear the
    /// leadership review flag on its contacts. Returns `false` if unknown.
    async fn resolve_conflict(&self, company: &str) -> Result<bool, DatabaseError>;

    // ── Email reveals ───────────────────────────────────────────────

    /// Email reveals already spent in a `YYYY-MM` month.
    async fn email_reveals_used(&self, month: &str) -> Result<usize, DatabaseError>;

    async fn record_email_reveals(&self, month: &str, count: usize) -> Result<(), DatabaseError>;
}
