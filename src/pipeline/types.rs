//! Shared types and collaborator traits for the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contacts::model::Phase;
use crate::error::ProviderError;

// ── Enrichment provider ─────────────────────────────────────────────

/// Lookup request sent to the enrichment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub name: String,
    pub company: String,
    /// Ask the provider to reveal an email address.
    pub reveal_email: bool,
}

/// One person record returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCandidate {
    pub name: String,
    pub company: String,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company_size_band: Option<String>,
    #[serde(default)]
    pub employee_count: Option<u64>,
    #[serde(default)]
    pub funding_stage: Option<String>,
    /// Provider-reported match strength, higher is better.
    #[serde(default)]
    pub match_confidence: Option<f64>,
}

/// Successful provider answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Candidates(Vec<ProviderCandidate>),
    NotFound,
}

/// External contact enrichment service.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn lookup(&self, request: &EnrichmentRequest)
    -> Result<ProviderResponse, ProviderError>;
}

// ── Persona generator ───────────────────────────────────────────────

/// Request sent to the persona generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaRequest {
    pub contact_id: Uuid,
    /// Plain-text facts about the contact.
    pub contact_summary: String,
    pub system_prompt: String,
}

/// LLM-backed persona generator. Returns the raw model text.
#[async_trait]
pub trait PersonaGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &PersonaRequest) -> Result<String, ProviderError>;
}

// ── Run report ──────────────────────────────────────────────────────

/// Outcome of a single gated send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendRecord {
    pub contact_id: Uuid,
    pub phase: Phase,
    pub delivered: bool,
    pub detail: Option<String>,
}

/// Per-stage counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub batch_size: usize,
    pub scored: usize,
    pub enriched_found: usize,
    pub enriched_not_found: usize,
    pub enrichment_errors: usize,
    pub enrichment_deferred: usize,
    /// Lookups that asked for an email address this run.
    pub email_reveals: usize,
    /// Lookups that qualified for an email but found the monthly allowance spent.
    pub email_reveals_withheld: usize,
    pub personas_generated: usize,
    pub personas_flagged: usize,
    pub persona_errors: usize,
    pub persona_deferred: usize,
    pub routed: usize,
    pub duplicates: usize,
    /// Assignments past every team member's capacity.
    pub capacity_overflow: usize,
    /// Conflicts first seen, or reopened, this run.
    pub conflicts: usize,
    pub phases_expired: usize,
    pub phases_abandoned: usize,
    pub sends: Vec<SendRecord>,
    pub sends_deferred: usize,
    pub gating_blocked: usize,
}
