//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 text, lists and maps as JSON text.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::contacts::model::{
    ConfidenceFlag, Contact, EnrichmentFields, EnrichmentStatus, IcpScore, OutreachFields,
    OutreachStatus, OwnerRole, PersonaFields, PersonaStatus, Phase, RoutingFields, ScoringFields,
    SenderLevel, SequenceVariant,
};
use crate::contacts::normalize;
use crate::error::DatabaseError;
use crate::pipeline::routing::{CompanyConflict, ConflictState};
use crate::store::migrations;
use crate::store::traits::{ContactFilter, Database};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn execute_update(
        &self,
        op: &str,
        sql: &str,
        values: Vec<libsql::Value>,
        id: Uuid,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "contact".into(),
                id: id.to_string(),
            });
        }
        debug!(contact_id = %id, op, "Contact updated");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_time(t: Option<DateTime<Utc>>) -> libsql::Value {
    opt_text(t.map(|t| t.to_rfc3339()).as_deref())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> T {
    s.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn flag(b: bool) -> i64 {
    b as i64
}

// ── Row mapping ─────────────────────────────────────────────────────

const CONTACT_COLUMNS: &str = "id, name, title, company, source, normalized_company_key, created_at, \
     linkedin_url, email, company_size_band, funding_stage, enrichment_status, enrichment_error, enriched_at, \
     seniority_tier, industry_vertical, icp_score, \
     persona_summary, context_hook, themes, confidence_flag, needs_human_review, persona_status, validation_notes, persona_generated_at, \
     owner_role, assigned_owner, sender_level, sequence_variant, leadership_review_required, duplicate_of, routed_at, \
     outreach_status, in_sequence, current_phase, phase_timestamps, reply_recorded_at, status_note, outreach_history, \
     capacity_overflow";

const CONFLICT_COLUMNS: &str = "company_key, contact_ids, owners, leadership_review, detected_at";

/// Map a libsql Row to a Contact. Column order matches CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<Contact, libsql::Error> {
    let text = |i: i32| row.get::<String>(i).ok();
    let id_str: String = row.get(0)?;

    Ok(Contact {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        name: row.get(1)?,
        title: row.get::<String>(2).unwrap_or_default(),
        company: row.get(3)?,
        source: row.get(4)?,
        normalized_company_key: row.get(5)?,
        created_at: parse_datetime(&row.get::<String>(6)?),
        enrichment: EnrichmentFields {
            linkedin_url: text(7),
            email: text(8),
            company_size_band: text(9),
            funding_stage: text(10),
            status: EnrichmentStatus::parse(&text(11).unwrap_or_default()),
            last_error: text(12),
            enriched_at: parse_optional_datetime(text(13)),
        },
        scoring: ScoringFields {
            seniority_tier: text(14).and_then(|s| s.parse().ok()),
            industry_vertical: text(15).and_then(|s| s.parse().ok()),
            icp_score: row.get::<i64>(16).ok().map(IcpScore::clamped),
        },
        persona: PersonaFields {
            summary: text(17),
            context_hook: text(18),
            themes: from_json(text(19)),
            confidence_flag: ConfidenceFlag::parse(&text(20).unwrap_or_default()),
            needs_human_review: row.get::<i64>(21).unwrap_or(0) != 0,
            status: PersonaStatus::parse(&text(22).unwrap_or_default()),
            validation_notes: from_json(text(23)),
            generated_at: parse_optional_datetime(text(24)),
        },
        routing: RoutingFields {
            owner_role: text(25).as_deref().and_then(OwnerRole::parse),
            assigned_owner: text(26),
            sender_level: text(27).as_deref().and_then(SenderLevel::parse),
            sequence_variant: text(28).as_deref().and_then(SequenceVariant::parse),
            leadership_review_required: row.get::<i64>(29).unwrap_or(0) != 0,
            capacity_overflow: row.get::<i64>(39).unwrap_or(0) != 0,
            duplicate_of: text(30).and_then(|s| Uuid::parse_str(&s).ok()),
            routed_at: parse_optional_datetime(text(31)),
        },
        outreach: OutreachFields {
            status: OutreachStatus::parse(&text(32).unwrap_or_default()),
            in_sequence: row.get::<i64>(33).unwrap_or(0) != 0,
            current_phase: Phase::parse(&text(34).unwrap_or_default()),
            phase_timestamps: from_json(text(35)),
            reply_recorded_at: parse_optional_datetime(text(36)),
            status_note: text(37),
            history: from_json(text(38)),
        },
    })
}

fn row_to_conflict(row: &libsql::Row) -> Result<CompanyConflict, libsql::Error> {
    Ok(CompanyConflict {
        company_key: row.get(0)?,
        contact_ids: from_json(row.get::<String>(1).ok()),
        owners: from_json(row.get::<String>(2).ok()),
        leadership_review: row.get::<i64>(3).unwrap_or(0) != 0,
        detected_at: parse_datetime(&row.get::<String>(4)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn insert_contact(&self, contact: &Contact) -> Result<bool, DatabaseError> {
        let (normalized_name, company_key) = contact.identity_key();
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO contacts (id, name, normalized_name, title, company, normalized_company_key, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    contact.id.to_string(),
                    contact.name.clone(),
                    normalized_name,
                    contact.title.clone(),
                    contact.company.clone(),
                    company_key,
                    contact.source.clone(),
                    contact.created_at.to_rfc3339(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_contact: {e}")))?;

        if inserted == 0 {
            debug!(name = %contact.name, company = %contact.company, "Contact already known");
            return Ok(false);
        }

        // A freshly ingested record may already carry stage fields.
        if contact.enrichment != EnrichmentFields::default() {
            self.write_enrichment(contact.id, &contact.enrichment).await?;
        }
        if contact.scoring != ScoringFields::default() {
            self.write_scoring(contact.id, &contact.scoring).await?;
        }
        if contact.persona != PersonaFields::default() {
            self.write_persona(contact.id, &contact.persona).await?;
        }
        if contact.routing != RoutingFields::default() {
            self.write_routing(contact.id, &contact.routing).await?;
        }
        if contact.outreach != OutreachFields::default() {
            self.write_outreach(contact.id, &contact.outreach).await?;
        }

        debug!(contact_id = %contact.id, "Contact inserted");
        Ok(true)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_contact: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_contact(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_contact row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_contact next: {e}"))),
        }
    }

    async fn find_by_identity(
        &self,
        normalized_name: &str,
        company_key: &str,
    ) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE normalized_name = ?1 AND normalized_company_key = ?2"
                ),
                params![normalized_name, company_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_identity: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_contact(&row)
                    .map_err(|e| DatabaseError::Query(format!("find_by_identity row: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_identity next: {e}"))),
        }
    }

    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<Contact>, DatabaseError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();
        let mut bind = |clause: &str, value: String| {
            values.push(libsql::Value::Text(value));
            clauses.push(format!("{clause} = ?{}", values.len()));
        };

        if let Some(s) = filter.enrichment_status {
            bind("enrichment_status", s.as_str().into());
        }
        if let Some(s) = filter.persona_status {
            bind("persona_status", s.as_str().into());
        }
        if let Some(s) = filter.outreach_status {
            bind("outreach_status", s.as_str().into());
        }
        if let Some(p) = filter.phase {
            bind("current_phase", p.as_str().into());
        }
        if let Some(owner) = &filter.owner {
            bind("assigned_owner", owner.clone());
        }
        if let Some(key) = &filter.company_key {
            bind("normalized_company_key", key.clone());
        }
        if filter.active_only {
            clauses.push(
                "current_phase != 'done' AND outreach_status NOT IN ('opted_out', 'bounced')".into(),
            );
        }

        let mut sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut rows = self
            .conn()
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contacts: {e}")))?;

        let mut contacts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            contacts.push(
                row_to_contact(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_contacts row: {e}")))?,
            );
        }
        Ok(contacts)
    }

    async fn count_contacts(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM contacts", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_contacts: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as usize),
            _ => Ok(0),
        }
    }

    // ── Field groups ────────────────────────────────────────────────

    async fn write_enrichment(
        &self,
        id: Uuid,
        fields: &EnrichmentFields,
    ) -> Result<(), DatabaseError> {
        self.execute_update(
            "write_enrichment",
            "UPDATE contacts SET linkedin_url = ?2, email = ?3, company_size_band = ?4, funding_stage = ?5,
                 enrichment_status = ?6, enrichment_error = ?7, enriched_at = ?8, updated_at = ?9
             WHERE id = ?1",
            vec![
                id.to_string().into(),
                opt_text(fields.linkedin_url.as_deref()),
                opt_text(fields.email.as_deref()),
                opt_text(fields.company_size_band.as_deref()),
                opt_text(fields.funding_stage.as_deref()),
                fields.status.as_str().into(),
                opt_text(fields.last_error.as_deref()),
                opt_time(fields.enriched_at),
                Utc::now().to_rfc3339().into(),
            ],
            id,
        )
        .await
    }

    async fn write_scoring(&self, id: Uuid, fields: &ScoringFields) -> Result<(), DatabaseError> {
        let score = match fields.icp_score {
            Some(s) => libsql::Value::Integer(s.value() as i64),
            None => libsql::Value::Null,
        };
        self.execute_update(
            "write_scoring",
            "UPDATE contacts SET seniority_tier = ?2, industry_vertical = ?3, icp_score = ?4,
                 priority_band = ?5, updated_at = ?6
             WHERE id = ?1",
            vec![
                id.to_string().into(),
                opt_text(fields.seniority_tier.map(|t| t.as_str())),
                opt_text(fields.industry_vertical.map(|v| v.as_str())),
                score,
                opt_text(fields.icp_score.map(|s| s.band().as_str())),
                Utc::now().to_rfc3339().into(),
            ],
            id,
        )
        .await
    }

    async fn write_persona(&self, id: Uuid, fields: &PersonaFields) -> Result<(), DatabaseError> {
        self.execute_update(
            "write_persona",
            "UPDATE contacts SET persona_summary = ?2, context_hook = ?3, themes = ?4, confidence_flag = ?5,
                 needs_human_review = ?6, persona_status = ?7, validation_notes = ?8,
                 persona_generated_at = ?9, updated_at = ?10
             WHERE id = ?1",
            vec![
                id.to_string().into(),
                opt_text(fields.summary.as_deref()),
                opt_text(fields.context_hook.as_deref()),
                to_json(&fields.themes)?.into(),
                fields.confidence_flag.as_str().into(),
                flag(fields.needs_human_review).into(),
                fields.status.as_str().into(),
                to_json(&fields.validation_notes)?.into(),
                opt_time(fields.generated_at),
                Utc::now().to_rfc3339().into(),
            ],
            id,
        )
        .await
    }

    async fn write_routing(&self, id: Uuid, fields: &RoutingFields) -> Result<(), DatabaseError> {
        self.execute_update(
            "write_routing",
            "UPDATE contacts SET owner_role = ?2, assigned_owner = ?3, sender_level = ?4, sequence_variant = ?5,
                 leadership_review_required = ?6, duplicate_of = ?7, routed_at = ?8, updated_at = ?9,
                 capacity_overflow = ?10
             WHERE id = ?1",
            vec![
                id.to_string().into(),
                opt_text(fields.owner_role.map(|r| r.as_str())),
                opt_text(fields.assigned_owner.as_deref()),
                opt_text(fields.sender_level.map(|s| s.as_str())),
                opt_text(fields.sequence_variant.map(|v| v.as_str())),
                flag(fields.leadership_review_required).into(),
                opt_text(fields.duplicate_of.map(|d| d.to_string()).as_deref()),
                opt_time(fields.routed_at),
                Utc::now().to_rfc3339().into(),
                flag(fields.capacity_overflow).into(),
            ],
            id,
        )
        .await
    }

    async fn write_outreach(&self, id: Uuid, fields: &OutreachFields) -> Result<(), DatabaseError> {
        self.execute_update(
            "write_outreach",
            "UPDATE contacts SET outreach_status = ?2, in_sequence = ?3, current_phase = ?4, phase_timestamps = ?5,
                 reply_recorded_at = ?6, status_note = ?7, outreach_history = ?8, updated_at = ?9
             WHERE id = ?1",
            vec![
                id.to_string().into(),
                fields.status.as_str().into(),
                flag(fields.in_sequence).into(),
                fields.current_phase.as_str().into(),
                to_json(&fields.phase_timestamps)?.into(),
                opt_time(fields.reply_recorded_at),
                opt_text(fields.status_note.as_deref()),
                to_json(&fields.history)?.into(),
                Utc::now().to_rfc3339().into(),
            ],
            id,
        )
        .await
    }

    // ── Routing state ───────────────────────────────────────────────

    async fn load_routing_cursors(&self) -> Result<BTreeMap<OwnerRole, u64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT owner_role, position FROM routing_cursors", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_routing_cursors: {e}")))?;

        let mut cursors = BTreeMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let role: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_routing_cursors row: {e}")))?;
            if let Some(role) = OwnerRole::parse(&role) {
                cursors.insert(role, row.get::<i64>(1).unwrap_or(0).max(0) as u64);
            }
        }
        Ok(cursors)
    }

    async fn save_routing_cursors(
        &self,
        cursors: &BTreeMap<OwnerRole, u64>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        for (role, position) in cursors {
            self.conn()
                .execute(
                    "INSERT INTO routing_cursors (owner_role, position, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(owner_role) DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at",
                    params![role.as_str(), *position as i64, now.clone()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("save_routing_cursors: {e}")))?;
        }
        debug!(roles = cursors.len(), "Routing cursors saved");
        Ok(())
    }

    async fn reset_routing_cursors(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM routing_cursors", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("reset_routing_cursors: {e}")))?;
        info!("Routing cursors reset");
        Ok(())
    }

    // ── Conflicts ───────────────────────────────────────────────────

    async fn record_conflict(
        &self,
        conflict: &CompanyConflict,
    ) -> Result<ConflictState, DatabaseError> {
        let owners = to_json(&conflict.owners)?;

        let mut rows = self
            .conn()
            .query(
                "SELECT owners, resolved FROM company_conflicts WHERE company_key = ?1",
                params![conflict.company_key.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_conflict: {e}")))?;
        let previous = match rows.next().await {
            Ok(Some(row)) => Some((
                row.get::<String>(0).unwrap_or_default(),
                row.get::<i64>(1).unwrap_or(0) != 0,
            )),
            _ => None,
        };

        let state = match previous {
            None => ConflictState::New,
            Some((before, true)) if before == owners => ConflictState::Resolved,
            Some((_, true)) => ConflictState::Reopened,
            Some((_, false)) => ConflictState::Open,
        };

        self.conn()
            .execute(
                "INSERT INTO company_conflicts (company_key, contact_ids, owners, leadership_review, resolved, detected_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)
                 ON CONFLICT(company_key) DO UPDATE SET
                     contact_ids = excluded.contact_ids,
                     owners = excluded.owners,
                     leadership_review = excluded.leadership_review,
                     resolved = ?6",
                params![
                    conflict.company_key.clone(),
                    to_json(&conflict.contact_ids)?,
                    owners,
                    flag(conflict.leadership_review),
                    conflict.detected_at.to_rfc3339(),
                    flag(state == ConflictState::Resolved),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_conflict: {e}")))?;
        debug!(company_key = %conflict.company_key, state = ?state, "Conflict recorded");
        Ok(state)
    }

    async fn list_conflicts(&self, open_only: bool) -> Result<Vec<CompanyConflict>, DatabaseError> {
        let sql = if open_only {
            format!("SELECT {CONFLICT_COLUMNS} FROM company_conflicts WHERE resolved = 0 ORDER BY detected_at ASC")
        } else {
            format!("SELECT {CONFLICT_COLUMNS} FROM company_conflicts ORDER BY detected_at ASC")
        };
        let mut rows = self
            .conn()
            .query(&sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conflicts: {e}")))?;

        let mut conflicts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            conflicts.push(
                row_to_conflict(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_conflicts row: {e}")))?,
            );
        }
        Ok(conflicts)
    }

    async fn resolve_conflict(&self, company: &str) -> Result<bool, DatabaseError> {
        let company_key = normalize::company_key(company);
        let changed = self
            .conn()
            .execute(
                "UPDATE company_conflicts SET resolved = 1 WHERE company_key = ?1",
                params![company_key.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("resolve_conflict: {e}")))?;
        if changed == 0 {
            return Ok(false);
        }

        let cleared = self
            .conn()
            .execute(
                "UPDATE contacts SET leadership_review_required = 0, updated_at = ?2
                 WHERE normalized_company_key = ?1 AND leadership_review_required = 1",
                params![company_key.clone(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("resolve_conflict: {e}")))?;
        info!(company_key = %company_key, cleared, "Conflict resolved");
        Ok(true)
    }

    // ── Email reveals ───────────────────────────────────────────────

    async fn email_reveals_used(&self, month: &str) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT used FROM email_reveals WHERE month = ?1",
                params![month],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("email_reveals_used: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as usize),
            _ => Ok(0),
        }
    }

    async fn record_email_reveals(&self, month: &str, count: usize) -> Result<(), DatabaseError> {
        if count == 0 {
            return Ok(());
        }
        self.conn()
            .execute(
                "INSERT INTO email_reveals (month, used, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(month) DO UPDATE SET used = used + excluded.used, updated_at = excluded.updated_at",
                params![month, count as i64, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_email_reveals: {e}")))?;
        debug!(month, count, "Email reveals recorded");
        Ok(())
    }
}
