//! Pipeline runner: drives contacts through every stage in order.
//!
//! ```text
//! score -> enrich -> rescore -> persona -> route -> gate/send
//! ```
//!
//! Stages run one after another over a chunk of contacts; provider calls
//! inside a stage run concurrently but their results are applied one
//! contact at a time. Per-contact failures are logged and never abort the
//! run. Each stage writes only its own field group, and only when the
//! value changed.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{DeliveryChannel, DeliveryReceipt, OutreachMessage};
use crate::config::RunLimits;
use crate::contacts::model::{
    ChannelKind, Contact, EnrichmentStatus, OutreachFields, PersonaStatus, Phase, RawContact,
    RoutingFields,
};
use crate::contacts::summary::PipelineSummary;
use crate::error::{DatabaseError, Error, PipelineError, ProviderError};
use crate::pipeline::enrichment;
use crate::pipeline::gate::{DeliveryOutcome, OutreachGate};
use crate::pipeline::persona::{self, PersonaValidator};
use crate::pipeline::routing::{CompanyConflict, RoutingEngine};
use crate::pipeline::scoring::ScoringEngine;
use crate::pipeline::types::{
    EnrichmentProvider, EnrichmentRequest, PersonaGenerator, ProviderResponse, RunReport,
    SendRecord,
};
use crate::store::{ContactFilter, Database};

/// Countdown for one kind of external call within a run.
#[derive(Debug, Clone, Copy)]
struct RunBudget {
    remaining: usize,
}

impl RunBudget {
    fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    fn try_take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    fn refund(&mut self) {
        self.remaining += 1;
    }
}

struct RunBudgets {
    provider: RunBudget,
    persona: RunBudget,
    sends: RunBudget,
    /// What is left of this month's email reveals.
    email_reveals: RunBudget,
}

/// Result of importing raw contacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub already_known: usize,
    pub invalid: usize,
}

/// Inbound signal about a contact, reported by a human or a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactSignal {
    Reply,
    OptOut,
    Bounce,
    /// A queued message was accepted or delivered.
    Delivered,
}

pub struct PipelineRunner {
    db: Arc<dyn Database>,
    enrichment: Option<Arc<dyn EnrichmentProvider>>,
    persona: Option<Arc<dyn PersonaGenerator>>,
    channels: HashMap<ChannelKind, Arc<dyn DeliveryChannel>>,
    scoring: ScoringEngine,
    validator: PersonaValidator,
    routing: RoutingEngine,
    gate: OutreachGate,
    limits: RunLimits,
    run_lock: Mutex<()>,
}

impl PipelineRunner {
    pub fn new(
        db: Arc<dyn Database>,
        scoring: ScoringEngine,
        validator: PersonaValidator,
        routing: RoutingEngine,
        gate: OutreachGate,
        limits: RunLimits,
    ) -> Self {
        Self {
            db,
            enrichment: None,
            persona: None,
            channels: HashMap::new(),
            scoring,
            validator,
            routing,
            gate,
            limits,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_enrichment(mut self, provider: Arc<dyn EnrichmentProvider>) -> Self {
        self.enrichment = Some(provider);
        self
    }

    pub fn with_persona_generator(mut self, generator: Arc<dyn PersonaGenerator>) -> Self {
        self.persona = Some(generator);
        self
    }

    /// Register a channel. A later channel of the same kind replaces it.
    pub fn with_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Import raw rows. Rows matching a stored contact by normalised name
    /// and company key are skipped, so re-importing a file is a no-op.
    pub async fn ingest(
        &self,
        rows: Vec<RawContact>,
        default_source: &str,
    ) -> Result<IngestReport, Error> {
        let mut report = IngestReport::default();
        for row in rows {
            if row.name.trim().is_empty() || row.company.trim().is_empty() {
                report.invalid += 1;
                continue;
            }
            let contact = row.into_contact(default_source);
            if self.db.insert_contact(&contact).await? {
                report.inserted += 1;
            } else {
                report.already_known += 1;
            }
        }
        info!(
            inserted = report.inserted,
            already_known = report.already_known,
            invalid = report.invalid,
            "Ingest complete"
        );
        Ok(report)
    }

    /// Counts over every stored contact.
    pub async fn summarize(&self) -> Result<PipelineSummary, Error> {
        let contacts = self.db.list_contacts(&ContactFilter::default()).await?;
        let open_conflicts = self.db.list_conflicts(true).await?.len();
        Ok(PipelineSummary::from_contacts(&contacts, open_conflicts))
    }

    /// Operator reset of round-robin state.
    pub async fn reset_routing_cursors(&self) -> Result<(), Error> {
        let _guard = self.run_lock.lock().await;
        self.db.reset_routing_cursors().await?;
        Ok(())
    }

    /// Apply an inbound signal through the gate. Returns whether anything changed.
    pub async fn record_signal(
        &self,
        id: Uuid,
        signal: ContactSignal,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let _guard = self.run_lock.lock().await;
        let mut contact = self.db.get_contact(id).await?.ok_or(DatabaseError::NotFound {
            entity: "contact".into(),
            id: id.to_string(),
        })?;

        let changed = match signal {
            ContactSignal::Reply => self.gate.record_reply(&mut contact, now),
            ContactSignal::OptOut => self.gate.record_opt_out(&mut contact, now),
            ContactSignal::Bounce => self.gate.record_bounce(&mut contact, now),
            ContactSignal::Delivered => {
                let phase = contact.outreach.outstanding_phase().unwrap_or(Phase::NotStarted);
                self.gate
                    .record_delivery(&mut contact, phase, DeliveryOutcome::Sent, now)?;
                true
            }
        };
        if changed {
            self.db.write_outreach(id, &contact.outreach).await?;
            info!(contact_id = %id, signal = ?signal, "Signal recorded");
        }
        Ok(changed)
    }

    /// One full run over every active contact, in chunks of the batch size.
    /// Call caps apply to the whole run.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<RunReport, Error> {
        let _guard = self.run_lock.lock().await;
        let mut active = self
            .db
            .list_contacts(&ContactFilter {
                active_only: true,
                ..ContactFilter::default()
            })
            .await?;
        let month = now.format("%Y-%m").to_string();
        let reveals_used = self.db.email_reveals_used(&month).await?;
        let mut budgets = RunBudgets {
            provider: RunBudget::new(self.limits.max_provider_calls),
            persona: RunBudget::new(self.limits.max_persona_calls),
            sends: RunBudget::new(self.limits.max_sends),
            email_reveals: RunBudget::new(
                self.limits.monthly_email_reveals.saturating_sub(reveals_used),
            ),
        };
        let mut report = RunReport {
            batch_size: active.len(),
            ..RunReport::default()
        };
        info!(contacts = active.len(), reveals_used, "Pipeline run starting");

        // Highest scores first, so the caps favour the best contacts.
        self.score_stage(&mut active, &mut report).await;
        active.sort_by_key(|c| Reverse(c.icp()));

        for chunk in active.chunks(self.limits.batch_size.max(1)) {
            let mut batch = chunk.to_vec();
            self.enrich_stage(&mut batch, now, &mut budgets, &mut report)
                .await;
            self.score_stage(&mut batch, &mut report).await;
            self.persona_stage(&mut batch, now, &mut budgets.persona, &mut report)
                .await;
            self.route_stage(&mut batch, now, &mut report).await?;
            self.gate_stage(&mut batch, now, &mut budgets.sends, &mut report)
                .await;
        }

        if report.email_reveals > 0
            && let Err(e) = self.db.record_email_reveals(&month, report.email_reveals).await
        {
            error!(month = %month, error = %e, "Failed to record email reveals");
        }

        info!(
            contacts = report.batch_size,
            enriched = report.enriched_found,
            personas = report.personas_generated,
            routed = report.routed,
            conflicts = report.conflicts,
            sends = report.sends.len(),
            deferred = report.enrichment_deferred + report.persona_deferred + report.sends_deferred,
            "Pipeline run complete"
        );
        Ok(report)
    }

    // ── Stages ──────────────────────────────────────────────────────

    async fn score_stage(&self, batch: &mut [Contact], report: &mut RunReport) {
        for contact in batch.iter_mut() {
            let next = self.scoring.score_contact(contact);
            if next == contact.scoring {
                continue;
            }
            match self.db.write_scoring(contact.id, &next).await {
                Ok(()) => {
                    debug!(
                        contact_id = %contact.id,
                        icp = next.icp_score.map(|s| s.value()).unwrap_or(0),
                        "Contact scored"
                    );
                    contact.scoring = next;
                    report.scored += 1;
                }
                Err(e) => error!(contact_id = %contact.id, error = %e, "Failed to write scoring"),
            }
        }
    }

    async fn enrich_stage(
        &self,
        batch: &mut [Contact],
        now: DateTime<Utc>,
        budgets: &mut RunBudgets,
        report: &mut RunReport,
    ) {
        let Some(provider) = self.enrichment.clone() else {
            return;
        };

        let mut picked = Vec::new();
        for (i, contact) in batch.iter().enumerate() {
            if !contact.enrichment.status.needs_lookup() || contact.is_terminal() {
                continue;
            }
            if budgets.provider.try_take() {
                picked.push(i);
            } else {
                report.enrichment_deferred += 1;
            }
        }
        if picked.is_empty() {
            return;
        }

        // Email reveals go to the highest scores first.
        let mut by_score = picked.clone();
        by_score.sort_by_key(|i| Reverse(batch[*i].icp()));
        let mut revealed = HashSet::new();
        let mut withheld = 0;
        for i in by_score {
            if !enrichment::email_allowed(batch[i].scoring.icp_score) {
                continue;
            }
            if budgets.email_reveals.try_take() {
                revealed.insert(i);
            } else {
                withheld += 1;
            }
        }
        report.email_reveals += revealed.len();
        report.email_reveals_withheld += withheld;
        if withheld > 0 {
            warn!(withheld, "Monthly email reveal allowance used up");
        }

        let timeout = self.limits.provider_timeout;
        let jobs = picked.into_iter().map(|i| {
            let request = enrichment::request_for(&batch[i], revealed.contains(&i));
            let provider = provider.clone();
            async move {
                let out = with_timeout(provider.name(), timeout, provider.lookup(&request)).await;
                (i, request, out)
            }
        });
        let mut results: Vec<(usize, EnrichmentRequest, Result<ProviderResponse, ProviderError>)> =
            stream::iter(jobs)
                .buffer_unordered(self.limits.provider_concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(i, _, _)| *i);

        for (i, request, outcome) in results {
            let contact = &mut batch[i];
            let next = enrichment::resolve(contact, &request, &outcome, now);
            match next.status {
                EnrichmentStatus::Found => report.enriched_found += 1,
                EnrichmentStatus::NotFound => report.enriched_not_found += 1,
                EnrichmentStatus::Error => report.enrichment_errors += 1,
                EnrichmentStatus::Pending => {}
            }
            if next == contact.enrichment {
                continue;
            }
            match self.db.write_enrichment(contact.id, &next).await {
                Ok(()) => contact.enrichment = next,
                Err(e) => error!(contact_id = %contact.id, error = %e, "Failed to write enrichment"),
            }
        }
    }

    async fn persona_stage(
        &self,
        batch: &mut [Contact],
        now: DateTime<Utc>,
        budget: &mut RunBudget,
        report: &mut RunReport,
    ) {
        let Some(generator) = self.persona.clone() else {
            return;
        };

        let mut jobs = Vec::new();
        for (i, contact) in batch.iter().enumerate() {
            if !persona::needs_persona(contact) {
                continue;
            }
            if budget.try_take() {
                jobs.push((i, persona::build_request(contact)));
            } else {
                report.persona_deferred += 1;
            }
        }
        if jobs.is_empty() {
            return;
        }

        let timeout = self.limits.provider_timeout;
        let mut results: Vec<(usize, Result<String, ProviderError>)> =
            stream::iter(jobs.into_iter().map(|(i, request)| {
                let generator = generator.clone();
                async move {
                    let out =
                        with_timeout(generator.name(), timeout, generator.generate(&request)).await;
                    (i, out)
                }
            }))
            .buffer_unordered(self.limits.provider_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        for (i, outcome) in results {
            let contact = &mut batch[i];
            let next = match &outcome {
                Ok(raw) => {
                    let government = persona::is_government(
                        contact,
                        self.scoring.is_government(&contact.title, &contact.company),
                    );
                    self.validator.validate(raw, government, now)
                }
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Persona generation failed, will retry");
                    persona::provider_failure(&contact.persona, e)
                }
            };
            match next.status {
                PersonaStatus::Generated => report.personas_generated += 1,
                PersonaStatus::NeedsReview => {
                    warn!(
                        contact_id = %contact.id,
                        notes = next.validation_notes.len(),
                        "Persona flagged LOW for human review"
                    );
                    report.personas_flagged += 1;
                }
                PersonaStatus::Error => report.persona_errors += 1,
                PersonaStatus::Pending => {}
            }
            if next == contact.persona {
                continue;
            }
            match self.db.write_persona(contact.id, &next).await {
                Ok(()) => contact.persona = next,
                Err(e) => error!(contact_id = %contact.id, error = %e, "Failed to write persona"),
            }
        }
    }

    async fn route_stage(
        &self,
        batch: &mut [Contact],
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<(), Error> {
        let existing = self.db.list_contacts(&ContactFilter::default()).await?;
        let cursors = self.db.load_routing_cursors().await?;
        let outcome = self.routing.route_batch(batch, &existing, &cursors, now);

        for (id, fields) in outcome.updates {
            let newly_routed = fields.routed_at.is_some()
                && fields.duplicate_of.is_none()
                && batch
                    .iter()
                    .any(|c| c.id == id && c.routing.routed_at.is_none());
            if let Err(e) = self.db.write_routing(id, &fields).await {
                error!(contact_id = %id, error = %e, "Failed to write routing");
                continue;
            }
            if newly_routed {
                report.routed += 1;
            }
            if let Some(contact) = batch.iter_mut().find(|c| c.id == id) {
                contact.routing = fields;
            }
        }

        if outcome.cursors != cursors {
            self.db.save_routing_cursors(&outcome.cursors).await?;
        }
        report.duplicates += outcome.duplicates;
        report.capacity_overflow += outcome.capacity_overflow;

        for conflict in &outcome.conflicts {
            let state = match self.db.record_conflict(conflict).await {
                Ok(state) => state,
                Err(e) => {
                    error!(company_key = %conflict.company_key, error = %e, "Failed to record conflict");
                    continue;
                }
            };
            if state.is_new() {
                warn!(
                    conflict = %conflict.to_error(),
                    leadership_review = conflict.leadership_review,
                    state = ?state,
                    "Company ownership conflict"
                );
                report.conflicts += 1;
            }
            if conflict.leadership_review && state.is_open() {
                self.flag_for_leadership(conflict, batch, &existing).await;
            }
        }
        Ok(())
    }

    /// Hold every contact of an open conflict until leadership signs off.
    async fn flag_for_leadership(
        &self,
        conflict: &CompanyConflict,
        batch: &mut [Contact],
        existing: &[Contact],
    ) {
        for id in &conflict.contact_ids {
            let current = match batch.iter().find(|c| c.id == *id) {
                Some(c) => &c.routing,
                None => match existing.iter().find(|c| c.id == *id) {
                    Some(c) => &c.routing,
                    None => continue,
                },
            };
            if current.leadership_review_required {
                continue;
            }
            let fields = RoutingFields {
                leadership_review_required: true,
                ..current.clone()
            };
            if let Err(e) = self.db.write_routing(*id, &fields).await {
                error!(contact_id = %id, error = %e, "Failed to flag contact for leadership review");
                continue;
            }
            info!(contact_id = %id, company_key = %conflict.company_key, "Held for leadership review");
            if let Some(contact) = batch.iter_mut().find(|c| c.id == *id) {
                contact.routing = fields;
            }
        }
    }

    async fn gate_stage(
        &self,
        batch: &mut [Contact],
        now: DateTime<Utc>,
        sends: &mut RunBudget,
        report: &mut RunReport,
    ) {
        for contact in batch.iter_mut() {
            let mut stored = contact.outreach.clone();

            let housekeeping = self.gate.prepare(contact, now);
            if housekeeping.expired {
                report.phases_expired += 1;
            }
            if housekeeping.abandoned.is_some() {
                report.phases_abandoned += 1;
            }

            if let Some(phase) = self.gate.due_phase(contact, now) {
                self.try_send(contact, &mut stored, phase, now, sends, report)
                    .await;
            }

            if contact.outreach != stored
                && let Err(e) = self.persist_outreach(contact.id, &contact.outreach).await
            {
                error!(contact_id = %contact.id, error = %e, "Failed to write outreach state");
            }
        }
    }

    /// Start, send and acknowledge one phase. The outstanding stamp is
    /// stored before the channel is called, so a lost write after a send
    /// leaves the phase outstanding instead of due again.
    async fn try_send(
        &self,
        contact: &mut Contact,
        stored: &mut OutreachFields,
        phase: Phase,
        now: DateTime<Utc>,
        sends: &mut RunBudget,
        report: &mut RunReport,
    ) {
        let reasons = self.gate.check(contact, phase, now);
        if !reasons.is_empty() {
            debug!(
                contact_id = %contact.id,
                phase = %phase,
                reasons = %reasons.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("; "),
                "Phase not permitted"
            );
            report.gating_blocked += 1;
            return;
        }

        let Some(channel) = phase.channel().and_then(|k| self.channels.get(&k)).cloned() else {
            debug!(contact_id = %contact.id, phase = %phase, "No channel configured");
            report.sends_deferred += 1;
            return;
        };
        let Some(message) = OutreachMessage::for_contact(contact, phase) else {
            report.gating_blocked += 1;
            return;
        };
        if !sends.try_take() {
            report.sends_deferred += 1;
            return;
        }

        let before_start = contact.outreach.clone();
        if let Err(violation) = self.gate.start_phase(contact, phase, now) {
            warn!(violation = %violation, "Gating violation");
            sends.refund();
            report.gating_blocked += 1;
            return;
        }
        if let Err(e) = self.persist_outreach(contact.id, &contact.outreach).await {
            error!(contact_id = %contact.id, phase = %phase, error = %e, "Could not store phase start, send deferred");
            contact.outreach = before_start;
            sends.refund();
            report.sends_deferred += 1;
            return;
        }
        *stored = contact.outreach.clone();

        let outcome = match with_channel_timeout(self.limits.provider_timeout, channel.send(&message)).await {
            Ok(DeliveryReceipt::Sent) => DeliveryOutcome::Sent,
            Ok(DeliveryReceipt::Queued) => DeliveryOutcome::Queued,
            Err(reason) => {
                warn!(contact_id = %contact.id, phase = %phase, reason = %reason, "Delivery failed");
                DeliveryOutcome::Failed(reason)
            }
        };
        let record = SendRecord {
            contact_id: contact.id,
            phase,
            delivered: outcome == DeliveryOutcome::Sent,
            detail: match &outcome {
                DeliveryOutcome::Sent => None,
                DeliveryOutcome::Queued => Some("queued".into()),
                DeliveryOutcome::Failed(reason) => Some(reason.clone()),
            },
        };

        if let Err(violation) = self.gate.record_delivery(contact, phase, outcome, now) {
            warn!(violation = %violation, "Delivery acknowledgement rejected");
        }
        report.sends.push(record);
    }

    /// Write outreach state, retrying once before giving up.
    async fn persist_outreach(&self, id: Uuid, fields: &OutreachFields) -> Result<(), DatabaseError> {
        match self.db.write_outreach(id, fields).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(contact_id = %id, error = %e, "Outreach write failed, retrying");
                self.db.write_outreach(id, fields).await
            }
        }
    }
}

/// Bound a provider call; a late answer is dropped.
async fn with_timeout<T, F>(provider: &str, timeout: Duration, call: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            provider: provider.to_string(),
            timeout,
        }),
    }
}

async fn with_channel_timeout<F>(timeout: Duration, call: F) -> Result<DeliveryReceipt, String>
where
    F: std::future::Future<Output = Result<DeliveryReceipt, crate::error::ChannelError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("channel timed out after {timeout:?}")),
    }
}

/// Read a JSON array of raw contact rows.
pub async fn load_raw_contacts(path: &Path) -> Result<Vec<RawContact>, PipelineError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::Import {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&text).map_err(|e| PipelineError::Import {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::channels::LoggingChannel;
    use std::collections::BTreeMap;

    use crate::contacts::model::{
        ConfidenceFlag, EnrichmentFields, OutreachStatus, OwnerRole, PersonaFields, ScoringFields,
    };
    use crate::pipeline::gate::PhaseSchedule;
    use crate::pipeline::persona::PersonaPolicy;
    use crate::pipeline::routing::ConflictState;
    use crate::pipeline::types::{EnrichmentRequest, PersonaRequest, ProviderCandidate};
    use crate::store::LibSqlBackend;

    const GOOD_PERSONA: &str = r#"{
        "persona_summary": "Founder scaling a payments platform for small lenders across tier two cities in India",
        "context_hook": "Her panel on embedded credit underwriting drew the largest audience of the first day",
        "personalization_themes": ["embedded credit underwriting", "tier two lending growth"],
        "confidence_flag": "HIGH"
    }"#;

    struct StubProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EnrichmentProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn lookup(
            &self,
            request: &EnrichmentRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::RateLimited {
                    provider: "stub".into(),
                });
            }
            Ok(ProviderResponse::Candidates(vec![ProviderCandidate {
                name: request.name.clone(),
                company: request.company.clone(),
                linkedin_url: Some(format!(
                    "https://linkedin.com/in/{}",
                    request.name.to_lowercase().replace(' ', "-")
                )),
                email: Some("founder@example.com".into()),
                company_size_band: Some("51-200".into()),
                funding_stage: Some("Series A".into()),
                ..ProviderCandidate::default()
            }]))
        }
    }

    struct StubGenerator {
        reply: String,
    }

    #[async_trait]
    impl PersonaGenerator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _request: &PersonaRequest) -> Result<String, ProviderError> {
            Ok(self.reply.clone())
        }
    }

    fn event() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    async fn runner(limits: RunLimits, provider_fails: bool) -> (PipelineRunner, Arc<StubProvider>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        runner_on(db, limits, provider_fails)
    }

    fn runner_on(
        db: Arc<dyn Database>,
        limits: RunLimits,
        provider_fails: bool,
    ) -> (PipelineRunner, Arc<StubProvider>) {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            fail: provider_fails,
        });
        let runner = PipelineRunner::new(
            db,
            ScoringEngine::default(),
            PersonaValidator::new(PersonaPolicy::default()).unwrap(),
            RoutingEngine::default(),
            OutreachGate::new(PhaseSchedule::new(event())),
            limits,
        )
        .with_enrichment(provider.clone())
        .with_persona_generator(Arc::new(StubGenerator {
            reply: GOOD_PERSONA.into(),
        }))
        .with_channel(Arc::new(LoggingChannel::new(ChannelKind::LinkedIn)))
        .with_channel(Arc::new(LoggingChannel::new(ChannelKind::Email)));
        (runner, provider)
    }

    /// Store whose outreach writes fail for a range of call numbers.
    struct FailingOutreachWrites {
        inner: LibSqlBackend,
        calls: AtomicUsize,
        fail_from: usize,
        fail_to: usize,
    }

    impl FailingOutreachWrites {
        async fn new(fail_from: usize, fail_to: usize) -> Self {
            Self {
                inner: LibSqlBackend::new_memory().await.unwrap(),
                calls: AtomicUsize::new(0),
                fail_from,
                fail_to,
            }
        }
    }

    #[async_trait]
    impl Database for FailingOutreachWrites {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            self.inner.init_schema().await
        }

        async fn insert_contact(&self, contact: &Contact) -> Result<bool, DatabaseError> {
            self.inner.insert_contact(contact).await
        }

        async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError> {
            self.inner.get_contact(id).await
        }

        async fn find_by_identity(
            &self,
            normalized_name: &str,
            company_key: &str,
        ) -> Result<Option<Contact>, DatabaseError> {
            self.inner.find_by_identity(normalized_name, company_key).await
        }

        async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<Contact>, DatabaseError> {
            self.inner.list_contacts(filter).await
        }

        async fn count_contacts(&self) -> Result<usize, DatabaseError> {
            self.inner.count_contacts().await
        }

        async fn write_enrichment(
            &self,
            id: Uuid,
            fields: &EnrichmentFields,
        ) -> Result<(), DatabaseError> {
            self.inner.write_enrichment(id, fields).await
        }

        async fn write_scoring(&self, id: Uuid, fields: &ScoringFields) -> Result<(), DatabaseError> {
            self.inner.write_scoring(id, fields).await
        }

        async fn write_persona(&self, id: Uuid, fields: &PersonaFields) -> Result<(), DatabaseError> {
            self.inner.write_persona(id, fields).await
        }

        async fn write_routing(&self, id: Uuid, fields: &RoutingFields) -> Result<(), DatabaseError> {
            self.inner.write_routing(id, fields).await
        }

        async fn write_outreach(&self, id: Uuid, fields: &OutreachFields) -> Result<(), DatabaseError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if (self.fail_from..=self.fail_to).contains(&n) {
                return Err(DatabaseError::Query(format!("write_outreach call {n} refused")));
            }
            self.inner.write_outreach(id, fields).await
        }

        async fn load_routing_cursors(&self) -> Result<BTreeMap<OwnerRole, u64>, DatabaseError> {
            self.inner.load_routing_cursors().await
        }

        async fn save_routing_cursors(
            &self,
            cursors: &BTreeMap<OwnerRole, u64>,
        ) -> Result<(), DatabaseError> {
            self.inner.save_routing_cursors(cursors).await
        }

        async fn reset_routing_cursors(&self) -> Result<(), DatabaseError> {
            self.inner.reset_routing_cursors().await
        }

        async fn record_conflict(
            &self,
            conflict: &CompanyConflict,
        ) -> Result<ConflictState, DatabaseError> {
            self.inner.record_conflict(conflict).await
        }

        async fn list_conflicts(&self, open_only: bool) -> Result<Vec<CompanyConflict>, DatabaseError> {
            self.inner.list_conflicts(open_only).await
        }

        async fn resolve_conflict(&self, company: &str) -> Result<bool, DatabaseError> {
            self.inner.resolve_conflict(company).await
        }

        async fn email_reveals_used(&self, month: &str) -> Result<usize, DatabaseError> {
            self.inner.email_reveals_used(month).await
        }

        async fn record_email_reveals(&self, month: &str, count: usize) -> Result<(), DatabaseError> {
            self.inner.record_email_reveals(month, count).await
        }
    }

    fn raw(name: &str, title: &str, company: &str) -> RawContact {
        RawContact {
            name: name.into(),
            title: title.into(),
            company: company.into(),
            source: None,
        }
    }

    #[tokio::test]
    async fn ingest_is_idempotent() {
        let (runner, _) = runner(RunLimits::default(), false).await;
        let rows = vec![raw("Asha Rao", "CEO", "Acme"), raw("", "CTO", "Acme")];
        let first = runner.ingest(rows.clone(), "techsparks").await.unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(first.invalid, 1);
        let second = runner.ingest(rows, "techsparks").await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_known, 1);
    }

    #[tokio::test]
    async fn full_run_takes_contact_to_first_send() {
        let (runner, _) = runner(RunLimits::default(), false).await;
        runner
            .ingest(vec![raw("Asha Rao", "Founder & CEO", "PayLend Fintech")], "test")
            .await
            .unwrap();

        let now = event() - TimeDelta::days(3);
        let report = runner.run_batch(now).await.unwrap();
        assert_eq!(report.enriched_found, 1);
        assert_eq!(report.personas_generated, 1);
        assert_eq!(report.routed, 1);
        assert_eq!(report.sends.len(), 1);
        assert_eq!(report.sends[0].phase, Phase::PreEvent);

        let stored = runner.db().list_contacts(&ContactFilter::default()).await.unwrap();
        let c = &stored[0];
        assert_eq!(c.icp(), 5);
        assert_eq!(c.persona.confidence_flag, ConfidenceFlag::High);
        assert!(c.routing.has_owner());
        assert_eq!(c.outreach.status, OutreachStatus::Sent);
        assert!(!c.outreach.in_sequence);

        // Same instant again: nothing new happens.
        let again = runner.run_batch(now).await.unwrap();
        assert!(again.sends.is_empty());
        assert_eq!(again.scored, 0);
        assert_eq!(again.routed, 0);
    }

    #[tokio::test]
    async fn provider_errors_are_retried_not_fatal() {
        let (runner, provider) = runner(RunLimits::default(), true).await;
        runner
            .ingest(vec![raw("Asha Rao", "CEO", "Acme")], "test")
            .await
            .unwrap();
        let report = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert_eq!(report.enrichment_errors, 1);
        assert!(report.sends.is_empty());

        runner.run_batch(event() - TimeDelta::days(2)).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn call_caps_defer_remaining_contacts() {
        let limits = RunLimits {
            max_provider_calls: 1,
            ..RunLimits::default()
        };
        let (runner, provider) = runner(limits, false).await;
        runner
            .ingest(
                vec![raw("Asha Rao", "CEO", "Acme"), raw("Vik Shah", "CTO", "Globex")],
                "test",
            )
            .await
            .unwrap();
        let report = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.enrichment_deferred, 1);
    }

    #[tokio::test]
    async fn opt_out_signal_stops_sequence() {
        let (runner, _) = runner(RunLimits::default(), false).await;
        runner
            .ingest(vec![raw("Asha Rao", "CEO", "PayLend Fintech")], "test")
            .await
            .unwrap();
        runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        let id = runner.db().list_contacts(&ContactFilter::default()).await.unwrap()[0].id;

        assert!(runner.record_signal(id, ContactSignal::OptOut, event()).await.unwrap());
        assert!(!runner.record_signal(id, ContactSignal::OptOut, event()).await.unwrap());

        let report = runner.run_batch(event() + TimeDelta::days(3)).await.unwrap();
        assert_eq!(report.batch_size, 0);
        let summary = runner.summarize().await.unwrap();
        assert_eq!(summary.by_outreach_status.get("opted_out"), Some(&1));
    }

    #[tokio::test]
    async fn failed_start_write_defers_the_send() {
        let db = Arc::new(FailingOutreachWrites::new(1, 2).await);
        let (runner, _) = runner_on(db.clone(), RunLimits::default(), false);
        runner
            .ingest(vec![raw("Asha Rao", "Founder & CEO", "PayLend Fintech")], "test")
            .await
            .unwrap();

        let first = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert!(first.sends.is_empty());
        assert_eq!(first.sends_deferred, 1);
        let c = &runner.db().list_contacts(&ContactFilter::default()).await.unwrap()[0];
        assert_eq!(c.outreach.current_phase, Phase::NotStarted);

        let second = runner.run_batch(event() - TimeDelta::days(2)).await.unwrap();
        assert_eq!(second.sends.len(), 1);
        assert_eq!(second.sends[0].phase, Phase::PreEvent);
    }

    #[tokio::test]
    async fn lost_write_after_send_never_sends_twice() {
        // The start stamp lands; both attempts to store the delivery fail.
        let db = Arc::new(FailingOutreachWrites::new(2, 4).await);
        let (runner, _) = runner_on(db.clone(), RunLimits::default(), false);
        runner
            .ingest(vec![raw("Asha Rao", "Founder & CEO", "PayLend Fintech")], "test")
            .await
            .unwrap();

        let first = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert_eq!(first.sends.len(), 1);
        let c = &runner.db().list_contacts(&ContactFilter::default()).await.unwrap()[0];
        assert_eq!(c.outreach.outstanding_phase(), Some(Phase::PreEvent));

        let second = runner.run_batch(event() - TimeDelta::days(2)).await.unwrap();
        assert!(second.sends.is_empty());
        assert_eq!(db.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn monthly_email_reveals_go_to_top_scores() {
        let limits = RunLimits {
            monthly_email_reveals: 1,
            ..RunLimits::default()
        };
        let (runner, provider) = runner(limits, false).await;
        runner
            .ingest(
                vec![
                    raw("Rohan Das", "Sales Manager", "Globex Payments"),
                    raw("Asha Rao", "Founder & CEO", "PayLend Fintech"),
                    raw("Vik Shah", "CTO", "Initech Payments"),
                ],
                "test",
            )
            .await
            .unwrap();

        let report = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.email_reveals, 1);
        assert_eq!(report.email_reveals_withheld, 1);
        assert_eq!(runner.db().email_reveals_used("2026-03").await.unwrap(), 1);

        let with_email: Vec<String> = runner
            .db()
            .list_contacts(&ContactFilter::default())
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.enrichment.email.is_some())
            .map(|c| c.name)
            .collect();
        assert_eq!(with_email, vec!["Asha Rao".to_string()]);

        // Allowance for March is spent; April starts over.
        assert_eq!(runner.db().email_reveals_used("2026-04").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn near_identical_name_is_routed_as_duplicate() {
        let (runner, _) = runner(RunLimits::default(), false).await;
        let report = runner
            .ingest(
                vec![
                    raw("Rohini Srivathsa", "CEO", "Razorpay"),
                    raw("Rohini Srivatsa", "CEO", "Razorpay India Pvt Ltd"),
                ],
                "test",
            )
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);

        let run = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert_eq!(run.duplicates, 1);
        assert_eq!(run.routed, 1);
        assert_eq!(run.sends.len(), 1);

        let stored = runner.db().list_contacts(&ContactFilter::default()).await.unwrap();
        let (dups, keepers): (Vec<&Contact>, Vec<&Contact>) =
            stored.iter().partition(|c| c.routing.duplicate_of.is_some());
        assert_eq!((dups.len(), keepers.len()), (1, 1));
        assert_eq!(dups[0].routing.duplicate_of, Some(keepers[0].id));
        assert_eq!(run.sends[0].contact_id, keepers[0].id);
    }

    #[tokio::test]
    async fn leadership_review_holds_sends_until_resolved() {
        let (runner, _) = runner(RunLimits::default(), false).await;
        runner
            .ingest(
                vec![
                    raw("Asha Rao", "Founder & CEO", "PayLend Fintech"),
                    raw("Rohan Das", "Sales Manager", "PayLend Fintech"),
                ],
                "test",
            )
            .await
            .unwrap();

        let held = runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();
        assert_eq!(held.conflicts, 1);
        assert!(held.sends.is_empty());
        let stored = runner.db().list_contacts(&ContactFilter::default()).await.unwrap();
        assert!(stored.iter().all(|c| c.routing.leadership_review_required));
        let asha = stored.iter().find(|c| c.name == "Asha Rao").unwrap().id;

        // Still held while the conflict stays open.
        let still = runner.run_batch(event() - TimeDelta::hours(60)).await.unwrap();
        assert_eq!(still.conflicts, 0);
        assert!(still.sends.is_empty());

        assert!(runner.db().resolve_conflict("PayLend Fintech").await.unwrap());
        let released = runner.run_batch(event() - TimeDelta::days(2)).await.unwrap();
        assert_eq!(released.conflicts, 0);
        assert!(released.sends.iter().any(|s| s.contact_id == asha));
        let stored = runner.db().list_contacts(&ContactFilter::default()).await.unwrap();
        assert!(stored.iter().all(|c| !c.routing.leadership_review_required));
    }
}
