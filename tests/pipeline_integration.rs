//! End-to-end runs of the pipeline against an in-memory database with
//! stub providers and channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::time::timeout;

use outreach_gate::channels::{DeliveryChannel, DeliveryReceipt, LoggingChannel, OutreachMessage};
use outreach_gate::config::RunLimits;
use outreach_gate::contacts::model::{
    ChannelKind, ConfidenceFlag, Contact, OutreachStatus, OwnerRole, Phase, PhaseOutcome,
    RawContact,
};
use outreach_gate::error::{ChannelError, ProviderError};
use outreach_gate::pipeline::gate::PhaseSchedule;
use outreach_gate::pipeline::persona::{PersonaPolicy, PersonaValidator};
use outreach_gate::pipeline::routing::RoutingEngine;
use outreach_gate::pipeline::scoring::ScoringEngine;
use outreach_gate::pipeline::types::{
    EnrichmentProvider, EnrichmentRequest, PersonaGenerator, PersonaRequest, ProviderCandidate,
    ProviderResponse,
};
use outreach_gate::pipeline::{ContactSignal, OutreachGate, PipelineRunner};
use outreach_gate::store::{ContactFilter, Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const GOOD_PERSONA: &str = r#"{
    "persona_summary": "Operator building lending and payments products for small merchants across several Indian states",
    "context_hook": "Their keynote on merchant credit drew the longest question queue of the opening morning",
    "personalization_themes": ["merchant credit products", "small business lending growth"],
    "confidence_flag": "HIGH"
}"#;

const WEAK_PERSONA: &str = r#"{
    "persona_summary": "Runs payments.",
    "personalization_themes": ["payments at scale for merchants"]
}"#;

/// Enrichment stub that echoes the requested identity.
struct EchoProvider {
    linkedin: bool,
    firmographics: bool,
    calls: AtomicUsize,
}

impl EchoProvider {
    fn new(linkedin: bool, firmographics: bool) -> Self {
        Self {
            linkedin,
            firmographics,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn lookup(&self, request: &EnrichmentRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slug = request.name.to_lowercase().replace(' ', "-");
        Ok(ProviderResponse::Candidates(vec![ProviderCandidate {
            name: request.name.clone(),
            company: request.company.clone(),
            linkedin_url: self
                .linkedin
                .then(|| format!("https://linkedin.com/in/{slug}")),
            email: Some(format!("{slug}@example.com")),
            company_size_band: self.firmographics.then(|| "51-200".to_string()),
            funding_stage: self.firmographics.then(|| "Series A".to_string()),
            ..ProviderCandidate::default()
        }]))
    }
}

struct FixedGenerator(&'static str);

#[async_trait]
impl PersonaGenerator for FixedGenerator {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _request: &PersonaRequest) -> Result<String, ProviderError> {
        Ok(self.0.to_string())
    }
}

/// LinkedIn channel whose connection requests are never accepted.
struct PendingInviteChannel;

#[async_trait]
impl DeliveryChannel for PendingInviteChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::LinkedIn
    }

    async fn send(&self, _message: &OutreachMessage) -> Result<DeliveryReceipt, ChannelError> {
        Ok(DeliveryReceipt::Queued)
    }
}

fn event() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

fn raw(name: &str, title: &str, company: &str) -> RawContact {
    RawContact {
        name: name.into(),
        title: title.into(),
        company: company.into(),
        source: Some("summit-2026".into()),
    }
}

struct Harness {
    runner: PipelineRunner,
    provider: Arc<EchoProvider>,
}

impl Harness {
    async fn new(
        provider: EchoProvider,
        persona: &'static str,
        linkedin: Arc<dyn DeliveryChannel>,
    ) -> Self {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let provider = Arc::new(provider);
        let runner = PipelineRunner::new(
            db,
            ScoringEngine::default(),
            PersonaValidator::new(PersonaPolicy::default()).unwrap(),
            RoutingEngine::default(),
            OutreachGate::new(PhaseSchedule::new(event())),
            RunLimits::default(),
        )
        .with_enrichment(provider.clone())
        .with_persona_generator(Arc::new(FixedGenerator(persona)))
        .with_channel(linkedin)
        .with_channel(Arc::new(LoggingChannel::new(ChannelKind::Email)));
        Self { runner, provider }
    }

    async fn standard() -> Self {
        Self::new(
            EchoProvider::new(true, true),
            GOOD_PERSONA,
            Arc::new(LoggingChannel::new(ChannelKind::LinkedIn)),
        )
        .await
    }

    async fn contacts(&self) -> Vec<Contact> {
        self.runner
            .db()
            .list_contacts(&ContactFilter::default())
            .await
            .unwrap()
    }

    async fn only(&self) -> Contact {
        let mut all = self.contacts().await;
        assert_eq!(all.len(), 1);
        all.remove(0)
    }
}

#[tokio::test]
async fn split_company_ownership_is_recorded_not_resolved() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::standard().await;
        h.runner
            .ingest(
                vec![
                    raw("Neha Gupta", "VP Sales", "Acme Inc"),
                    raw("Rohan Das", "Sales Manager", "ACME, Inc."),
                ],
                "import",
            )
            .await
            .unwrap();

        let report = h.runner.run_batch(event() - TimeDelta::days(5)).await.unwrap();
        assert_eq!(report.routed, 2);
        assert_eq!(report.conflicts, 1);

        let conflicts = h.runner.db().list_conflicts(true).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].company_key, "acme");
        assert_eq!(conflicts[0].owners.len(), 2);
        assert!(!conflicts[0].leadership_review);

        // Both keep their own owner.
        let contacts = h.contacts().await;
        let roles: Vec<_> = contacts.iter().filter_map(|c| c.routing.owner_role).collect();
        assert!(roles.contains(&OwnerRole::Ae));
        assert!(roles.contains(&OwnerRole::Sdr));

        // Seen again while open: still recorded, not counted as new.
        let again = h.runner.run_batch(event() - TimeDelta::hours(108)).await.unwrap();
        assert_eq!(again.conflicts, 0);
        assert_eq!(h.runner.db().list_conflicts(true).await.unwrap().len(), 1);

        // Once resolved, re-detection with the same owners leaves it closed.
        assert!(h.runner.db().resolve_conflict("Acme Inc").await.unwrap());
        let after = h.runner.run_batch(event() - TimeDelta::days(4)).await.unwrap();
        assert_eq!(after.conflicts, 0);
        assert!(h.runner.db().list_conflicts(true).await.unwrap().is_empty());
        assert_eq!(h.runner.summarize().await.unwrap().open_conflicts, 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_linkedin_skips_to_email_after_the_event() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(
            EchoProvider::new(false, false),
            GOOD_PERSONA,
            Arc::new(LoggingChannel::new(ChannelKind::LinkedIn)),
        )
        .await;
        h.runner
            .ingest(vec![raw("Kavya Reddy", "VP Engineering", "Zoho")], "import")
            .await
            .unwrap();

        let during = h.runner.run_batch(event() + TimeDelta::days(1)).await.unwrap();
        assert!(during.sends.is_empty());
        assert_eq!(during.gating_blocked, 1);

        let c = h.only().await;
        assert_eq!(c.icp(), 4);
        assert!(!c.has_linkedin());
        assert!(c.has_email());
        assert_eq!(c.outreach.current_phase, Phase::NotStarted);

        let post = h.runner.run_batch(event() + TimeDelta::days(3)).await.unwrap();
        assert_eq!(post.sends.len(), 1);
        assert_eq!(post.sends[0].phase, Phase::PostEvent);
        assert!(post.sends[0].delivered);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unaccepted_invite_is_abandoned_for_post_event_email() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(
            EchoProvider::new(true, true),
            GOOD_PERSONA,
            Arc::new(PendingInviteChannel),
        )
        .await;
        h.runner
            .ingest(vec![raw("Asha Rao", "Founder & CEO", "PayLend Fintech")], "import")
            .await
            .unwrap();

        let during = h.runner.run_batch(event() + TimeDelta::hours(12)).await.unwrap();
        assert_eq!(during.sends.len(), 1);
        assert!(!during.sends[0].delivered);
        let c = h.only().await;
        assert_eq!(c.outreach.current_phase, Phase::DuringEvent);
        assert!(c.outreach.in_sequence);

        let post = h.runner.run_batch(event() + TimeDelta::days(3)).await.unwrap();
        assert_eq!(post.phases_abandoned, 1);
        assert_eq!(post.sends.len(), 1);
        assert_eq!(post.sends[0].phase, Phase::PostEvent);

        let c = h.only().await;
        assert_eq!(c.outreach.current_phase, Phase::PostEvent);
        assert_eq!(c.outreach.status, OutreachStatus::Sent);
        assert_eq!(
            c.outreach.phase_timestamps[&Phase::DuringEvent].outcome,
            PhaseOutcome::Abandoned
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn low_confidence_persona_is_never_sent() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new(
            EchoProvider::new(true, true),
            WEAK_PERSONA,
            Arc::new(LoggingChannel::new(ChannelKind::LinkedIn)),
        )
        .await;
        h.runner
            .ingest(vec![raw("Asha Rao", "Founder & CEO", "PayLend Fintech")], "import")
            .await
            .unwrap();

        for day in [-5, 1, 3, 9] {
            let report = h.runner.run_batch(event() + TimeDelta::days(day)).await.unwrap();
            assert!(report.sends.is_empty(), "sent on day {day}");
        }

        let c = h.only().await;
        assert_eq!(c.persona.confidence_flag, ConfidenceFlag::Low);
        assert!(c.persona.needs_human_review);
        assert!(c.outreach.phase_timestamps.is_empty());

        let summary = h.runner.summarize().await.unwrap();
        assert_eq!(summary.needs_human_review, 1);
        assert_eq!(summary.by_confidence.get("LOW"), Some(&1));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn full_sequence_then_hard_stop() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::standard().await;
        h.runner
            .ingest(
                vec![
                    raw("Asha Rao", "Founder & CEO", "PayLend Fintech"),
                    raw("Vik Shah", "CTO", "Globex Payments"),
                ],
                "import",
            )
            .await
            .unwrap();

        // Hours from the event; email starts well past the channel gap.
        let schedule = [
            (-72, Phase::PreEvent),
            (12, Phase::DuringEvent),
            (84, Phase::PostEvent),
            (192, Phase::FollowUp1),
        ];
        for (hours, phase) in schedule {
            let report = h.runner.run_batch(event() + TimeDelta::hours(hours)).await.unwrap();
            assert_eq!(report.sends.len(), 2, "{hours}h");
            assert!(report.sends.iter().all(|s| s.phase == phase && s.delivered));
        }

        // Vik replies before the second follow-up.
        let vik = h
            .contacts()
            .await
            .into_iter()
            .find(|c| c.name == "Vik Shah")
            .unwrap();
        assert!(
            h.runner
                .record_signal(vik.id, ContactSignal::Reply, event() + TimeDelta::days(10))
                .await
                .unwrap()
        );

        let fu2 = h.runner.run_batch(event() + TimeDelta::days(15)).await.unwrap();
        assert_eq!(fu2.sends.len(), 1);
        assert_eq!(fu2.sends[0].phase, Phase::FollowUp2);

        // Everyone is finished; nothing is left to expire.
        let after = h.runner.run_batch(event() + TimeDelta::days(22)).await.unwrap();
        assert_eq!(after.batch_size, 0);

        let summary = h.runner.summarize().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_phase.get("done"), Some(&2));
        assert_eq!(summary.by_outreach_status.get("replied"), Some(&1));
        assert_eq!(summary.by_outreach_status.get("sent"), Some(&1));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn hard_stop_expires_unfinished_contacts() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::standard().await;
        h.runner
            .ingest(vec![raw("Asha Rao", "Founder & CEO", "PayLend Fintech")], "import")
            .await
            .unwrap();
        h.runner.run_batch(event() - TimeDelta::days(3)).await.unwrap();

        let report = h.runner.run_batch(event() + TimeDelta::days(21)).await.unwrap();
        assert_eq!(report.phases_expired, 1);
        assert!(report.sends.is_empty());

        let c = h.only().await;
        assert_eq!(c.outreach.current_phase, Phase::Done);
        assert_eq!(c.outreach.status_note.as_deref(), Some("expired"));

        let again = h.runner.run_batch(event() + TimeDelta::days(22)).await.unwrap();
        assert_eq!(again.batch_size, 0);
    })
    .await
    .expect("test timed out");
}
