//! Contact record and the per-stage field groups.
//!
//! Each field group is written by exactly one pipeline stage. The store
//! exposes one partial write per group, so a stage can only persist what
//! it owns.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contacts::normalize;

/// Maximum outreach transitions kept per contact.
const MAX_TRANSITIONS: usize = 200;

// ── Scoring enums ───────────────────────────────────────────────────

/// Seniority tier inferred from the title. Ordered lowest to highest rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeniorityTier {
    #[serde(rename = "Manager/IC")]
    ManagerIc,
    #[serde(rename = "VP/Director")]
    VpDirector,
    #[serde(rename = "C-Suite")]
    CSuite,
}

impl SeniorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManagerIc => "Manager/IC",
            Self::VpDirector => "VP/Director",
            Self::CSuite => "C-Suite",
        }
    }
}

impl fmt::Display for SeniorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeniorityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Manager/IC" => Ok(Self::ManagerIc),
            "VP/Director" => Ok(Self::VpDirector),
            "C-Suite" => Ok(Self::CSuite),
            other => Err(format!("unknown seniority tier: {other}")),
        }
    }
}

/// Industry vertical. Declaration order is the keyword-table tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndustryVertical {
    Fintech,
    #[serde(rename = "D2C/Ecomm")]
    D2cEcomm,
    #[serde(rename = "SaaS/B2B")]
    SaasB2b,
    #[serde(rename = "VC/PE")]
    VcPe,
    #[serde(rename = "DeepTech/AI")]
    DeepTechAi,
    Edtech,
    Mobility,
    Government,
    Other,
}

impl IndustryVertical {
    pub const ALL: [IndustryVertical; 9] = [
        Self::Fintech,
        Self::D2cEcomm,
        Self::SaasB2b,
        Self::VcPe,
        Self::DeepTechAi,
        Self::Edtech,
        Self::Mobility,
        Self::Government,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fintech => "Fintech",
            Self::D2cEcomm => "D2C/Ecomm",
            Self::SaasB2b => "SaaS/B2B",
            Self::VcPe => "VC/PE",
            Self::DeepTechAi => "DeepTech/AI",
            Self::Edtech => "Edtech",
            Self::Mobility => "Mobility",
            Self::Government => "Government",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for IndustryVertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndustryVertical {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown industry vertical: {s}"))
    }
}

/// ICP fit score, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IcpScore(u8);

impl IcpScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Build a score from a raw weighted sum, clamping into range.
    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn band(&self) -> PriorityBand {
        PriorityBand::from_score(self.0)
    }
}

impl fmt::Display for IcpScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable tier derived from the ICP score. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityBand {
    High,
    Medium,
    Low,
    Hold,
}

impl PriorityBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 5 => Self::High,
            4 => Self::Medium,
            3 => Self::Low,
            _ => Self::Hold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Hold => "HOLD",
        }
    }
}

// ── Enrichment ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    #[default]
    Pending,
    Found,
    NotFound,
    Error,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "found" => Self::Found,
            "not_found" => Self::NotFound,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }

    /// Whether the resolver should (re)query the provider.
    pub fn needs_lookup(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnrichmentFields {
    pub linkedin_url: Option<String>,
    pub email: Option<String>,
    pub company_size_band: Option<String>,
    pub funding_stage: Option<String>,
    pub status: EnrichmentStatus,
    /// Code of the last provider error, cleared on success.
    pub last_error: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
}

// ── Scoring ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoringFields {
    pub seniority_tier: Option<SeniorityTier>,
    pub industry_vertical: Option<IndustryVertical>,
    pub icp_score: Option<IcpScore>,
}

// ── Persona ─────────────────────────────────────────────────────────

/// Trust level of generated persona content. Ordered lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ConfidenceFlag {
    #[default]
    #[serde(rename = "LOW", alias = "low", alias = "Low")]
    Low,
    #[serde(rename = "MEDIUM", alias = "medium", alias = "Medium")]
    Medium,
    #[serde(rename = "HIGH", alias = "high", alias = "High")]
    High,
}

impl ConfidenceFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaStatus {
    #[default]
    Pending,
    Generated,
    /// Output failed validation; waits for a human to regenerate it.
    NeedsReview,
    /// Generator call failed; retried next run.
    Error,
}

impl PersonaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generated => "generated",
            Self::NeedsReview => "needs_review",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "generated" => Self::Generated,
            "needs_review" => Self::NeedsReview,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersonaFields {
    pub summary: Option<String>,
    pub context_hook: Option<String>,
    pub themes: Vec<String>,
    pub confidence_flag: ConfidenceFlag,
    pub needs_human_review: bool,
    pub status: PersonaStatus,
    pub validation_notes: Vec<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

// ── Routing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OwnerRole {
    #[serde(rename = "Senior AE")]
    SeniorAe,
    #[serde(rename = "AE")]
    Ae,
    #[serde(rename = "SDR")]
    Sdr,
    Unassigned,
}

impl OwnerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeniorAe => "Senior AE",
            Self::Ae => "AE",
            Self::Sdr => "SDR",
            Self::Unassigned => "Unassigned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Senior AE" => Some(Self::SeniorAe),
            "AE" => Some(Self::Ae),
            "SDR" => Some(Self::Sdr),
            "Unassigned" => Some(Self::Unassigned),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderLevel {
    Leadership,
    #[serde(rename = "AE")]
    Ae,
    #[serde(rename = "SDR")]
    Sdr,
}

impl SenderLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leadership => "Leadership",
            Self::Ae => "AE",
            Self::Sdr => "SDR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Leadership" => Some(Self::Leadership),
            "AE" => Some(Self::Ae),
            "SDR" => Some(Self::Sdr),
            _ => None,
        }
    }
}

/// Outreach message template family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceVariant {
    FounderOperator,
    Investor,
    Policy,
    General,
}

impl SequenceVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FounderOperator => "founder_operator",
            Self::Investor => "investor",
            Self::Policy => "policy",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "founder_operator" => Some(Self::FounderOperator),
            "investor" => Some(Self::Investor),
            "policy" => Some(Self::Policy),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Owner name used when no team member can take the contact.
pub const UNASSIGNED: &str = "Unassigned";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingFields {
    pub owner_role: Option<OwnerRole>,
    pub assigned_owner: Option<String>,
    pub sender_level: Option<SenderLevel>,
    pub sequence_variant: Option<SequenceVariant>,
    pub leadership_review_required: bool,
    /// Every team member of the role was at capacity when this contact
    /// was assigned.
    pub capacity_overflow: bool,
    /// Set when this record duplicates another contact.
    pub duplicate_of: Option<Uuid>,
    pub routed_at: Option<DateTime<Utc>>,
}

impl RoutingFields {
    /// Routed to a real team member.
    pub fn has_owner(&self) -> bool {
        self.assigned_owner
            .as_deref()
            .is_some_and(|o| !o.is_empty() && o != UNASSIGNED)
    }
}

// ── Outreach ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    #[default]
    Pending,
    InProgress,
    Sent,
    Replied,
    Bounced,
    OptedOut,
}

impl OutreachStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Sent => "sent",
            Self::Replied => "replied",
            Self::Bounced => "bounced",
            Self::OptedOut => "opted_out",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "sent" => Self::Sent,
            "replied" => Self::Replied,
            "bounced" => Self::Bounced,
            "opted_out" => Self::OptedOut,
            _ => Self::Pending,
        }
    }

    /// Bounced and opted-out contacts never leave their state.
    pub fn is_absorbing(&self) -> bool {
        matches!(self, Self::Bounced | Self::OptedOut)
    }
}

impl fmt::Display for OutreachStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outreach phase. Declaration order is sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    #[serde(rename = "none")]
    NotStarted,
    #[serde(rename = "pre_event")]
    PreEvent,
    #[serde(rename = "during_event")]
    DuringEvent,
    #[serde(rename = "post_event")]
    PostEvent,
    #[serde(rename = "follow_up_1")]
    FollowUp1,
    #[serde(rename = "follow_up_2")]
    FollowUp2,
    #[serde(rename = "done")]
    Done,
}

impl Phase {
    /// Phases that send a message, in order.
    pub const SENDABLE: [Phase; 5] = [
        Self::PreEvent,
        Self::DuringEvent,
        Self::PostEvent,
        Self::FollowUp1,
        Self::FollowUp2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "none",
            Self::PreEvent => "pre_event",
            Self::DuringEvent => "during_event",
            Self::PostEvent => "post_event",
            Self::FollowUp1 => "follow_up_1",
            Self::FollowUp2 => "follow_up_2",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pre_event" => Self::PreEvent,
            "during_event" => Self::DuringEvent,
            "post_event" => Self::PostEvent,
            "follow_up_1" => Self::FollowUp1,
            "follow_up_2" => Self::FollowUp2,
            "done" => Self::Done,
            _ => Self::NotStarted,
        }
    }

    /// Delivery channel for a sendable phase.
    pub fn channel(&self) -> Option<ChannelKind> {
        match self {
            Self::PreEvent | Self::DuringEvent => Some(ChannelKind::LinkedIn),
            Self::PostEvent | Self::FollowUp1 | Self::FollowUp2 => Some(ChannelKind::Email),
            Self::NotStarted | Self::Done => None,
        }
    }

    pub fn is_follow_up(&self) -> bool {
        matches!(self, Self::FollowUp1 | Self::FollowUp2)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[serde(rename = "linkedin")]
    LinkedIn,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkedIn => "linkedin",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a started phase resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// Handed to the channel, awaiting confirmation.
    Outstanding,
    Sent,
    /// Delivery failed; may be retried while the window is open.
    Failed,
    /// Window closed before confirmation.
    Abandoned,
}

/// Timestamp record for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStamp {
    pub sent_at: DateTime<Utc>,
    pub outcome: PhaseOutcome,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// An outreach transition event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachTransition {
    pub from: Phase,
    pub to: Phase,
    pub status: OutreachStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutreachFields {
    pub status: OutreachStatus,
    /// True while a phase message is outstanding.
    pub in_sequence: bool,
    pub current_phase: Phase,
    pub phase_timestamps: BTreeMap<Phase, PhaseStamp>,
    pub reply_recorded_at: Option<DateTime<Utc>>,
    pub status_note: Option<String>,
    pub history: Vec<OutreachTransition>,
}

impl OutreachFields {
    /// Append a transition, capping history length.
    pub fn record(&mut self, to: Phase, at: DateTime<Utc>, reason: Option<String>) {
        self.history.push(OutreachTransition {
            from: self.current_phase,
            to,
            status: self.status,
            timestamp: at,
            reason,
        });
        if self.history.len() > MAX_TRANSITIONS {
            let drain_count = self.history.len() - MAX_TRANSITIONS;
            self.history.drain(..drain_count);
        }
    }

    /// The phase currently awaiting confirmation, if any.
    pub fn outstanding_phase(&self) -> Option<Phase> {
        self.phase_timestamps
            .iter()
            .find(|(_, stamp)| stamp.outcome == PhaseOutcome::Outstanding)
            .map(|(phase, _)| *phase)
    }

    /// Most recent confirmed delivery time.
    pub fn last_touch(&self) -> Option<DateTime<Utc>> {
        self.phase_timestamps
            .values()
            .filter(|s| s.outcome == PhaseOutcome::Sent)
            .map(|s| s.resolved_at.unwrap_or(s.sent_at))
            .max()
    }

    pub fn any_sent(&self) -> bool {
        self.phase_timestamps
            .values()
            .any(|s| s.outcome == PhaseOutcome::Sent)
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase == Phase::Done || self.status.is_absorbing()
    }
}

// ── Contact ─────────────────────────────────────────────────────────

/// The canonical contact record.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub company: String,
    pub source: String,
    pub normalized_company_key: String,
    pub created_at: DateTime<Utc>,
    pub enrichment: EnrichmentFields,
    pub scoring: ScoringFields,
    pub persona: PersonaFields,
    pub routing: RoutingFields,
    pub outreach: OutreachFields,
}

impl Contact {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let company = company.into();
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
            title: title.into().trim().to_string(),
            normalized_company_key: normalize::company_key(&company),
            company: company.trim().to_string(),
            source: source.into(),
            created_at: Utc::now(),
            enrichment: EnrichmentFields::default(),
            scoring: ScoringFields::default(),
            persona: PersonaFields::default(),
            routing: RoutingFields::default(),
            outreach: OutreachFields::default(),
        }
    }

    /// Derived on every read from the current score.
    pub fn priority_band(&self) -> Option<PriorityBand> {
        self.scoring.icp_score.map(|s| s.band())
    }

    /// ICP score value, 0 when unscored.
    pub fn icp(&self) -> u8 {
        self.scoring.icp_score.map(|s| s.value()).unwrap_or(0)
    }

    /// Normalised name plus company key, used for duplicate detection.
    pub fn identity_key(&self) -> (String, String) {
        (
            normalize::person_name(&self.name),
            self.normalized_company_key.clone(),
        )
    }

    pub fn has_linkedin(&self) -> bool {
        self.enrichment
            .linkedin_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }

    pub fn has_email(&self) -> bool {
        self.enrichment
            .email
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }

    pub fn is_terminal(&self) -> bool {
        self.outreach.is_terminal()
    }
}

/// A raw row from the source collector.
#[derive(Debug, Clone, Deserialize)]
pub struct RawContact {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl RawContact {
    pub fn into_contact(self, default_source: &str) -> Contact {
        let source = self
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_source.to_string());
        Contact::new(self.name, self.title, self.company, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_follows_score() {
        assert_eq!(IcpScore::clamped(9).band(), PriorityBand::High);
        assert_eq!(IcpScore::clamped(4).band(), PriorityBand::Medium);
        assert_eq!(IcpScore::clamped(3).band(), PriorityBand::Low);
        assert_eq!(IcpScore::clamped(2).band(), PriorityBand::Hold);
        assert_eq!(IcpScore::clamped(-4).value(), 1);
    }

    #[test]
    fn new_contact_defaults() {
        let c = Contact::new(" Asha Rao ", "CEO", "AcmeInc Pvt Ltd", "event");
        assert_eq!(c.name, "Asha Rao");
        assert_eq!(c.normalized_company_key, "acmeinc");
        assert_eq!(c.enrichment.status, EnrichmentStatus::Pending);
        assert_eq!(c.persona.confidence_flag, ConfidenceFlag::Low);
        assert_eq!(c.outreach.current_phase, Phase::NotStarted);
        assert!(!c.outreach.in_sequence);
        assert!(c.priority_band().is_none());
    }

    #[test]
    fn phase_order_and_channels() {
        assert!(Phase::PreEvent < Phase::DuringEvent);
        assert!(Phase::FollowUp2 < Phase::Done);
        assert_eq!(Phase::DuringEvent.channel(), Some(ChannelKind::LinkedIn));
        assert_eq!(Phase::FollowUp1.channel(), Some(ChannelKind::Email));
        assert_eq!(Phase::Done.channel(), None);
        assert_eq!(Phase::parse(Phase::FollowUp1.as_str()), Phase::FollowUp1);
    }

    #[test]
    fn history_is_capped() {
        let mut o = OutreachFields::default();
        for _ in 0..250 {
            o.record(Phase::PreEvent, Utc::now(), None);
        }
        assert_eq!(o.history.len(), MAX_TRANSITIONS);
    }

    #[test]
    fn confidence_parses_case_insensitively() {
        let flag: ConfidenceFlag = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(flag, ConfidenceFlag::High);
        assert_eq!(ConfidenceFlag::parse("Medium"), ConfidenceFlag::Medium);
        assert_eq!(ConfidenceFlag::parse("??"), ConfidenceFlag::Low);
    }
}
