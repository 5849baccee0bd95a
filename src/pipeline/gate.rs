//! Outreach gate: the per-contact phase state machine.
//!
//! ```text
//! none -> pre_event -> during_event -> post_event -> follow_up_1 -> follow_up_2 -> done
//!                      (opted_out / bounced reachable from anywhere, absorbing)
//! ```
//!
//! The gate is the only writer of outreach fields. Phases only move
//! forward; a missed window is skipped, never revisited. Every entry point
//! is idempotent: calling it again on an unchanged contact changes nothing.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::contacts::model::{
    ConfidenceFlag, Contact, OutreachStatus, Phase, PhaseOutcome, PhaseStamp,
};
use crate::error::GatingViolation;

/// Minimum ICP score for email phases.
pub const EMAIL_MIN_SCORE: u8 = 3;

/// Phase windows relative to the event date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSchedule {
    pub event_date: DateTime<Utc>,
    /// `(phase, start offset, end offset)`, half-open, in phase order.
    pub windows: Vec<(Phase, TimeDelta, TimeDelta)>,
    /// Offset after which nothing is sent and every contact is done.
    pub hard_stop: TimeDelta,
    /// Minimum spacing between touches on different channels.
    pub min_channel_gap: TimeDelta,
}

impl PhaseSchedule {
    pub fn new(event_date: DateTime<Utc>) -> Self {
        let d = TimeDelta::days;
        Self {
            event_date,
            windows: vec![
                (Phase::PreEvent, d(-7), d(0)),
                (Phase::DuringEvent, d(0), d(2)),
                (Phase::PostEvent, d(2), d(7)),
                (Phase::FollowUp1, d(7), d(14)),
                (Phase::FollowUp2, d(14), d(21)),
            ],
            hard_stop: d(21),
            min_channel_gap: TimeDelta::hours(48),
        }
    }

    pub fn with_hard_stop(mut self, hard_stop: TimeDelta) -> Self {
        self.hard_stop = hard_stop;
        self
    }

    pub fn with_min_channel_gap(mut self, gap: TimeDelta) -> Self {
        self.min_channel_gap = gap;
        self
    }

    pub fn hard_stop_at(&self) -> DateTime<Utc> {
        self.event_date + self.hard_stop
    }

    /// Absolute window for a phase, clipped to the hard stop.
    pub fn window(&self, phase: Phase) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (_, start, end) = self.windows.iter().find(|(p, _, _)| *p == phase)?;
        let start = self.event_date + *start;
        let end = (self.event_date + *end).min(self.hard_stop_at());
        (start < end).then_some((start, end))
    }

    /// The sendable phase whose window contains `now`.
    pub fn phase_at(&self, now: DateTime<Utc>) -> Option<Phase> {
        Phase::SENDABLE.into_iter().find(|phase| {
            self.window(*phase)
                .is_some_and(|(start, end)| start <= now && now < end)
        })
    }
}

/// Why a phase may not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Terminal,
    PastHardStop,
    Duplicate,
    Unrouted,
    /// Split ownership with a top C-suite contact, awaiting leadership.
    LeadershipReview,
    LowConfidence,
    StatusNotStartable(OutreachStatus),
    InSequence,
    MissingLinkedIn,
    MissingEmail,
    ScoreTooLow(u8),
    ReplyRecorded,
    OutsideWindow,
    Regression { current: Phase },
    AlreadyHandled,
    ChannelCooldown { until: DateTime<Utc> },
    NotOutstanding,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal => write!(f, "contact is in a terminal state"),
            Self::PastHardStop => write!(f, "sequence hard stop has passed"),
            Self::Duplicate => write!(f, "contact is a duplicate"),
            Self::Unrouted => write!(f, "contact has no assigned owner"),
            Self::LeadershipReview => write!(f, "company conflict awaits leadership review"),
            Self::LowConfidence => write!(f, "persona confidence is LOW"),
            Self::StatusNotStartable(s) => write!(f, "outreach status {s} cannot start a phase"),
            Self::InSequence => write!(f, "another phase is outstanding"),
            Self::MissingLinkedIn => write!(f, "no LinkedIn URL"),
            Self::MissingEmail => write!(f, "no email address"),
            Self::ScoreTooLow(s) => write!(f, "ICP score {s} is below {EMAIL_MIN_SCORE}"),
            Self::ReplyRecorded => write!(f, "contact has already replied"),
            Self::OutsideWindow => write!(f, "outside the phase window"),
            Self::Regression { current } => write!(f, "contact is already at {current}"),
            Self::AlreadyHandled => write!(f, "phase was already handled"),
            Self::ChannelCooldown { until } => {
                write!(f, "channel switch not allowed before {}", until.to_rfc3339())
            }
            Self::NotOutstanding => write!(f, "phase is not outstanding"),
        }
    }
}

/// Delivery channel acknowledgement fed back into the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Confirmed sent or accepted.
    Sent,
    /// Handed over, awaiting acceptance.
    Queued,
    Failed(String),
}

/// Housekeeping done before a send decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Housekeeping {
    pub expired: bool,
    pub abandoned: Option<Phase>,
    pub completed: bool,
}

/// Result of [`OutreachGate::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Nothing due.
    Idle,
    Started(Phase),
    Blocked(GatingViolation),
}

/// The outreach state machine over a [`PhaseSchedule`].
#[derive(Debug, Clone)]
pub struct OutreachGate {
    schedule: PhaseSchedule,
}

impl OutreachGate {
    pub fn new(schedule: PhaseSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &PhaseSchedule {
        &self.schedule
    }

    /// Expire, abandon or complete phases based on the clock.
    pub fn prepare(&self, contact: &mut Contact, now: DateTime<Utc>) -> Housekeeping {
        let mut done = Housekeeping::default();
        let o = &mut contact.outreach;
        if o.is_terminal() {
            return done;
        }

        if now >= self.schedule.hard_stop_at() {
            if let Some(phase) = o.outstanding_phase() {
                resolve_stamp(o, phase, PhaseOutcome::Abandoned, now);
                done.abandoned = Some(phase);
            }
            settle(o);
            o.record(Phase::Done, now, Some("expired".into()));
            o.current_phase = Phase::Done;
            o.status_note = Some("expired".into());
            done.expired = true;
            info!(contact_id = %contact.id, "Sequence expired at hard stop");
            return done;
        }

        if let Some(phase) = o.outstanding_phase() {
            let closed = self
                .schedule
                .window(phase)
                .is_none_or(|(_, end)| now >= end);
            if closed {
                resolve_stamp(o, phase, PhaseOutcome::Abandoned, now);
                settle(o);
                o.record(phase, now, Some("window closed before confirmation".into()));
                done.abandoned = Some(phase);
                info!(contact_id = %contact.id, phase = %phase, "Outstanding phase abandoned");
            }
        }

        let fu2_sent = o
            .phase_timestamps
            .get(&Phase::FollowUp2)
            .is_some_and(|s| s.outcome == PhaseOutcome::Sent);
        let replied = o.status == OutreachStatus::Replied && !o.in_sequence;
        if fu2_sent || replied {
            let note = if fu2_sent { "completed" } else { "replied" };
            o.record(Phase::Done, now, Some(note.into()));
            o.current_phase = Phase::Done;
            o.status_note = Some(note.into());
            done.completed = true;
        }

        done
    }

    /// The phase due now that has not been handled yet.
    pub fn due_phase(&self, contact: &Contact, now: DateTime<Utc>) -> Option<Phase> {
        if contact.is_terminal() {
            return None;
        }
        let phase = self.schedule.phase_at(now)?;
        if phase < contact.outreach.current_phase {
            return None;
        }
        match contact.outreach.phase_timestamps.get(&phase) {
            Some(stamp) if stamp.outcome != PhaseOutcome::Failed => None,
            _ => Some(phase),
        }
    }

    /// Every unmet precondition for starting `phase` now. Empty means allowed.
    pub fn check(&self, contact: &Contact, phase: Phase, now: DateTime<Utc>) -> Vec<BlockReason> {
        let o = &contact.outreach;
        if o.is_terminal() {
            return vec![BlockReason::Terminal];
        }
        if now >= self.schedule.hard_stop_at() {
            return vec![BlockReason::PastHardStop];
        }

        let mut reasons = Vec::new();
        if contact.routing.duplicate_of.is_some() {
            reasons.push(BlockReason::Duplicate);
        } else if !contact.routing.has_owner() {
            reasons.push(BlockReason::Unrouted);
        }
        if contact.routing.leadership_review_required {
            reasons.push(BlockReason::LeadershipReview);
        }
        if contact.persona.confidence_flag == ConfidenceFlag::Low {
            reasons.push(BlockReason::LowConfidence);
        }
        if !matches!(o.status, OutreachStatus::Pending | OutreachStatus::Sent) {
            reasons.push(BlockReason::StatusNotStartable(o.status));
        }
        if o.in_sequence {
            reasons.push(BlockReason::InSequence);
        }

        match phase {
            Phase::PreEvent | Phase::DuringEvent => {
                if !contact.has_linkedin() {
                    reasons.push(BlockReason::MissingLinkedIn);
                }
            }
            Phase::PostEvent | Phase::FollowUp1 | Phase::FollowUp2 => {
                if !contact.has_email() {
                    reasons.push(BlockReason::MissingEmail);
                }
                if contact.icp() < EMAIL_MIN_SCORE {
                    reasons.push(BlockReason::ScoreTooLow(contact.icp()));
                }
                if phase.is_follow_up() && o.reply_recorded_at.is_some() {
                    reasons.push(BlockReason::ReplyRecorded);
                }
            }
            Phase::NotStarted | Phase::Done => reasons.push(BlockReason::OutsideWindow),
        }

        if !self
            .schedule
            .window(phase)
            .is_some_and(|(start, end)| start <= now && now < end)
        {
            reasons.push(BlockReason::OutsideWindow);
        }

        if phase < o.current_phase {
            reasons.push(BlockReason::Regression {
                current: o.current_phase,
            });
        } else if o
            .phase_timestamps
            .get(&phase)
            .is_some_and(|s| s.outcome != PhaseOutcome::Failed)
        {
            reasons.push(BlockReason::AlreadyHandled);
        }

        if let Some(until) = self.cooldown_until(contact, phase)
            && now < until
        {
            reasons.push(BlockReason::ChannelCooldown { until });
        }

        reasons.dedup();
        reasons
    }

    /// End of the cross-channel gap after the last delivered touch.
    fn cooldown_until(&self, contact: &Contact, phase: Phase) -> Option<DateTime<Utc>> {
        let channel = phase.channel()?;
        let (last_phase, last_at) = contact
            .outreach
            .phase_timestamps
            .iter()
            .filter(|(_, s)| s.outcome == PhaseOutcome::Sent)
            .map(|(p, s)| (*p, s.resolved_at.unwrap_or(s.sent_at)))
            .max_by_key(|(_, at)| *at)?;
        (last_phase.channel() != Some(channel)).then(|| last_at + self.schedule.min_channel_gap)
    }

    /// Start `phase`: marks it outstanding and puts the contact in sequence.
    pub fn start_phase(
        &self,
        contact: &mut Contact,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<(), GatingViolation> {
        let reasons = self.check(contact, phase, now);
        if !reasons.is_empty() {
            debug!(contact_id = %contact.id, phase = %phase, reasons = reasons.len(), "Phase blocked");
            return Err(GatingViolation {
                contact_id: contact.id,
                phase,
                reasons,
            });
        }

        let o = &mut contact.outreach;
        o.phase_timestamps.insert(
            phase,
            PhaseStamp {
                sent_at: now,
                outcome: PhaseOutcome::Outstanding,
                resolved_at: None,
            },
        );
        o.record(phase, now, Some("started".into()));
        o.current_phase = phase;
        o.in_sequence = true;
        o.status = OutreachStatus::InProgress;
        info!(contact_id = %contact.id, phase = %phase, "Phase started");
        Ok(())
    }

    /// Housekeeping, then start whatever phase is due.
    pub fn advance(&self, contact: &mut Contact, now: DateTime<Utc>) -> GateDecision {
        self.prepare(contact, now);
        let Some(phase) = self.due_phase(contact, now) else {
            return GateDecision::Idle;
        };
        match self.start_phase(contact, phase, now) {
            Ok(()) => GateDecision::Started(phase),
            Err(violation) => GateDecision::Blocked(violation),
        }
    }

    /// Apply a channel acknowledgement for the outstanding phase.
    pub fn record_delivery(
        &self,
        contact: &mut Contact,
        phase: Phase,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), GatingViolation> {
        if contact.outreach.outstanding_phase() != Some(phase) {
            return Err(GatingViolation {
                contact_id: contact.id,
                phase,
                reasons: vec![BlockReason::NotOutstanding],
            });
        }

        let o = &mut contact.outreach;
        match outcome {
            DeliveryOutcome::Queued => {}
            DeliveryOutcome::Sent => {
                resolve_stamp(o, phase, PhaseOutcome::Sent, now);
                o.in_sequence = false;
                o.status = OutreachStatus::Sent;
                o.record(phase, now, Some("delivered".into()));
                if phase == Phase::FollowUp2 {
                    o.record(Phase::Done, now, Some("completed".into()));
                    o.current_phase = Phase::Done;
                    o.status_note = Some("completed".into());
                }
            }
            DeliveryOutcome::Failed(reason) => {
                resolve_stamp(o, phase, PhaseOutcome::Failed, now);
                settle(o);
                o.record(phase, now, Some(format!("delivery failed: {reason}")));
            }
        }
        Ok(())
    }

    /// Inbound reply. Stops follow-ups.
    pub fn record_reply(&self, contact: &mut Contact, now: DateTime<Utc>) -> bool {
        let o = &mut contact.outreach;
        if o.status.is_absorbing() || o.reply_recorded_at.is_some() {
            return false;
        }
        if let Some(phase) = o.outstanding_phase() {
            resolve_stamp(o, phase, PhaseOutcome::Sent, now);
        }
        o.in_sequence = false;
        o.reply_recorded_at = Some(now);
        o.status = OutreachStatus::Replied;
        o.record(o.current_phase, now, Some("reply received".into()));
        true
    }

    pub fn record_bounce(&self, contact: &mut Contact, now: DateTime<Utc>) -> bool {
        absorb(contact, OutreachStatus::Bounced, PhaseOutcome::Failed, now)
    }

    pub fn record_opt_out(&self, contact: &mut Contact, now: DateTime<Utc>) -> bool {
        absorb(contact, OutreachStatus::OptedOut, PhaseOutcome::Abandoned, now)
    }
}

fn resolve_stamp(
    o: &mut crate::contacts::model::OutreachFields,
    phase: Phase,
    outcome: PhaseOutcome,
    now: DateTime<Utc>,
) {
    if let Some(stamp) = o.phase_timestamps.get_mut(&phase) {
        stamp.outcome = outcome;
        stamp.resolved_at = Some(now);
    }
}

/// Leave the in-progress state after a phase ends without delivery.
fn settle(o: &mut crate::contacts::model::OutreachFields) {
    o.in_sequence = false;
    if o.status == OutreachStatus::InProgress {
        o.status = if o.any_sent() {
            OutreachStatus::Sent
        } else {
            OutreachStatus::Pending
        };
    }
}

fn absorb(
    contact: &mut Contact,
    status: OutreachStatus,
    outstanding_outcome: PhaseOutcome,
    now: DateTime<Utc>,
) -> bool {
    let o = &mut contact.outreach;
    if o.status.is_absorbing() {
        return false;
    }
    if let Some(phase) = o.outstanding_phase() {
        resolve_stamp(o, phase, outstanding_outcome, now);
    }
    o.in_sequence = false;
    o.status = status;
    o.record(o.current_phase, now, Some(status.as_str().into()));
    info!(contact_id = %contact.id, status = %status, "Contact reached absorbing state");
    true
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::contacts::model::IcpScore;

    fn event() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn gate() -> OutreachGate {
        OutreachGate::new(PhaseSchedule::new(event()))
    }

    fn at(days: i64, hours: i64) -> DateTime<Utc> {
        event() + TimeDelta::days(days) + TimeDelta::hours(hours)
    }

    fn ready_contact() -> Contact {
        let mut c = Contact::new("Asha Rao", "CEO", "Acme", "test");
        c.scoring.icp_score = Some(IcpScore::clamped(5));
        c.persona.confidence_flag = ConfidenceFlag::High;
        c.routing.assigned_owner = Some("Priya Nair".into());
        c.enrichment.linkedin_url = Some("https://linkedin.com/in/asha".into());
        c.enrichment.email = Some("asha@acme.io".into());
        c
    }

    #[test]
    fn windows_and_phase_lookup() {
        let s = PhaseSchedule::new(event());
        assert_eq!(s.phase_at(at(-8, 0)), None);
        assert_eq!(s.phase_at(at(-7, 0)), Some(Phase::PreEvent));
        assert_eq!(s.phase_at(at(0, 0)), Some(Phase::DuringEvent));
        assert_eq!(s.phase_at(at(2, 0)), Some(Phase::PostEvent));
        assert_eq!(s.phase_at(at(20, 23)), Some(Phase::FollowUp2));
        assert_eq!(s.phase_at(at(21, 0)), None);

        let short = PhaseSchedule::new(event()).with_hard_stop(TimeDelta::days(10));
        assert_eq!(short.window(Phase::FollowUp1).map(|w| w.1), Some(at(10, 0)));
        assert_eq!(short.window(Phase::FollowUp2), None);
    }

    #[test]
    fn low_confidence_blocks_everything() {
        let gate = gate();
        let mut c = ready_contact();
        c.persona.confidence_flag = ConfidenceFlag::Low;
        for (phase, now) in [(Phase::PreEvent, at(-3, 0)), (Phase::PostEvent, at(3, 0))] {
            assert!(gate.check(&c, phase, now).contains(&BlockReason::LowConfidence));
        }
        let decision = gate.advance(&mut c, at(-3, 0));
        assert!(matches!(decision, GateDecision::Blocked(_)));
        assert!(!c.outreach.in_sequence);
        assert_eq!(c.outreach.current_phase, Phase::NotStarted);
    }

    #[test]
    fn missing_linkedin_blocks_dm_but_not_email() {
        let gate = gate();
        let mut c = ready_contact();
        c.enrichment.linkedin_url = None;
        c.scoring.icp_score = Some(IcpScore::clamped(4));

        let during = gate.check(&c, Phase::DuringEvent, at(1, 0));
        assert_eq!(during, vec![BlockReason::MissingLinkedIn]);

        assert!(gate.check(&c, Phase::PostEvent, at(3, 0)).is_empty());
        assert_eq!(gate.advance(&mut c, at(3, 0)), GateDecision::Started(Phase::PostEvent));
    }

    #[test]
    fn email_phases_need_score_three() {
        let gate = gate();
        let mut c = ready_contact();
        c.scoring.icp_score = Some(IcpScore::clamped(2));
        let reasons = gate.check(&c, Phase::PostEvent, at(3, 0));
        assert_eq!(reasons, vec![BlockReason::ScoreTooLow(2)]);
    }

    #[test]
    fn unaccepted_dm_is_abandoned_and_post_event_starts() {
        let gate = gate();
        let mut c = ready_contact();
        assert_eq!(gate.advance(&mut c, at(0, 2)), GateDecision::Started(Phase::DuringEvent));
        gate.record_delivery(&mut c, Phase::DuringEvent, DeliveryOutcome::Queued, at(0, 2))
            .unwrap();
        assert!(c.outreach.in_sequence);

        // Still inside the window: nothing happens.
        assert_eq!(gate.advance(&mut c, at(1, 0)), GateDecision::Idle);

        let decision = gate.advance(&mut c, at(2, 1));
        assert_eq!(decision, GateDecision::Started(Phase::PostEvent));
        let dm = &c.outreach.phase_timestamps[&Phase::DuringEvent];
        assert_eq!(dm.outcome, PhaseOutcome::Abandoned);
        assert_eq!(c.outreach.outstanding_phase(), Some(Phase::PostEvent));
    }

    #[test]
    fn delivered_dm_delays_email_by_channel_gap() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(1, 12));
        gate.record_delivery(&mut c, Phase::DuringEvent, DeliveryOutcome::Sent, at(1, 12))
            .unwrap();
        assert_eq!(c.outreach.status, OutreachStatus::Sent);
        assert!(!c.outreach.in_sequence);

        let decision = gate.advance(&mut c, at(2, 6));
        let GateDecision::Blocked(v) = decision else {
            panic!("expected cooldown block, got {decision:?}");
        };
        assert!(matches!(v.reasons[0], BlockReason::ChannelCooldown { .. }));

        assert_eq!(gate.advance(&mut c, at(3, 13)), GateDecision::Started(Phase::PostEvent));
    }

    #[test]
    fn advance_is_idempotent() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(-2, 0));
        let snapshot = c.clone();
        assert_eq!(gate.advance(&mut c, at(-2, 0)), GateDecision::Idle);
        assert_eq!(gate.advance(&mut c, at(-1, 0)), GateDecision::Idle);
        assert_eq!(c, snapshot);
    }

    #[test]
    fn phases_never_regress() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(3, 0));
        gate.record_delivery(&mut c, Phase::PostEvent, DeliveryOutcome::Sent, at(3, 0))
            .unwrap();
        let reasons = gate.check(&c, Phase::DuringEvent, at(1, 0));
        assert!(reasons.contains(&BlockReason::Regression {
            current: Phase::PostEvent
        }));
        assert!(gate.start_phase(&mut c, Phase::PostEvent, at(4, 0)).is_err());
    }

    #[test]
    fn failed_delivery_is_retried_later() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(-3, 0));
        gate.record_delivery(
            &mut c,
            Phase::PreEvent,
            DeliveryOutcome::Failed("timeout".into()),
            at(-3, 0),
        )
        .unwrap();
        assert_eq!(c.outreach.status, OutreachStatus::Pending);
        assert!(!c.outreach.in_sequence);
        assert_eq!(gate.advance(&mut c, at(-2, 0)), GateDecision::Started(Phase::PreEvent));
    }

    #[test]
    fn hard_stop_forces_done() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(15, 0));
        assert!(c.outreach.in_sequence);

        let hk = gate.prepare(&mut c, at(21, 0));
        assert!(hk.expired);
        assert_eq!(c.outreach.current_phase, Phase::Done);
        assert_eq!(c.outreach.status_note.as_deref(), Some("expired"));
        assert!(!c.outreach.in_sequence);

        let snapshot = c.clone();
        assert_eq!(gate.advance(&mut c, at(25, 0)), GateDecision::Idle);
        assert_eq!(c, snapshot);
    }

    #[test]
    fn last_follow_up_completes_sequence() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(15, 0));
        gate.record_delivery(&mut c, Phase::FollowUp2, DeliveryOutcome::Sent, at(15, 1))
            .unwrap();
        assert_eq!(c.outreach.current_phase, Phase::Done);
        assert_eq!(c.outreach.status_note.as_deref(), Some("completed"));
    }

    #[test]
    fn reply_stops_follow_ups() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(3, 0));
        gate.record_delivery(&mut c, Phase::PostEvent, DeliveryOutcome::Sent, at(3, 0))
            .unwrap();
        assert!(gate.record_reply(&mut c, at(4, 0)));
        assert!(!gate.record_reply(&mut c, at(4, 1)));

        let reasons = gate.check(&c, Phase::FollowUp1, at(8, 0));
        assert!(reasons.contains(&BlockReason::ReplyRecorded));
        gate.prepare(&mut c, at(8, 0));
        assert_eq!(c.outreach.current_phase, Phase::Done);
        assert_eq!(c.outreach.status_note.as_deref(), Some("replied"));
    }

    #[test]
    fn opt_out_is_absorbing() {
        let gate = gate();
        let mut c = ready_contact();
        gate.advance(&mut c, at(-3, 0));
        assert!(gate.record_opt_out(&mut c, at(-2, 0)));
        assert!(!c.outreach.in_sequence);
        assert!(!gate.record_bounce(&mut c, at(-2, 0)));
        assert_eq!(c.outreach.status, OutreachStatus::OptedOut);
        assert_eq!(gate.advance(&mut c, at(3, 0)), GateDecision::Idle);
        assert_eq!(gate.check(&c, Phase::PostEvent, at(3, 0)), vec![BlockReason::Terminal]);
    }

    #[test]
    fn unrouted_and_duplicate_contacts_are_blocked() {
        let gate = gate();
        let mut c = ready_contact();
        c.routing.assigned_owner = Some(crate::contacts::model::UNASSIGNED.into());
        assert!(gate.check(&c, Phase::PreEvent, at(-3, 0)).contains(&BlockReason::Unrouted));
        c.routing.duplicate_of = Some(uuid::Uuid::new_v4());
        assert!(gate.check(&c, Phase::PreEvent, at(-3, 0)).contains(&BlockReason::Duplicate));
    }

    #[test]
    fn leadership_review_blocks_until_cleared() {
        let gate = gate();
        let mut c = ready_contact();
        c.routing.leadership_review_required = true;
        assert_eq!(gate.check(&c, Phase::PreEvent, at(-3, 0)), vec![BlockReason::LeadershipReview]);
        assert!(matches!(gate.advance(&mut c, at(-3, 0)), GateDecision::Blocked(_)));
        assert_eq!(c.outreach.current_phase, Phase::NotStarted);

        c.routing.leadership_review_required = false;
        assert_eq!(gate.advance(&mut c, at(-3, 0)), GateDecision::Started(Phase::PreEvent));
    }

    #[test]
    fn delivery_for_wrong_phase_is_rejected() {
        let gate = gate();
        let mut c = ready_contact();
        let err = gate
            .record_delivery(&mut c, Phase::PreEvent, DeliveryOutcome::Sent, at(-3, 0))
            .unwrap_err();
        assert_eq!(err.reasons, vec![BlockReason::NotOutstanding]);
    }
}
