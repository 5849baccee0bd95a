//! Derived summary view over all contacts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::contacts::model::{ConfidenceFlag, Contact, OutreachStatus};

/// Counts by priority band, channel readiness, owner, confidence and phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub total: usize,
    pub by_priority_band: BTreeMap<String, usize>,
    pub linkedin_ready: usize,
    pub email_ready: usize,
    pub by_owner: BTreeMap<String, usize>,
    pub by_confidence: BTreeMap<String, usize>,
    pub by_phase: BTreeMap<String, usize>,
    pub by_outreach_status: BTreeMap<String, usize>,
    pub needs_human_review: usize,
    pub leadership_review: usize,
    pub capacity_overflow: usize,
    pub duplicates: usize,
    pub open_conflicts: usize,
}

impl PipelineSummary {
    pub fn from_contacts(contacts: &[Contact], open_conflicts: usize) -> Self {
        let mut summary = Self {
            total: contacts.len(),
            open_conflicts,
            ..Self::default()
        };

        for c in contacts {
            let band = c.priority_band().map(|b| b.as_str()).unwrap_or("UNSCORED");
            *summary.by_priority_band.entry(band.to_string()).or_default() += 1;

            let owner = c.routing.assigned_owner.as_deref().unwrap_or("(unrouted)");
            *summary.by_owner.entry(owner.to_string()).or_default() += 1;

            *summary
                .by_confidence
                .entry(c.persona.confidence_flag.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_phase
                .entry(c.outreach.current_phase.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_outreach_status
                .entry(c.outreach.status.as_str().to_string())
                .or_default() += 1;

            if is_ready_base(c) {
                if c.has_linkedin() {
                    summary.linkedin_ready += 1;
                }
                if c.has_email() && c.icp() >= 3 {
                    summary.email_ready += 1;
                }
            }
            if c.persona.needs_human_review {
                summary.needs_human_review += 1;
            }
            if c.routing.leadership_review_required {
                summary.leadership_review += 1;
            }
            if c.routing.capacity_overflow {
                summary.capacity_overflow += 1;
            }
            if c.routing.duplicate_of.is_some() {
                summary.duplicates += 1;
            }
        }

        summary
    }
}

/// Checks shared by both channels, independent of the clock.
fn is_ready_base(c: &Contact) -> bool {
    c.persona.confidence_flag != ConfidenceFlag::Low
        && !c.outreach.in_sequence
        && !c.is_terminal()
        && matches!(c.outreach.status, OutreachStatus::Pending | OutreachStatus::Sent)
        && c.routing.has_owner()
        && c.routing.duplicate_of.is_none()
        && !c.routing.leadership_review_required
}
