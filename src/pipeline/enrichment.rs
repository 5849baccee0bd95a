//! Enrichment resolver: turns a provider answer into enrichment fields.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::contacts::model::{Contact, EnrichmentFields, EnrichmentStatus, IcpScore};
use crate::contacts::normalize;
use crate::error::ProviderError;
use crate::pipeline::types::{EnrichmentRequest, ProviderCandidate, ProviderResponse};

/// Minimum ICP score for requesting or keeping an email address.
pub const EMAIL_MIN_SCORE: u8 = 4;

pub fn email_allowed(score: Option<IcpScore>) -> bool {
    score.is_some_and(|s| s.value() >= EMAIL_MIN_SCORE)
}

/// Build the provider request for a contact. `reveal_email` is granted by
/// the caller out of the monthly reveal allowance.
pub fn request_for(contact: &Contact, reveal_email: bool) -> EnrichmentRequest {
    EnrichmentRequest {
        name: contact.name.clone(),
        company: contact.company.clone(),
        reveal_email: reveal_email && email_allowed(contact.scoring.icp_score),
    }
}

/// Pick the candidate matching the contact.
///
/// A candidate matches when its normalised name equals the contact's and
/// its company shares the contact's company root. Among matches a LinkedIn
/// URL wins, then higher provider confidence, then provider order.
pub fn select_candidate<'a>(
    contact: &Contact,
    candidates: &'a [ProviderCandidate],
) -> Option<&'a ProviderCandidate> {
    let name = normalize::person_name(&contact.name);
    let mut best: Option<&ProviderCandidate> = None;

    for candidate in candidates {
        if normalize::person_name(&candidate.name) != name
            || !normalize::same_company(&candidate.company, &contact.company)
        {
            continue;
        }
        best = match best {
            Some(current) if !outranks(candidate, current) => Some(current),
            _ => Some(candidate),
        };
    }
    best
}

fn outranks(a: &ProviderCandidate, b: &ProviderCandidate) -> bool {
    let a_linked = normalize::non_empty(a.linkedin_url.as_deref()).is_some();
    let b_linked = normalize::non_empty(b.linkedin_url.as_deref()).is_some();
    if a_linked != b_linked {
        return a_linked;
    }
    a.match_confidence.unwrap_or(f64::MIN) > b.match_confidence.unwrap_or(f64::MIN)
}

/// Compute the next enrichment fields for a contact.
///
/// Errors keep whatever was resolved before and only flip the status, so a
/// failed retry never erases data or masquerades as not-found. An email is
/// kept only when the request asked for it.
pub fn resolve(
    contact: &Contact,
    request: &EnrichmentRequest,
    outcome: &Result<ProviderResponse, ProviderError>,
    now: DateTime<Utc>,
) -> EnrichmentFields {
    let current = &contact.enrichment;

    let mut next = match outcome {
        Ok(ProviderResponse::Candidates(candidates)) => match select_candidate(contact, candidates) {
            Some(candidate) => found_fields(contact, candidate, request.reveal_email),
            None => {
                debug!(
                    contact_id = %contact.id,
                    candidates = candidates.len(),
                    "No provider candidate matched name and company"
                );
                not_found_fields()
            }
        },
        Ok(ProviderResponse::NotFound) => not_found_fields(),
        Err(e) => {
            warn!(contact_id = %contact.id, error = %e, "Enrichment lookup failed, will retry");
            EnrichmentFields {
                status: EnrichmentStatus::Error,
                last_error: Some(e.code()),
                ..current.clone()
            }
        }
    };

    // Identical data keeps the original resolution time.
    let unchanged = EnrichmentFields {
        enriched_at: current.enriched_at,
        ..next.clone()
    } == *current;
    next.enriched_at = if unchanged || next.status == EnrichmentStatus::Error {
        current.enriched_at
    } else {
        Some(now)
    };
    next
}

fn found_fields(
    contact: &Contact,
    candidate: &ProviderCandidate,
    revealed: bool,
) -> EnrichmentFields {
    let email = if revealed && email_allowed(contact.scoring.icp_score) {
        normalize::non_empty(candidate.email.as_deref())
    } else {
        None
    };
    let company_size_band = candidate
        .company_size_band
        .as_deref()
        .and_then(normalize::size_band)
        .or_else(|| {
            candidate
                .employee_count
                .map(|n| normalize::headcount_band(n).to_string())
        });

    EnrichmentFields {
        linkedin_url: normalize::non_empty(candidate.linkedin_url.as_deref()),
        email,
        company_size_band,
        funding_stage: normalize::non_empty(candidate.funding_stage.as_deref()),
        status: EnrichmentStatus::Found,
        last_error: None,
        enriched_at: None,
    }
}

fn not_found_fields() -> EnrichmentFields {
    EnrichmentFields {
        status: EnrichmentStatus::NotFound,
        ..EnrichmentFields::default()
    }
}
