//! Persona validator.
//!
//! Generator output is parsed strictly. Anything that is not a JSON object
//! of the expected shape is a parse failure and the contact drops to LOW
//! confidence for human review. Parsed output is checked against the
//! guardrails below; each violation lowers the confidence ceiling.
//!
//! | violations | confidence |
//! |------------|------------|
//! | 0          | HIGH       |
//! | 1          | MEDIUM     |
//! | 2+         | LOW        |
//!
//! Government affiliation forces LOW regardless of the count.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::contacts::model::{
    ConfidenceFlag, Contact, IndustryVertical, PersonaFields, PersonaStatus, Phase, PriorityBand,
};
use crate::contacts::normalize;
use crate::error::{ConfigError, ProviderError, ValidationError};
use crate::pipeline::scoring::keyword_regex;
use crate::pipeline::types::PersonaRequest;

/// Generic phrases that mark a persona as boilerplate.
pub const DEFAULT_DENY_PHRASES: &[&str] = &[
    "as a leader",
    "in the tech space",
    "passionate about",
    "driving innovation",
    "thought leader",
    "seasoned professional",
    "dynamic",
    "visionary",
    "at the forefront",
    "leveraging technology",
    "game changer",
    "cutting edge",
    "best in class",
    "world class",
];

const SYSTEM_PROMPT: &str = "You write short B2B outreach research notes. Reply with one JSON object \
and nothing else, using exactly these keys: \"persona_summary\" (string), \"context_hook\" \
(string), \"personalization_themes\" (array of strings, most relevant first) and \
\"confidence_flag\" (\"HIGH\", \"MEDIUM\" or \"LOW\"). Use only the facts provided. \
If the facts are too thin, say so and set confidence_flag to LOW.";

/// Guardrail thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaPolicy {
    pub deny_phrases: Vec<String>,
    /// Minimum words for the summary and the context hook.
    pub min_words: usize,
    /// Minimum words for the first personalisation theme.
    pub min_theme_words: usize,
}

impl Default for PersonaPolicy {
    fn default() -> Self {
        Self {
            deny_phrases: DEFAULT_DENY_PHRASES.iter().map(|s| s.to_string()).collect(),
            min_words: 10,
            min_theme_words: 3,
        }
    }
}

/// Expected generator output. Missing keys are violations, wrong types
/// are parse failures.
#[derive(Debug, Deserialize)]
struct RawPersona {
    #[serde(default)]
    persona_summary: Option<String>,
    #[serde(default)]
    context_hook: Option<String>,
    #[serde(default)]
    personalization_themes: Option<Vec<String>>,
    #[serde(default, alias = "confidence")]
    confidence_flag: Option<ConfidenceFlag>,
}

/// Unwrap a single markdown code fence, if the whole reply is one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json` on the opening line.
    match body.split_once('\n') {
        Some((info, inner)) if !info.trim_start().starts_with('{') => inner.trim(),
        _ => body.trim(),
    }
}

fn parse(raw: &str) -> Result<RawPersona, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| ValidationError::Malformed {
            reason: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(ValidationError::Malformed {
            reason: "top-level value is not an object".into(),
        });
    }
    serde_json::from_value(value).map_err(|e| ValidationError::Malformed {
        reason: e.to_string(),
    })
}

/// Validates generator output and assigns the confidence flag.
#[derive(Debug, Clone)]
pub struct PersonaValidator {
    policy: PersonaPolicy,
    deny: Vec<(String, Regex)>,
}

impl PersonaValidator {
    pub fn new(policy: PersonaPolicy) -> Result<Self, ConfigError> {
        let mut deny = Vec::new();
        for phrase in &policy.deny_phrases {
            if let Some(re) = keyword_regex(std::slice::from_ref(phrase))? {
                deny.push((phrase.clone(), re));
            }
        }
        Ok(Self { policy, deny })
    }

    pub fn policy(&self) -> &PersonaPolicy {
        &self.policy
    }

    /// Validate a raw reply. `government` applies the policy floor.
    pub fn validate(&self, raw: &str, government: bool, now: DateTime<Utc>) -> PersonaFields {
        let parsed = match parse(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Persona output failed to parse");
                let mut notes = vec![e.to_string()];
                if government {
                    notes.push(ValidationError::GovernmentAffiliation.to_string());
                }
                return PersonaFields {
                    confidence_flag: ConfidenceFlag::Low,
                    needs_human_review: true,
                    status: PersonaStatus::NeedsReview,
                    validation_notes: notes,
                    generated_at: Some(now),
                    ..PersonaFields::default()
                };
            }
        };

        let summary = normalize::non_empty(parsed.persona_summary.as_deref());
        let hook = normalize::non_empty(parsed.context_hook.as_deref());
        let themes: Vec<String> = parsed
            .personalization_themes
            .unwrap_or_default()
            .iter()
            .filter_map(|t| normalize::non_empty(Some(t.as_str())))
            .collect();

        let mut violations = Vec::new();

        let all_text = [summary.as_deref(), hook.as_deref()]
            .into_iter()
            .flatten()
            .chain(themes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some((phrase, _)) = self.deny.iter().find(|(_, re)| re.is_match(&all_text)) {
            violations.push(ValidationError::DeniedPhrase {
                phrase: phrase.clone(),
            });
        }

        self.check_field("persona_summary", summary.as_deref(), self.policy.min_words, &mut violations);
        self.check_field("context_hook", hook.as_deref(), self.policy.min_words, &mut violations);
        self.check_field(
            "personalization_themes[0]",
            themes.first().map(String::as_str),
            self.policy.min_theme_words,
            &mut violations,
        );

        let mut confidence = match violations.len() {
            0 => ConfidenceFlag::High,
            1 => ConfidenceFlag::Medium,
            _ => ConfidenceFlag::Low,
        };
        if let Some(reported) = parsed.confidence_flag {
            confidence = confidence.min(reported);
        }
        if government {
            confidence = ConfidenceFlag::Low;
            violations.push(ValidationError::GovernmentAffiliation);
        }

        debug!(
            violations = violations.len(),
            confidence = confidence.as_str(),
            "Persona validated"
        );

        let low = confidence == ConfidenceFlag::Low;
        PersonaFields {
            summary,
            context_hook: hook,
            themes,
            confidence_flag: confidence,
            needs_human_review: low,
            status: if low {
                PersonaStatus::NeedsReview
            } else {
                PersonaStatus::Generated
            },
            validation_notes: violations.iter().map(|v| v.to_string()).collect(),
            generated_at: Some(now),
        }
    }

    fn check_field(
        &self,
        field: &str,
        value: Option<&str>,
        min: usize,
        violations: &mut Vec<ValidationError>,
    ) {
        match value {
            None => violations.push(ValidationError::MissingField {
                field: field.to_string(),
            }),
            Some(text) => {
                let words = normalize::word_count(text);
                if words < min {
                    violations.push(ValidationError::TooShort {
                        field: field.to_string(),
                        words,
                        min,
                    });
                }
            }
        }
    }
}

/// Persona fields after a failed or timed-out generator call.
pub fn provider_failure(current: &PersonaFields, error: &ProviderError) -> PersonaFields {
    PersonaFields {
        confidence_flag: ConfidenceFlag::Low,
        status: PersonaStatus::Error,
        validation_notes: vec![error.to_string()],
        ..current.clone()
    }
}

/// Whether the persona stage should call the generator for this contact.
///
/// Contacts already in a sequence are never revalidated, HOLD-band contacts
/// are not worth a call, and validation failures wait for a human.
pub fn needs_persona(contact: &Contact) -> bool {
    let scored = contact
        .priority_band()
        .is_some_and(|band| band != PriorityBand::Hold);
    scored
        && matches!(contact.persona.status, PersonaStatus::Pending | PersonaStatus::Error)
        && contact.outreach.current_phase == Phase::NotStarted
        && !contact.outreach.in_sequence
        && !contact.is_terminal()
}

/// Government affiliation from the scored vertical or keyword match.
pub fn is_government(contact: &Contact, keyword_match: bool) -> bool {
    keyword_match || contact.scoring.industry_vertical == Some(IndustryVertical::Government)
}

/// Build the generator request from the contact's known facts.
pub fn build_request(contact: &Contact) -> PersonaRequest {
    let mut lines = vec![
        format!("Name: {}", contact.name),
        format!("Title: {}", contact.title),
        format!("Company: {}", contact.company),
    ];
    if let Some(tier) = contact.scoring.seniority_tier {
        lines.push(format!("Seniority: {tier}"));
    }
    if let Some(vertical) = contact.scoring.industry_vertical {
        lines.push(format!("Industry: {vertical}"));
    }
    if let Some(band) = &contact.enrichment.company_size_band {
        lines.push(format!("Company size: {band} employees"));
    }
    if let Some(stage) = &contact.enrichment.funding_stage {
        lines.push(format!("Funding stage: {stage}"));
    }
    PersonaRequest {
        contact_id: contact.id,
        contact_summary: lines.join("\n"),
        system_prompt: SYSTEM_PROMPT.to_string(),
    }
}
