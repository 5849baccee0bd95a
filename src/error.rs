//! Error types for the outreach pipeline.

use std::time::Duration;

use uuid::Uuid;

use crate::contacts::model::Phase;
use crate::pipeline::gate::BlockReason;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Gating violation: {0}")]
    Gating(#[from] GatingViolation),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Enrichment or persona provider failures. The contact keeps its prior
/// state apart from a status marker and is retried on the next run.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Provider {provider} returned HTTP {status}")]
    Http { provider: String, status: u16 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl ProviderError {
    /// Short machine-readable code persisted alongside the contact.
    pub fn code(&self) -> String {
        match self {
            Self::RequestFailed { .. } => "request_failed".into(),
            Self::Timeout { .. } => "timeout".into(),
            Self::RateLimited { .. } => "rate_limited".into(),
            Self::Http { status, .. } => format!("http_{status}"),
            Self::InvalidResponse { .. } => "invalid_response".into(),
            Self::AuthFailed { .. } => "auth_failed".into(),
        }
    }
}

/// Persona output problems. Each one found is stored as a validation note.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("persona output is not a valid JSON object: {reason}")]
    Malformed { reason: String },

    #[error("required field {field} is missing")]
    MissingField { field: String },

    #[error("field {field} has {words} words, minimum is {min}")]
    TooShort {
        field: String,
        words: usize,
        min: usize,
    },

    #[error("generic phrase \"{phrase}\" used")]
    DeniedPhrase { phrase: String },

    #[error("government affiliation forces low confidence")]
    GovernmentAffiliation,
}

/// Company-level routing conflict. Recorded for review, never fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConflictError {
    #[error("company {company_key} is split across owners: {}", .owners.join(", "))]
    SplitOwnership {
        company_key: String,
        owners: Vec<String>,
    },
}

/// A phase start was attempted without its preconditions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("contact {contact_id} cannot start {phase}: {}", join_reasons(.reasons))]
pub struct GatingViolation {
    pub contact_id: Uuid,
    pub phase: Phase,
    pub reasons: Vec<BlockReason>,
}

fn join_reasons(reasons: &[BlockReason]) -> String {
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Delivery channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Rate limited on channel {channel}")]
    RateLimited { channel: String },
}

/// Pipeline orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Import from {path} failed: {reason}")]
    Import { path: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
