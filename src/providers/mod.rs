//! HTTP implementations of the enrichment and persona provider traits.

pub mod apollo;
pub mod openrouter;

use reqwest::StatusCode;

use crate::error::ProviderError;

pub use apollo::ApolloProvider;
pub use openrouter::OpenRouterGenerator;

/// Map a non-success HTTP status to a provider error.
pub(crate) fn map_status(provider: &str, status: StatusCode) -> Result<(), ProviderError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::AuthFailed {
            provider: provider.into(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited {
            provider: provider.into(),
        }),
        s => Err(ProviderError::Http {
            provider: provider.into(),
            status: s.as_u16(),
        }),
    }
}
