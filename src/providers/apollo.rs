//! Apollo People Match enrichment provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::ProviderError;
use crate::pipeline::types::{
    EnrichmentProvider, EnrichmentRequest, ProviderCandidate, ProviderResponse,
};
use crate::providers::map_status;

pub const DEFAULT_BASE_URL: &str = "https://api.apollo.io/v1";
const PROVIDER: &str = "apollo";

pub struct ApolloProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    timeout: Duration,
}

impl ApolloProvider {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    person: Option<ApolloPerson>,
}

#[derive(Debug, Deserialize)]
struct ApolloPerson {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    linkedin_url: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    personal_emails: Vec<String>,
    #[serde(default)]
    organization: Option<ApolloOrganization>,
}

#[derive(Debug, Deserialize)]
struct ApolloOrganization {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    estimated_num_employees: Option<u64>,
    #[serde(default)]
    latest_funding_stage: Option<String>,
}

impl ApolloPerson {
    fn into_candidate(self, request: &EnrichmentRequest) -> ProviderCandidate {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                [self.first_name.as_deref(), self.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ")
            });
        let org = self.organization;
        let email = if request.reveal_email {
            self.email
                .filter(|e| !e.trim().is_empty())
                .or_else(|| self.personal_emails.into_iter().next())
        } else {
            None
        };

        ProviderCandidate {
            name,
            company: org
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_else(|| request.company.clone()),
            linkedin_url: self.linkedin_url,
            email,
            company_size_band: None,
            employee_count: org.as_ref().and_then(|o| o.estimated_num_employees),
            funding_stage: org.and_then(|o| o.latest_funding_stage),
            match_confidence: None,
        }
    }
}

fn parse_match(
    body: &str,
    request: &EnrichmentRequest,
) -> Result<ProviderResponse, ProviderError> {
    let parsed: MatchResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
    Ok(match parsed.person {
        Some(person) => ProviderResponse::Candidates(vec![person.into_candidate(request)]),
        None => ProviderResponse::NotFound,
    })
}

#[async_trait]
impl EnrichmentProvider for ApolloProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn lookup(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = serde_json::json!({
            "api_key": self.api_key.expose_secret(),
            "name": request.name,
            "organization_name": request.company,
            "reveal_personal_emails": request.reveal_email,
        });

        let resp = self
            .client
            .post(format!("{}/people/match", self.base_url))
            .header("Cache-Control", "no-cache")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: PROVIDER.into(),
                        timeout: self.timeout,
                    }
                } else {
                    ProviderError::RequestFailed {
                        provider: PROVIDER.into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        // Apollo answers 422 when nobody matches.
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            debug!(name = %request.name, "Apollo returned no match");
            return Ok(ProviderResponse::NotFound);
        }
        map_status(PROVIDER, status)?;

        let text = resp.text().await.map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
        parse_match(&text, request)
    }
}
