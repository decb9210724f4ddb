//! Upstream provider API client
//!
//! Client-credential exchange for an account token, then REST calls for the
//! subject list and per-subject scores and archetypes. Responses are fed
//! through the same normalizer as webhook deliveries, so a backfill merges
//! exactly like the equivalent webhook events would.
//!
//! Credentials come from `PULSE_PROVIDER_*` environment variables, falling
//! back to the `[provider]` TOML table.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::aggregate::SubjectPatch;
use crate::config::ProviderSection;
use crate::events::{EventKind, NormalizeError, WebhookEvent};

pub const PROVIDER_URL_ENV: &str = "PULSE_PROVIDER_URL";
pub const CLIENT_ID_ENV: &str = "PULSE_PROVIDER_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "PULSE_PROVIDER_CLIENT_SECRET";

pub const DEFAULT_PROVIDER_URL: &str = "https://sandbox-api.sahha.ai";

/// Tokens are refreshed this long before the provider says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error bodies are cut to this many characters in error messages
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Provider API error types
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider response missing `{0}`")]
    MissingField(&'static str),

    #[error("provider payload rejected: {0}")]
    Payload(#[from] NormalizeError),
}

/// Resolved connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl ProviderConfig {
    /// Environment first, then TOML; `None` unless both credentials are present
    pub fn resolve(section: &ProviderSection) -> Option<Self> {
        let env = |name: &str| non_blank(std::env::var(name).ok());

        let client_id = env(CLIENT_ID_ENV).or_else(|| non_blank(section.client_id.clone()))?;
        let client_secret =
            env(CLIENT_SECRET_ENV).or_else(|| non_blank(section.client_secret.clone()))?;
        let base_url = env(PROVIDER_URL_ENV)
            .or_else(|| non_blank(section.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());

        Some(Self {
            base_url,
            client_id,
            client_secret,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    account_token: Option<String>,
    /// Seconds
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    refresh_after: Instant,
}

/// Provider REST client with a cached account token
#[derive(Debug)]
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
    token: Mutex<Option<CachedToken>>,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", self.config.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Current account token, exchanging credentials when the cache is stale
    pub async fn account_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_after {
                return Ok(token.token.clone());
            }
        }

        let url = self.url(&["api", "v1", "oauth", "account", "token"])?;
        debug!("Requesting provider account token from {}", url);

        let response = self
            .http
            .post(url)
            .json(&TokenRequest {
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
            })
            .send()
            .await?;
        let response: TokenResponse = Self::check_status(response).await?.json().await?;

        let token = response
            .account_token
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::MissingField("accountToken"))?;
        let lifetime = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_after: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        info!("Obtained provider account token (valid {}s)", lifetime.as_secs());
        Ok(token)
    }

    async fn get_json(&self, segments: &[&str]) -> Result<Value, ProviderError> {
        let token = self.account_token().await?;
        let url = self.url(segments)?;
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("account {}", token))
            .send()
            .await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    /// External ids of all subjects on the account
    pub async fn list_subjects(&self) -> Result<Vec<String>, ProviderError> {
        let body = self
            .get_json(&["api", "v1", "account", "profile", "search"])
            .await?;

        let items = match &body {
            Value::Array(items) => items,
            other => other
                .get("items")
                .and_then(Value::as_array)
                .ok_or(ProviderError::MissingField("items"))?,
        };

        Ok(items
            .iter()
            .filter_map(|item| item.get("externalId").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    pub async fn fetch_scores(&self, external_id: &str) -> Result<Value, ProviderError> {
        self.get_json(&["api", "v1", "profile", "score", external_id])
            .await
    }

    pub async fn fetch_archetypes(&self, external_id: &str) -> Result<Value, ProviderError> {
        self.get_json(&["api", "v1", "profile", "archetypes", external_id])
            .await
    }

    /// Latest scores and archetypes for one subject, as a mergeable patch
    pub async fn fetch_subject_patch(&self, external_id: &str) -> Result<SubjectPatch, ProviderError> {
        let scores = self.fetch_scores(external_id).await?;
        let archetypes = self.fetch_archetypes(external_id).await?;

        let mut patch = WebhookEvent::decode(EventKind::Score, None, &scores)?.into_patch();
        patch.combine(WebhookEvent::decode(EventKind::Archetype, None, &archetypes)?.into_patch());
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> ProviderClient {
        ProviderClient::new(ProviderConfig {
            base_url: base_url.to_string(),
            client_id: "id".into(),
            client_secret: "secret".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_and_encodes_segments() {
        let c = client("https://api.example.com/");
        let url = c.url(&["api", "v1", "profile", "score", "user 1/x"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/v1/profile/score/user%201%2Fx"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let c = client("http://127.0.0.1:9000/proxy");
        let url = c.url(&["api", "v1"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/proxy/api/v1");
    }

    #[test]
    fn test_invalid_base_url() {
        let c = client("not a url");
        assert!(matches!(c.url(&["x"]), Err(ProviderError::InvalidUrl(_))));
    }

    #[test]
    fn test_resolve_requires_credentials() {
        // Only meaningful when the env vars are unset, which is the test default
        if std::env::var(CLIENT_ID_ENV).is_ok() || std::env::var(CLIENT_SECRET_ENV).is_ok() {
            return;
        }
        assert_eq!(ProviderConfig::resolve(&ProviderSection::default()), None);

        let section = ProviderSection {
            base_url: None,
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
        };
        let config = ProviderConfig::resolve(&section).unwrap();
        assert_eq!(config.client_id, "id");
        if std::env::var(PROVIDER_URL_ENV).is_err() {
            assert_eq!(config.base_url, DEFAULT_PROVIDER_URL);
        }
    }
}
