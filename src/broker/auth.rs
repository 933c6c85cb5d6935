//! Authentication sub-component: caches the broker access token and
//! refreshes it with a one-hour safety margin before the 24h TTL
//! expires. Never logs or exposes the token value itself.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::errors::AuthError;

const TOKEN_TTL_SECONDS: i64 = 24 * 3600;
const SAFETY_MARGIN_SECONDS: i64 = 3600;

/// Generates a fresh access token from an api key/secret pair. The only
/// seam that talks to the broker SDK for authentication, so tests can
/// substitute a fake without touching the network.
#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, api_key: &str, api_secret: &str) -> Result<String, AuthError>;
}

/// Posts credentials to the broker's own token endpoint and reads back
/// `access_token`. The production `TokenIssuer`; tests substitute a
/// stub instead of exercising the network.
pub struct HttpTokenIssuer {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenIssuer {
    pub fn new(token_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            token_url,
        }
    }
}

#[async_trait::async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue_token(&self, api_key: &str, api_secret: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .json(&serde_json::json!({ "api_key": api_key, "api_secret": api_secret }))
            .send()
            .await
            .map_err(|e| AuthError::TokenFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::TokenFetchFailed(format!("HTTP {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::TokenFetchFailed(format!("bad token response: {e}")))?;

        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AuthError::TokenFetchFailed("response missing access_token".to_string()))
    }
}

struct CachedToken {
    value: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub has_token: bool,
    pub is_valid: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub age_seconds: i64,
    pub time_remaining_seconds: i64,
    pub ttl_seconds: i64,
}

pub struct AuthManager {
    api_key: String,
    api_secret: String,
    issuer: Box<dyn TokenIssuer>,
    cached: Mutex<Option<CachedToken>>,
}

impl AuthManager {
    pub fn new(
        api_key: Option<String>,
        api_secret: Option<String>,
        issuer: Box<dyn TokenIssuer>,
    ) -> Result<Self, AuthError> {
        let api_key = api_key
            .or_else(|| std::env::var("BROKER_API_KEY").ok())
            .ok_or_else(|| AuthError::MissingCredentials("BROKER_API_KEY".to_string()))?;
        let api_secret = api_secret
            .or_else(|| std::env::var("BROKER_API_SECRET").ok())
            .ok_or_else(|| AuthError::MissingCredentials("BROKER_API_SECRET".to_string()))?;

        Ok(Self {
            api_key,
            api_secret,
            issuer,
            cached: Mutex::new(None),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the cached token if still valid, otherwise fetches and
    /// caches a new one.
    pub async fn get_access_token(&self, force_refresh: bool) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if Self::is_valid(token.created_at) {
                    return Ok(token.value.clone());
                }
            }
        }

        let value = self.issuer.issue_token(&self.api_key, &self.api_secret).await?;
        let created_at = Utc::now();
        info!("broker access token refreshed");
        *cached = Some(CachedToken { value: value.clone(), created_at });
        Ok(value)
    }

    pub async fn invalidate_token(&self) {
        *self.cached.lock().await = None;
    }

    pub async fn get_token_info(&self) -> TokenInfo {
        let cached = self.cached.lock().await;
        match cached.as_ref() {
            Some(token) => {
                let age_seconds = (Utc::now() - token.created_at).num_seconds();
                TokenInfo {
                    has_token: true,
                    is_valid: Self::is_valid(token.created_at),
                    created_at: Some(token.created_at),
                    age_seconds,
                    time_remaining_seconds: (TOKEN_TTL_SECONDS - age_seconds).max(0),
                    ttl_seconds: TOKEN_TTL_SECONDS,
                }
            }
            None => TokenInfo {
                has_token: false,
                is_valid: false,
                created_at: None,
                age_seconds: 0,
                time_remaining_seconds: 0,
                ttl_seconds: TOKEN_TTL_SECONDS,
            },
        }
    }

    fn is_valid(created_at: DateTime<Utc>) -> bool {
        let age = (Utc::now() - created_at).num_seconds();
        age < TOKEN_TTL_SECONDS - SAFETY_MARGIN_SECONDS
    }
}
