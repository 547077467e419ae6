//! Service-account credentials and OAuth2 access tokens for FCM.
//!
//! Access tokens come from the JWT-bearer grant: an RS256 assertion signed with
//! the service account key is exchanged at the account's `token_uri`. Tokens are
//! cached until shortly before they expire.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::PushError;

/// OAuth2 scope required by the FCM HTTP v1 API.
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion (Google caps this at one hour).
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Cached tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// The subset of a Google service account JSON key we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccount {
    /// Parse a service account key as stored in an environment variable.
    ///
    /// Keys pasted into env vars usually carry literal `\n` sequences instead
    /// of newlines; those are restored before the PEM is used.
    pub fn from_json(raw: &str) -> Result<Self, PushError> {
        let mut account: ServiceAccount = serde_json::from_str(raw)
            .map_err(|e| PushError::Credentials(format!("not valid service account JSON: {}", e)))?;

        account.private_key = account.private_key.replace("\\n", "\n").trim().to_string();

        for (field, value) in [
            ("project_id", &account.project_id),
            ("client_email", &account.client_email),
            ("private_key", &account.private_key),
        ] {
            if value.trim().is_empty() {
                return Err(PushError::Credentials(format!("{} is empty", field)));
            }
        }

        Ok(account)
    }

    /// Parse the RS256 signing key for grant assertions.
    pub fn signing_key(&self) -> Result<EncodingKey, PushError> {
        EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| PushError::Credentials(format!("private_key is not a valid RSA PEM: {}", e)))
    }

    fn grant_claims(&self, now: DateTime<Utc>) -> GrantClaims {
        GrantClaims {
            iss: self.client_email.clone(),
            scope: FCM_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        }
    }
}

/// Claims of the JWT-bearer assertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

/// Where bearer tokens come from.
pub enum TokenSource {
    /// Exchange signed assertions for short-lived tokens.
    ServiceAccount(ServiceAccount),
    /// Use a fixed bearer token (emulators, externally managed tokens).
    Static(String),
}

/// Hands out bearer tokens for FCM requests, caching grant results.
pub struct AccessTokens {
    source: TokenSource,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
}

impl AccessTokens {
    pub fn new(source: TokenSource, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            cache: RwLock::new(None),
        }
    }

    /// Return a valid bearer token, fetching a fresh one when needed.
    pub async fn bearer(&self) -> Result<String, PushError> {
        let account = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount(account) => account,
        };

        if let Some(cached) = self.cache.read().await.as_ref()
            && cached.refresh_at > Utc::now()
        {
            return Ok(cached.value.clone());
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref()
            && cached.refresh_at > Utc::now()
        {
            return Ok(cached.value.clone());
        }

        let fresh = self.exchange(account).await?;
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }

    async fn exchange(&self, account: &ServiceAccount) -> Result<CachedToken, PushError> {
        let now = Utc::now();
        let key = account.signing_key()?;
        let assertion = encode(&Header::new(Algorithm::RS256), &account.grant_claims(now), &key)?;

        let response = self
            .http
            .post(&account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(
            client_email = %account.client_email,
            expires_in = token.expires_in,
            "Obtained FCM access token"
        );

        Ok(CachedToken {
            value: token.access_token,
            refresh_at: refresh_deadline(now, token.expires_in),
        })
    }
}

/// When a token reported to live `expires_in` seconds should be replaced.
///
/// The server-reported lifetime is clamped to `[0, ASSERTION_LIFETIME_SECS]`.
fn refresh_deadline(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let lifetime = expires_in.clamp(0, ASSERTION_LIFETIME_SECS) - REFRESH_MARGIN_SECS;
    let margin = Duration::try_seconds(lifetime.max(0)).unwrap_or(Duration::zero());
    now.checked_add_signed(margin).unwrap_or(now)
}
