//! Firebase Cloud Messaging HTTP v1 client.
//!
//! The v1 API addresses one token per request, so a multicast is fanned out
//! into concurrent per-token sends. Results are gathered in input order so
//! callers can correlate outcomes to tokens by position.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::{AccessTokens, ServiceAccount, TokenSource};
use crate::message::{DeliveryFailure, DeliveryOutcome, Priority, PushMessage};
use crate::{PushError, PushProvider};

pub const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

/// Default number of in-flight send requests per multicast.
const DEFAULT_CONCURRENCY: usize = 16;

/// FCM HTTP v1 push provider.
pub struct FcmClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    tokens: AccessTokens,
    concurrency: usize,
}

impl FcmClient {
    /// Build a client for the service account's project.
    ///
    /// When `static_token` is set it is used as the bearer token instead of
    /// running the JWT grant. Otherwise the account's private key must parse.
    pub fn new(account: ServiceAccount, static_token: Option<String>) -> Result<Self, PushError> {
        let http = reqwest::Client::new();
        let project_id = account.project_id.clone();
        let source = match static_token {
            Some(token) => TokenSource::Static(token),
            None => {
                account.signing_key()?;
                TokenSource::ServiceAccount(account)
            }
        };

        Ok(Self {
            tokens: AccessTokens::new(source, http.clone()),
            http,
            base_url: FCM_BASE_URL.to_string(),
            project_id,
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Point the client at a different FCM endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn send_url(&self) -> String {
        format!("{}/v1/projects/{}/messages:send", self.base_url, self.project_id)
    }

    async fn send_one(&self, url: &str, bearer: &str, token: &str, message: &PushMessage) -> DeliveryOutcome {
        let response = match self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(&fcm_request_body(token, message))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::Failed(DeliveryFailure::new("TRANSPORT", e.to_string())),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::Failed(DeliveryFailure::new("TRANSPORT", e.to_string())),
        };

        if status.is_success() {
            let message_id = serde_json::from_str::<SendResponse>(&body)
                .map(|r| r.name)
                .unwrap_or_default();
            DeliveryOutcome::Delivered { message_id }
        } else {
            DeliveryOutcome::Failed(parse_error(status, &body))
        }
    }
}

#[async_trait]
impl PushProvider for FcmClient {
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>, PushError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let bearer = self.tokens.bearer().await?;
        let url = self.send_url();

        let sends: Vec<_> = tokens
            .iter()
            .map(|token| self.send_one(&url, &bearer, token, message))
            .collect();
        let outcomes: Vec<DeliveryOutcome> = stream::iter(sends)
            .buffered(self.concurrency)
            .collect()
            .await;

        let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
        tracing::debug!(
            project_id = %self.project_id,
            tokens = tokens.len(),
            delivered,
            failed = tokens.len() - delivered,
            "FCM multicast finished"
        );

        Ok(outcomes)
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

/// Turn an FCM error response into a failure, preferring the FCM-specific
/// `errorCode` detail over the generic gRPC status.
fn parse_error(status: reqwest::StatusCode, body: &str) -> DeliveryFailure {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = envelope
                .error
                .details
                .iter()
                .find_map(|d| d.error_code.clone())
                .or(envelope.error.status)
                .unwrap_or_else(|| status.as_u16().to_string());
            DeliveryFailure::new(code, envelope.error.message)
        }
        Err(_) => DeliveryFailure::new(status.as_u16().to_string(), body.trim().to_string()),
    }
}

/// The v1 `messages:send` request body for a single token.
pub fn fcm_request_body(token: &str, message: &PushMessage) -> Value {
    let hints = &message.platform_hints;
    let (android_priority, apns_priority) = match hints.priority {
        Priority::High => ("HIGH", "10"),
        Priority::Normal => ("NORMAL", "5"),
    };

    json!({
        "message": {
            "token": token,
            "notification": {
                "title": message.notification.title,
                "body": message.notification.body,
            },
            "data": message.data,
            "android": {
                "priority": android_priority,
                "notification": {
                    "channel_id": hints.channel,
                    "click_action": hints.click_target,
                },
            },
            "apns": {
                "headers": { "apns-priority": apns_priority },
                "payload": { "aps": { "category": hints.click_target } },
            },
        }
    })
}
