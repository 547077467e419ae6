//! Push notification delivery.
//!
//! Exposes the [`PushProvider`] seam the dispatch engine sends through, plus
//! the Firebase Cloud Messaging implementation used in production:
//! - [`auth`]: service-account credentials and the OAuth2 JWT-bearer grant
//! - [`fcm`]: HTTP v1 client that fans a multicast out into per-token sends
//! - [`message`]: provider-neutral message and per-token outcome types

pub mod auth;
pub mod fcm;
pub mod message;

use async_trait::async_trait;
use thiserror::Error;

use taskbell_common::error::AppError;

pub use fcm::FcmClient;
pub use message::{DeliveryFailure, DeliveryOutcome, Notification, PlatformHints, Priority, PushMessage};

/// Failures of the delivery channel as a whole, as opposed to per-token failures.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("invalid service account: {0}")]
    Credentials(String),

    #[error("access token request failed: {0}")]
    Auth(String),

    #[error("failed to sign token grant: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {got} outcomes for {expected} tokens")]
    OutcomeMismatch { expected: usize, got: usize },
}

impl From<PushError> for AppError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::Credentials(msg) => AppError::Config(msg),
            other => AppError::Push(other.to_string()),
        }
    }
}

/// A multicast push channel.
///
/// Implementations return exactly one outcome per input token, in input order.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>, PushError>;
}
