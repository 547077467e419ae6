use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Human-readable banner shown by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Delivery priority requested from the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    High,
    Normal,
}

/// Platform-specific delivery hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformHints {
    pub priority: Priority,
    /// Android notification channel id
    pub channel: String,
    /// Click target the client routes on when the banner is tapped
    pub click_target: String,
}

/// A notification payload, addressed to a token set at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub notification: Notification,
    /// Structured data delivered alongside the banner; values are strings
    /// because that is all FCM data blocks carry.
    pub data: BTreeMap<String, String>,
    pub platform_hints: PlatformHints,
}

/// Why a single token could not be delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    /// Provider error code, e.g. `UNREGISTERED` or `QUOTA_EXCEEDED`
    pub code: String,
    pub message: String,
}

impl DeliveryFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of sending to one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered { message_id: String },
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn failure(&self) -> Option<&DeliveryFailure> {
        match self {
            DeliveryOutcome::Failed(failure) => Some(failure),
            DeliveryOutcome::Delivered { .. } => None,
        }
    }
}
