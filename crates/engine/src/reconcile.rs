//! Stale token reconciler: removes device registrations the provider reports
//! as permanently invalid.
//!
//! Cleanup is best-effort: a failed update for one user is logged and the
//! remaining users are still processed. Nothing here can fail a dispatch.

use indexmap::IndexMap;
use serde::Serialize;

use taskbell_notifier::{DeliveryFailure, DeliveryOutcome};

use crate::store::UserDirectory;
use crate::tokens::TokenBatch;

/// Markers of a permanently invalid registration, compared against the
/// failure code and message with case, `-`, `_` and spaces ignored.
const PERMANENT_MARKERS: &[&str] = &[
    "unregistered",
    "notregistered",
    "registrationtoken",
    "mismatchsenderid",
    "senderidmismatch",
    "invalidtoken",
];

/// Whether a failure is worth acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The token will never work again; remove it.
    Permanent,
    /// Rate limiting, outages, network errors; leave the token alone.
    Transient,
}

/// Classify a delivery failure.
pub fn classify(failure: &DeliveryFailure) -> FailureClass {
    let haystack: String = format!("{} {}", failure.code, failure.message)
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect();

    if PERMANENT_MARKERS.iter().any(|m| haystack.contains(m)) {
        FailureClass::Permanent
    } else {
        FailureClass::Transient
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub stale_tokens: usize,
    pub transient_failures: usize,
    pub owners_updated: usize,
    pub owners_failed: usize,
    pub tokens_removed: usize,
}

pub struct StaleTokenReconciler;

impl StaleTokenReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Remove permanently invalid tokens from their owners, one update per owner.
    ///
    /// `outcomes` correlate to `batch` by position.
    pub async fn reconcile(
        &self,
        batch: &TokenBatch,
        outcomes: &[DeliveryOutcome],
        directory: &dyn UserDirectory,
    ) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        let mut by_owner: IndexMap<String, Vec<String>> = IndexMap::new();

        for (index, outcome) in outcomes.iter().enumerate() {
            let Some(failure) = outcome.failure() else {
                continue;
            };
            match classify(failure) {
                FailureClass::Transient => summary.transient_failures += 1,
                FailureClass::Permanent => {
                    summary.stale_tokens += 1;
                    match batch.get_index(index) {
                        Some((token, owner)) => by_owner
                            .entry(owner.to_string())
                            .or_default()
                            .push(token.to_string()),
                        None => tracing::warn!(index, "Delivery outcome has no matching token"),
                    }
                }
            }
        }

        for (owner, tokens) in &by_owner {
            match directory.remove_tokens(owner, tokens).await {
                Ok(()) => {
                    summary.owners_updated += 1;
                    summary.tokens_removed += tokens.len();
                    tracing::info!(user_id = %owner, removed = tokens.len(), "Removed stale tokens");
                }
                Err(e) => {
                    summary.owners_failed += 1;
                    tracing::warn!(user_id = %owner, error = %e, "Stale token cleanup failed");
                }
            }
        }

        summary
    }
}

impl Default for StaleTokenReconciler {
    fn default() -> Self {
        Self::new()
    }
}
