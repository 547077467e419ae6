//! Dispatch engine: one multicast send per event.

use std::sync::Arc;

use taskbell_common::error::AppError;
use taskbell_notifier::{DeliveryOutcome, PushError, PushMessage, PushProvider};

use crate::tokens::TokenBatch;

/// Counts and per-token outcomes of a multicast, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

pub struct Dispatcher {
    provider: Arc<dyn PushProvider>,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn PushProvider>) -> Self {
        Self { provider }
    }

    /// Send `message` to every token in the batch.
    ///
    /// An empty batch returns a zero result without touching the provider.
    /// Partial failure is not an error; only a failure of the channel as a
    /// whole is.
    pub async fn dispatch(&self, batch: &TokenBatch, message: &PushMessage) -> Result<DispatchResult, AppError> {
        if batch.is_empty() {
            return Ok(DispatchResult::default());
        }

        let tokens = batch.tokens();
        let outcomes = self.provider.send_multicast(&tokens, message).await?;
        if outcomes.len() != tokens.len() {
            return Err(PushError::OutcomeMismatch {
                expected: tokens.len(),
                got: outcomes.len(),
            }
            .into());
        }

        let success_count = outcomes.iter().filter(|o| o.is_delivered()).count();
        let failure_count = outcomes.len() - success_count;

        if failure_count > 0 {
            tracing::warn!(
                tokens = tokens.len(),
                success_count,
                failure_count,
                "Multicast completed with failures"
            );
        } else {
            tracing::info!(tokens = tokens.len(), "Multicast delivered");
        }

        Ok(DispatchResult {
            success_count,
            failure_count,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use taskbell_notifier::{DeliveryFailure, Notification, PlatformHints, Priority};

    use super::*;

    /// Records calls; fails tokens starting with `bad`.
    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<Vec<String>>>,
        drop_last: bool,
    }

    #[async_trait]
    impl PushProvider for FakeProvider {
        async fn send_multicast(
            &self,
            tokens: &[String],
            _message: &PushMessage,
        ) -> Result<Vec<DeliveryOutcome>, PushError> {
            self.calls.lock().unwrap().push(tokens.to_vec());
            let mut outcomes: Vec<DeliveryOutcome> = tokens
                .iter()
                .map(|t| {
                    if t.starts_with("bad") {
                        DeliveryOutcome::Failed(DeliveryFailure::new("UNREGISTERED", "gone"))
                    } else {
                        DeliveryOutcome::Delivered {
                            message_id: format!("m-{}", t),
                        }
                    }
                })
                .collect();
            if self.drop_last {
                outcomes.pop();
            }
            Ok(outcomes)
        }
    }

    fn message() -> PushMessage {
        PushMessage {
            notification: Notification {
                title: "t".to_string(),
                body: "b".to_string(),
            },
            data: BTreeMap::from([("taskId".to_string(), "T1".to_string())]),
            platform_hints: PlatformHints {
                priority: Priority::High,
                channel: "tasks".to_string(),
                click_target: "OPEN_TASK".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_empty_batch_skips_provider() {
        let provider = Arc::new(FakeProvider::default());
        let dispatcher = Dispatcher::new(provider.clone());
        let result = dispatcher.dispatch(&TokenBatch::new(), &message()).await.unwrap();
        assert_eq!(result, DispatchResult::default());
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_call_with_counts() {
        let provider = Arc::new(FakeProvider::default());
        let dispatcher = Dispatcher::new(provider.clone());
        let mut batch = TokenBatch::new();
        batch.insert("a", "u1");
        batch.insert("bad-b", "u2");
        batch.insert("c", "u2");

        let result = dispatcher.dispatch(&batch, &message()).await.unwrap();
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec![vec!["a".to_string(), "bad-b".to_string(), "c".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_outcome_count_mismatch_is_provider_error() {
        let provider = Arc::new(FakeProvider {
            drop_last: true,
            ..Default::default()
        });
        let mut batch = TokenBatch::new();
        batch.insert("a", "u1");
        let err = Dispatcher::new(provider)
            .dispatch(&batch, &message())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Push(_)));
    }
}
