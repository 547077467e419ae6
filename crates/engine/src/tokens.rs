//! Token aggregator: expands recipients into a deduplicated device token batch.
//!
//! Directory lookups run concurrently up to a fixed bound, but results are
//! consumed in recipient order, so the batch order and the owner of a token
//! shared by several users (the earliest recipient) do not depend on timing.

use futures::StreamExt;
use futures::stream;
use indexmap::IndexMap;

use taskbell_common::error::AppError;

use crate::recipients::RecipientSet;
use crate::store::UserDirectory;

/// Default number of concurrent directory lookups.
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 8;

/// Ordered token set, each token attributed to exactly one owning user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBatch {
    owners: IndexMap<String, String>,
}

impl TokenBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token for `owner`. A token already in the batch keeps its first owner.
    /// Returns whether the token was new.
    pub fn insert(&mut self, token: &str, owner: &str) -> bool {
        if token.is_empty() || self.owners.contains_key(token) {
            return false;
        }
        self.owners.insert(token.to_string(), owner.to_string());
        true
    }

    /// Remove a token, keeping the order of the rest.
    pub fn remove(&mut self, token: &str) -> bool {
        self.owners.shift_remove(token).is_some()
    }

    pub fn owner_of(&self, token: &str) -> Option<&str> {
        self.owners.get(token).map(String::as_str)
    }

    /// Token at a given position; outcomes correlate to the batch this way.
    pub fn get_index(&self, index: usize) -> Option<(&str, &str)> {
        self.owners
            .get_index(index)
            .map(|(token, owner)| (token.as_str(), owner.as_str()))
    }

    pub fn tokens(&self) -> Vec<String> {
        self.owners.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Builds token batches from the user directory.
pub struct TokenAggregator {
    concurrency: usize,
}

impl TokenAggregator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Collect the device tokens of every recipient, then drop any token that
    /// also belongs to the author.
    ///
    /// The author subtraction runs even though the author is never a recipient:
    /// a device shared between accounts must not ping the person who acted.
    pub async fn aggregate(
        &self,
        recipients: &RecipientSet,
        author: Option<&str>,
        directory: &dyn UserDirectory,
    ) -> Result<TokenBatch, AppError> {
        let lookups: Vec<_> = recipients
            .iter()
            .map(|id| async move { (id, directory.get_user(id).await) })
            .collect();
        let users: Vec<_> = stream::iter(lookups)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut batch = TokenBatch::new();
        for (id, user) in users {
            match user? {
                Some(user) => {
                    for token in &user.fcm_tokens {
                        batch.insert(token, &user.id);
                    }
                }
                None => tracing::warn!(user_id = %id, "Recipient not found in user directory, skipping"),
            }
        }

        if let Some(author) = author
            && let Some(author) = directory.get_user(author).await?
        {
            let removed = author
                .fcm_tokens
                .iter()
                .filter(|t| batch.remove(t))
                .count();
            if removed > 0 {
                tracing::debug!(
                    author = %author.id,
                    removed,
                    "Dropped author's own tokens from batch"
                );
            }
        }

        Ok(batch)
    }
}

impl Default for TokenAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_CONCURRENCY)
    }
}
