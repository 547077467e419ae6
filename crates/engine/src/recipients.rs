//! Recipient resolver: decides which users hear about a task event.
//!
//! Rules, by event:
//! 1. `TaskFinished`: every manager, regardless of assignment
//! 2. `TaskCreated` with assignees (from the event, else from the task): exactly those users
//! 3. `TaskCreated` without assignees (a pickup task): opted-in users whose role
//!    the pickup policy allows
//!
//! The task's author is removed from the result in every case.

use indexmap::IndexSet;
use serde::Serialize;

use taskbell_common::error::AppError;
use taskbell_common::types::{TaskEvent, TaskRecord, normalize_ids};

use crate::role::{CanonicalRole, normalize_role};
use crate::store::{UserDirectory, UserQuery};

/// Which roles a pickup broadcast reaches.
///
/// Storekeepers always qualify. Heads qualify when `include_head` is set.
/// Managers and unknown roles never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickupPolicy {
    pub include_head: bool,
}

impl PickupPolicy {
    pub fn admits(&self, role: CanonicalRole) -> bool {
        match role {
            CanonicalRole::Storekeeper => true,
            CanonicalRole::Head => self.include_head,
            CanonicalRole::Manager | CanonicalRole::Unknown => false,
        }
    }
}

impl Default for PickupPolicy {
    fn default() -> Self {
        Self { include_head: true }
    }
}

/// How the recipient set was chosen; reported in logs and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    Assignees,
    Pickup,
    Managers,
}

/// Ordered, duplicate-free set of user ids that never contains the author.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    ids: IndexSet<String>,
}

impl RecipientSet {
    /// Build a set from candidate ids, dropping blanks, duplicates and the author.
    pub fn new<I, S>(candidates: I, author: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: IndexSet<String> = normalize_ids(candidates).into_iter().collect();
        if let Some(author) = author {
            ids.shift_remove(author);
        }
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.ids.contains(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

/// The recipients plus the rule that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mode: ResolutionMode,
    pub recipients: RecipientSet,
}

/// Applies the notification rules against the user directory.
pub struct RecipientResolver {
    policy: PickupPolicy,
}

impl RecipientResolver {
    pub fn new(policy: PickupPolicy) -> Self {
        Self { policy }
    }

    /// Resolve who should be notified about `event` on `task`.
    pub async fn resolve(
        &self,
        event: &TaskEvent,
        task: &TaskRecord,
        directory: &dyn UserDirectory,
    ) -> Result<Resolution, AppError> {
        let author = task.author();

        let resolution = match event {
            TaskEvent::TaskFinished { .. } => {
                let managers = directory.users_where(UserQuery::All).await?;
                let ids = managers
                    .iter()
                    .filter(|u| normalize_role(&u.role) == CanonicalRole::Manager)
                    .map(|u| u.id.as_str());
                Resolution {
                    mode: ResolutionMode::Managers,
                    recipients: RecipientSet::new(ids, author),
                }
            }
            TaskEvent::TaskCreated { assignee_ids, .. } => {
                let explicit = Self::explicit_assignees(assignee_ids.as_deref(), task);
                if explicit.is_empty() {
                    let opted_in = directory.users_where(UserQuery::OptedIntoPickup).await?;
                    let ids = opted_in
                        .iter()
                        .filter(|u| u.pickup_opt_in && self.policy.admits(normalize_role(&u.role)))
                        .map(|u| u.id.as_str());
                    Resolution {
                        mode: ResolutionMode::Pickup,
                        recipients: RecipientSet::new(ids, author),
                    }
                } else {
                    Resolution {
                        mode: ResolutionMode::Assignees,
                        recipients: RecipientSet::new(explicit, author),
                    }
                }
            }
        };

        tracing::debug!(
            task_id = %task.id,
            event = %event,
            mode = ?resolution.mode,
            recipients = resolution.recipients.len(),
            "Recipients resolved"
        );

        Ok(resolution)
    }

    /// Event-supplied assignees win when non-empty; otherwise the task's own list.
    fn explicit_assignees(from_event: Option<&[String]>, task: &TaskRecord) -> Vec<String> {
        let from_event = from_event.map(normalize_ids).unwrap_or_default();
        if from_event.is_empty() {
            task.declared_assignees()
        } else {
            from_event
        }
    }
}

impl Default for RecipientResolver {
    fn default() -> Self {
        Self::new(PickupPolicy::default())
    }
}
