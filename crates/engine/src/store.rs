//! Storage seams: the task store and the user directory.
//!
//! The engine only talks to these traits. `pg` provides the PostgreSQL
//! implementations, `memory` the in-process ones used by tests.

use async_trait::async_trait;
use chrono::NaiveDate;

use taskbell_common::error::AppError;
use taskbell_common::types::{LocatedTask, UserRecord};

/// How a caller identified a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    /// A bare task id, searched in the live table and then the archives.
    Id(String),
    /// A full document path pointing at one archive day. Looked up directly,
    /// then searched like a bare id if nothing is there.
    Archived { day: NaiveDate, id: String },
}

impl TaskRef {
    /// Parse `abc`, `tasks/abc` or `archives/YYYY-MM-DD/tasks/abc`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim().trim_matches('/');
        if raw.is_empty() {
            return Err(AppError::BadRequest("Missing taskId".to_string()));
        }
        if !raw.contains('/') {
            return Ok(TaskRef::Id(raw.to_string()));
        }

        let parts: Vec<&str> = raw.split('/').collect();
        match parts.as_slice() {
            ["tasks", id] if !id.is_empty() => Ok(TaskRef::Id(id.to_string())),
            ["archives", day, "tasks", id] if !id.is_empty() => {
                let day = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| {
                    AppError::BadRequest(format!("Invalid archive day in task path '{}'", raw))
                })?;
                Ok(TaskRef::Archived {
                    day,
                    id: id.to_string(),
                })
            }
            _ => Err(AppError::BadRequest(format!("Unrecognised task path '{}'", raw))),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TaskRef::Id(id) | TaskRef::Archived { id, .. } => id,
        }
    }
}

/// Read access to tasks, including dated archive partitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Find a task. `Ok(None)` means it is in neither the live collection nor
    /// any archive partition within the store's lookback window.
    async fn get_task(&self, task: &TaskRef) -> Result<Option<LocatedTask>, AppError>;
}

/// Predicates the directory can evaluate. Role filtering is not pushed down;
/// callers normalize roles themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserQuery {
    All,
    OptedIntoPickup,
}

/// The user directory: profiles, roles and device tokens.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError>;

    async fn users_where(&self, query: UserQuery) -> Result<Vec<UserRecord>, AppError>;

    /// Remove the given tokens from one user's token set.
    async fn remove_tokens(&self, user_id: &str, tokens: &[String]) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_id() {
        assert_eq!(TaskRef::parse(" T1 ").unwrap(), TaskRef::Id("T1".into()));
        assert_eq!(TaskRef::parse("tasks/T1").unwrap(), TaskRef::Id("T1".into()));
    }

    #[test]
    fn test_parse_archive_path() {
        let parsed = TaskRef::parse("archives/2025-03-01/tasks/T9").unwrap();
        assert_eq!(
            parsed,
            TaskRef::Archived {
                day: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                id: "T9".into()
            }
        );
        assert_eq!(parsed.id(), "T9");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(TaskRef::parse("   "), Err(AppError::BadRequest(_))));
        assert!(matches!(
            TaskRef::parse("archives/yesterday/tasks/T1"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(TaskRef::parse("users/u1"), Err(AppError::BadRequest(_))));
    }
}
