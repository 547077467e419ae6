use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Task lifecycle events that trigger a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated {
        task_id: String,
        /// Assignees named by the caller; `None` defers to the task record.
        assignee_ids: Option<Vec<String>>,
    },
    TaskFinished {
        task_id: String,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::TaskCreated { task_id, .. } | TaskEvent::TaskFinished { task_id } => task_id,
        }
    }

    /// Short name used in logs and in the push data block.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::TaskCreated { .. } => "task_created",
            TaskEvent::TaskFinished { .. } => "task_finished",
        }
    }
}

impl std::fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A warehouse task as stored by the mobile app. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: String,
    pub title: Option<String>,
    pub comment: Option<String>,
    /// Author of the task; never notified about their own task
    pub created_by: Option<String>,
    /// Directed assignees. Absent or empty means a pickup task.
    pub assignee_ids: Option<Vec<String>>,
    pub assignee_names: Option<Vec<String>>,
    /// Display name of whoever completed the task
    pub taken_by_name: Option<String>,
}

impl TaskRecord {
    /// Non-blank assignee ids carried by the record itself.
    pub fn declared_assignees(&self) -> Vec<String> {
        self.assignee_ids
            .as_deref()
            .map(normalize_ids)
            .unwrap_or_default()
    }

    /// Non-blank author id, if the record has one.
    pub fn author(&self) -> Option<&str> {
        self.created_by
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Where a task was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "day", rename_all = "lowercase")]
pub enum TaskLocation {
    Primary,
    Archive(NaiveDate),
}

impl std::fmt::Display for TaskLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskLocation::Primary => write!(f, "tasks"),
            TaskLocation::Archive(day) => write!(f, "archives/{}/tasks", day.format("%Y-%m-%d")),
        }
    }
}

/// A task record together with the collection it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTask {
    pub record: TaskRecord,
    pub location: TaskLocation,
}

impl LocatedTask {
    /// Document path in the `tasks/<id>` / `archives/<day>/tasks/<id>` form.
    pub fn path(&self) -> String {
        format!("{}/{}", self.location, self.record.id)
    }
}

/// A user as seen by the notification subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    /// Free-text role label, normalized by the role classifier
    pub role: String,
    /// Opted into broadcast notifications for pickup tasks
    pub pickup_opt_in: bool,
    /// Registered device push tokens; may hold duplicates or stale entries
    pub fcm_tokens: Vec<String>,
}

/// Assignee ids as they arrive on the wire: either `"a, b"` or `["a", "b"]`.
///
/// Entries are trimmed and blank entries dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AssigneeIds(pub Vec<String>);

impl AssigneeIds {
    pub fn parse_joined(raw: &str) -> Self {
        Self(normalize_ids(raw.split(',')))
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl<'de> Deserialize<'de> for AssigneeIds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Joined(String),
            List(Vec<serde_json::Value>),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Joined(raw) => AssigneeIds::parse_joined(&raw),
            Wire::List(items) => {
                let ids: Vec<String> = items
                    .into_iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                AssigneeIds(normalize_ids(&ids))
            }
        })
    }
}

/// Trim every id and drop the blank ones, keeping order.
pub fn normalize_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignees_from_joined_string() {
        let ids: AssigneeIds = serde_json::from_value(serde_json::json!(" u1, ,u2 ,")).unwrap();
        assert_eq!(ids.into_inner(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_assignees_from_array() {
        let ids: AssigneeIds =
            serde_json::from_value(serde_json::json!(["u1 ", "", 42, null, "  u3"])).unwrap();
        assert_eq!(ids.into_inner(), vec!["u1", "42", "u3"]);
    }

    #[test]
    fn test_declared_assignees_filters_blanks() {
        let task = TaskRecord {
            id: "t".into(),
            assignee_ids: Some(vec![" ".into(), "u1".into()]),
            ..Default::default()
        };
        assert_eq!(task.declared_assignees(), vec!["u1"]);
        assert!(TaskRecord::default().declared_assignees().is_empty());
    }

    #[test]
    fn test_located_task_path() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let task = LocatedTask {
            record: TaskRecord {
                id: "abc".into(),
                ..Default::default()
            },
            location: TaskLocation::Archive(day),
        };
        assert_eq!(task.path(), "archives/2025-03-01/tasks/abc");
    }

    #[test]
    fn test_blank_author_is_none() {
        let task = TaskRecord {
            created_by: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(task.author(), None);
    }
}
