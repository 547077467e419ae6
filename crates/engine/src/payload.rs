//! Notification payloads for task events.

use std::collections::BTreeMap;

use taskbell_common::types::{TaskEvent, TaskRecord};
use taskbell_notifier::{Notification, PlatformHints, Priority, PushMessage};

const UNTITLED: &str = "Без названия";
const DEFAULT_FINISHER: &str = "кладовщик";

/// Platform settings stamped onto every outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSettings {
    pub android_channel: String,
    pub click_action: String,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            android_channel: "tasks".to_string(),
            click_action: "OPEN_TASK".to_string(),
        }
    }
}

/// Build the push message for an event. The data block always carries the
/// task id so the app can open the task whether or not the banner is tapped.
pub fn build_message(event: &TaskEvent, task: &TaskRecord, settings: &PayloadSettings) -> PushMessage {
    let title = task
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);

    let notification = match event {
        TaskEvent::TaskCreated { .. } => Notification {
            title: "Новая задача".to_string(),
            body: match task.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                Some(comment) => format!("{}: {}", title, comment),
                None => title.to_string(),
            },
        },
        TaskEvent::TaskFinished { .. } => Notification {
            title: "Задача завершена".to_string(),
            body: format!("«{}» выполнена ({})", title, finisher_name(task)),
        },
    };

    let data = BTreeMap::from([
        ("taskId".to_string(), task.id.clone()),
        ("event".to_string(), event.name().to_string()),
        ("clickAction".to_string(), settings.click_action.clone()),
    ]);

    PushMessage {
        notification,
        data,
        platform_hints: PlatformHints {
            priority: Priority::High,
            channel: settings.android_channel.clone(),
            click_target: settings.click_action.clone(),
        },
    }
}

/// Who completed the task: the recorded taker, else the first assignee name.
fn finisher_name(task: &TaskRecord) -> &str {
    task.taken_by_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            task.assignee_names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
        })
        .unwrap_or(DEFAULT_FINISHER)
}
