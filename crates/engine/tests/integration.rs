//! End-to-end tests for the notification pipeline.
//!
//! Runs against the in-memory stores and a recording push provider, so no
//! external services are needed:
//!
//! ```bash
//! cargo test -p taskbell-engine --test integration
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Days, Utc};

use taskbell_common::error::AppError;
use taskbell_common::types::{TaskEvent, TaskRecord, UserRecord};
use taskbell_engine::memory::{InMemoryTaskStore, InMemoryUserDirectory};
use taskbell_engine::recipients::{PickupPolicy, ResolutionMode};
use taskbell_engine::store::{UserDirectory, UserQuery};
use taskbell_engine::{NotificationService, ReportMode, ServiceSettings};
use taskbell_notifier::{DeliveryFailure, DeliveryOutcome, PushError, PushMessage, PushProvider};

// ============================================================
// Shared helpers
// ============================================================

/// Push provider that records every multicast and fails chosen tokens.
#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<(Vec<String>, PushMessage)>>,
    unregistered: HashSet<String>,
    throttled: HashSet<String>,
}

impl RecordingProvider {
    fn failing(unregistered: &[&str], throttled: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            unregistered: unregistered.iter().map(|t| t.to_string()).collect(),
            throttled: throttled.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn calls(&self) -> Vec<(Vec<String>, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushProvider for RecordingProvider {
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>, PushError> {
        self.sent
            .lock()
            .unwrap()
            .push((tokens.to_vec(), message.clone()));

        Ok(tokens
            .iter()
            .map(|t| {
                if self.unregistered.contains(t) {
                    DeliveryOutcome::Failed(DeliveryFailure::new(
                        "UNREGISTERED",
                        "Requested entity was not found.",
                    ))
                } else if self.throttled.contains(t) {
                    DeliveryOutcome::Failed(DeliveryFailure::new(
                        "QUOTA_EXCEEDED",
                        "Sending limit exceeded",
                    ))
                } else {
                    DeliveryOutcome::Delivered {
                        message_id: format!("projects/demo/messages/{}", t),
                    }
                }
            })
            .collect())
    }
}

/// Provider whose channel is down entirely.
struct BrokenProvider;

#[async_trait]
impl PushProvider for BrokenProvider {
    async fn send_multicast(
        &self,
        _tokens: &[String],
        _message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>, PushError> {
        Err(PushError::Auth("401 Unauthorized: invalid_grant".to_string()))
    }
}

/// User directory that counts reads before delegating to the in-memory one.
struct CountingDirectory {
    inner: Arc<InMemoryUserDirectory>,
    reads: AtomicUsize,
}

impl CountingDirectory {
    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for CountingDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user(user_id).await
    }

    async fn users_where(&self, query: UserQuery) -> Result<Vec<UserRecord>, AppError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.users_where(query).await
    }

    async fn remove_tokens(&self, user_id: &str, tokens: &[String]) -> Result<(), AppError> {
        self.inner.remove_tokens(user_id, tokens).await
    }
}

fn user(id: &str, role: &str, opted_in: bool, tokens: &[&str]) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        role: role.to_string(),
        pickup_opt_in: opted_in,
        fcm_tokens: tokens.iter().map(|t| t.to_string()).collect(),
    }
}

fn task(id: &str, author: &str, assignees: Option<&[&str]>) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: Some("Приёмка товара".to_string()),
        comment: None,
        created_by: Some(author.to_string()),
        assignee_ids: assignees.map(|a| a.iter().map(|s| s.to_string()).collect()),
        assignee_names: None,
        taken_by_name: Some("Иван".to_string()),
    }
}

fn created(task_id: &str, assignees: Option<&[&str]>) -> TaskEvent {
    TaskEvent::TaskCreated {
        task_id: task_id.to_string(),
        assignee_ids: assignees.map(|a| a.iter().map(|s| s.to_string()).collect()),
    }
}

fn finished(task_id: &str) -> TaskEvent {
    TaskEvent::TaskFinished {
        task_id: task_id.to_string(),
    }
}

struct Harness {
    tasks: Arc<InMemoryTaskStore>,
    users: Arc<InMemoryUserDirectory>,
    directory: Arc<CountingDirectory>,
    push: Arc<RecordingProvider>,
    service: NotificationService,
}

fn harness(push: RecordingProvider, settings: ServiceSettings) -> Harness {
    let tasks = Arc::new(InMemoryTaskStore::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    let directory = Arc::new(CountingDirectory {
        inner: users.clone(),
        reads: AtomicUsize::new(0),
    });
    let push = Arc::new(push);
    let service = NotificationService::new(tasks.clone(), directory.clone(), push.clone(), settings);
    Harness {
        tasks,
        users,
        directory,
        push,
        service,
    }
}

// ============================================================
// Worked scenarios
// ============================================================

#[tokio::test]
async fn test_assigned_task_excludes_author_tokens() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.tasks.insert(task("T1", "u0", None));
    h.users.insert(user("u0", "manager", false, &["c"]));
    h.users.insert(user("u1", "storekeeper", false, &["a", "b"]));
    h.users.insert(user("u2", "storekeeper", false, &["b", "c"]));

    let report = h
        .service
        .handle(&created("T1", Some(&["u1", "u2"])))
        .await
        .unwrap();

    let calls = h.push.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, vec!["a", "b"]);
    assert_eq!(calls[0].1.data["taskId"], "T1");
    assert_eq!(report.mode, ReportMode::Sent);
    assert_eq!(report.resolution, ResolutionMode::Assignees);
    assert_eq!(report.recipients, 2);
    assert_eq!(report.tokens_tried, 2);
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_pickup_task_filters_by_role() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.tasks.insert(task("T2", "boss", None));
    h.users.insert(user("u3", "Кладовщик", true, &["x"]));
    h.users.insert(user("u4", "Менеджер", true, &["y"]));

    let report = h.service.handle(&created("T2", None)).await.unwrap();

    let calls = h.push.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, vec!["x"]);
    assert_eq!(report.resolution, ResolutionMode::Pickup);
    assert_eq!(report.sent, 1);
}

// ============================================================
// Resolution policies
// ============================================================

#[tokio::test]
async fn test_pickup_head_policy_is_configurable() {
    let settings = ServiceSettings {
        pickup: PickupPolicy {
            include_head: false,
        },
        ..Default::default()
    };
    let h = harness(RecordingProvider::default(), settings);
    h.tasks.insert(task("T3", "boss", Some(&[])));
    h.users.insert(user("sk", "storekeeper", true, &["sk-phone"]));
    h.users.insert(user("hd", "head", true, &["hd-phone"]));

    h.service.handle(&created("T3", None)).await.unwrap();
    assert_eq!(h.push.calls()[0].0, vec!["sk-phone"]);
}

#[tokio::test]
async fn test_finished_task_notifies_managers_only() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.tasks.insert(task("T4", "mgr-author", Some(&["sk"])));
    h.users.insert(user("sk", "storekeeper", true, &["sk-phone"]));
    h.users.insert(user("mgr-author", "manager", false, &["author-phone"]));
    h.users.insert(user("mgr", "Менеджер", false, &["mgr-phone"]));

    let report = h.service.handle(&finished("T4")).await.unwrap();

    let calls = h.push.calls();
    assert_eq!(calls[0].0, vec!["mgr-phone"]);
    assert_eq!(calls[0].1.notification.title, "Задача завершена");
    assert_eq!(calls[0].1.notification.body, "«Приёмка товара» выполнена (Иван)");
    assert_eq!(report.resolution, ResolutionMode::Managers);
}

// ============================================================
// No-ops and errors
// ============================================================

#[tokio::test]
async fn test_no_eligible_recipients_is_a_successful_noop() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.tasks.insert(task("T5", "boss", None));
    h.users.insert(user("sk", "storekeeper", false, &["sk-phone"]));

    let report = h.service.handle(&created("T5", None)).await.unwrap();

    assert!(h.push.calls().is_empty());
    assert_eq!(report.mode, ReportMode::NoTokens);
    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.info.as_deref(), Some("no tokens"));
}

#[tokio::test]
async fn test_missing_task_is_not_found_before_any_lookup() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.users.insert(user("u1", "storekeeper", false, &["a"]));

    let err = h.service.handle(&created("nope", Some(&["u1"]))).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(h.push.calls().is_empty());
    assert_eq!(h.directory.reads(), 0);

    let err = h.service.handle(&finished("nope")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.directory.reads(), 0);
}

#[tokio::test]
async fn test_directory_reads_are_counted_for_found_tasks() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.tasks.insert(task("T9", "boss", Some(&["u1"])));
    h.users.insert(user("u1", "storekeeper", false, &["a"]));

    h.service.handle(&created("T9", None)).await.unwrap();
    assert!(h.directory.reads() > 0);
}

#[tokio::test]
async fn test_blank_task_id_is_bad_request() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    let err = h.service.handle(&finished("  ")).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_channel_failure_surfaces_as_push_error() {
    let tasks = Arc::new(InMemoryTaskStore::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    tasks.insert(task("T6", "boss", Some(&["u1"])));
    users.insert(user("u1", "storekeeper", false, &["a"]));
    let service = NotificationService::new(
        tasks,
        users,
        Arc::new(BrokenProvider),
        ServiceSettings::default(),
    );

    let err = service.handle(&created("T6", None)).await.unwrap_err();
    assert!(matches!(err, AppError::Push(_)));
    assert!(err.to_string().contains("invalid_grant"));
}

// ============================================================
// Archives and dry runs
// ============================================================

#[tokio::test]
async fn test_archived_task_is_found() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    let day = Utc::now().date_naive() - Days::new(5);
    h.tasks.insert_archived(day, task("OLD", "boss", None));
    h.users.insert(user("mgr", "manager", false, &["mgr-phone"]));

    let report = h.service.handle(&finished("OLD")).await.unwrap();
    assert_eq!(report.sent, 1);

    let path = format!("archives/{}/tasks/OLD", day.format("%Y-%m-%d"));
    let report = h.service.preview(&finished(&path)).await.unwrap();
    assert_eq!(report.location.as_deref(), Some(path.as_str()));
}

#[tokio::test]
async fn test_preview_never_sends() {
    let h = harness(RecordingProvider::default(), ServiceSettings::default());
    h.tasks.insert(task("T7", "boss", Some(&["u1"])));
    h.users.insert(user("u1", "storekeeper", false, &["a", "b"]));

    let report = h.service.preview(&created("T7", None)).await.unwrap();

    assert!(h.push.calls().is_empty());
    assert_eq!(report.mode, ReportMode::Debug);
    assert_eq!(report.tokens_tried, 2);
    assert_eq!(report.location.as_deref(), Some("tasks/T7"));
}

// ============================================================
// Stale token reconciliation
// ============================================================

#[tokio::test]
async fn test_stale_tokens_removed_transient_kept() {
    let h = harness(
        RecordingProvider::failing(&["dead"], &["busy"]),
        ServiceSettings::default(),
    );
    h.tasks.insert(task("T8", "boss", Some(&["u1", "u2"])));
    h.users.insert(user("u1", "storekeeper", false, &["ok", "dead"]));
    h.users.insert(user("u2", "storekeeper", false, &["busy"]));

    let report = h.service.handle(&created("T8", None)).await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.stale_tokens_removed, 1);
    assert_eq!(h.users.tokens_of("u1"), vec!["ok"]);
    assert_eq!(h.users.tokens_of("u2"), vec!["busy"]);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_fail_dispatch() {
    let h = harness(
        RecordingProvider::failing(&["dead-1", "dead-2"], &[]),
        ServiceSettings::default(),
    );
    h.tasks.insert(task("T9", "boss", Some(&["u1", "u2"])));
    h.users.insert(user("u1", "storekeeper", false, &["dead-1"]));
    h.users.insert(user("u2", "storekeeper", false, &["dead-2"]));
    h.users.fail_removals_for("u1");

    let report = h.service.handle(&created("T9", None)).await.unwrap();

    assert!(report.ok);
    assert_eq!(report.failed, 2);
    assert_eq!(report.stale_tokens_removed, 1);
    assert_eq!(h.users.tokens_of("u1"), vec!["dead-1"]);
    assert!(h.users.tokens_of("u2").is_empty());
}
