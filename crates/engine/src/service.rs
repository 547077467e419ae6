//! Notification service: runs one task event through the whole pipeline.
//!
//! 1. Look up the task (live table, then archives)
//! 2. Resolve recipients (`RecipientResolver`)
//! 3. Expand them into a token batch (`TokenAggregator`)
//! 4. Send one multicast (`Dispatcher`)
//! 5. Remove stale tokens reported by the provider (`StaleTokenReconciler`)

use std::sync::Arc;

use serde::Serialize;

use taskbell_common::config::AppConfig;
use taskbell_common::error::AppError;
use taskbell_common::types::TaskEvent;
use taskbell_notifier::PushProvider;

use crate::dispatch::Dispatcher;
use crate::payload::{PayloadSettings, build_message};
use crate::recipients::{PickupPolicy, RecipientResolver, ResolutionMode};
use crate::reconcile::{CleanupSummary, StaleTokenReconciler};
use crate::store::{TaskRef, TaskStore, UserDirectory};
use crate::tokens::TokenAggregator;

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub pickup: PickupPolicy,
    pub lookup_concurrency: usize,
    pub payload: PayloadSettings,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            pickup: PickupPolicy {
                include_head: config.pickup_include_head,
            },
            lookup_concurrency: config.lookup_concurrency,
            payload: PayloadSettings {
                android_channel: config.push_android_channel.clone(),
                click_action: config.push_click_action.clone(),
            },
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            pickup: PickupPolicy::default(),
            lookup_concurrency: crate::tokens::DEFAULT_LOOKUP_CONCURRENCY,
            payload: PayloadSettings::default(),
        }
    }
}

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// The multicast was sent.
    Sent,
    /// Nobody to notify; the provider was not contacted.
    NoTokens,
    /// Recipients and tokens were resolved but nothing was sent.
    Debug,
}

/// Response body for a processed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub ok: bool,
    pub task_id: String,
    pub mode: ReportMode,
    pub resolution: ResolutionMode,
    pub recipients: usize,
    pub tokens_tried: usize,
    pub sent: usize,
    pub failed: usize,
    pub stale_tokens_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// Everything needed to process task events. Collaborators are injected.
pub struct NotificationService {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserDirectory>,
    resolver: RecipientResolver,
    aggregator: TokenAggregator,
    dispatcher: Dispatcher,
    reconciler: StaleTokenReconciler,
    payload: PayloadSettings,
}

impl NotificationService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        push: Arc<dyn PushProvider>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            tasks,
            users,
            resolver: RecipientResolver::new(settings.pickup),
            aggregator: TokenAggregator::new(settings.lookup_concurrency),
            dispatcher: Dispatcher::new(push),
            reconciler: StaleTokenReconciler::new(),
            payload: settings.payload,
        }
    }

    /// Notify the right people about `event`.
    pub async fn handle(&self, event: &TaskEvent) -> Result<DispatchReport, AppError> {
        self.process(event, false).await
    }

    /// Resolve recipients and tokens for `event` without sending anything.
    pub async fn preview(&self, event: &TaskEvent) -> Result<DispatchReport, AppError> {
        self.process(event, true).await
    }

    async fn process(&self, event: &TaskEvent, dry_run: bool) -> Result<DispatchReport, AppError> {
        let task_ref = TaskRef::parse(event.task_id())?;
        let located = self
            .tasks
            .get_task(&task_ref)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_ref.id())))?;
        let task = &located.record;
        let author = task.author();

        let resolution = self.resolver.resolve(event, task, self.users.as_ref()).await?;
        let batch = self
            .aggregator
            .aggregate(&resolution.recipients, author, self.users.as_ref())
            .await?;

        tracing::info!(
            task_id = %task.id,
            event = %event,
            path = %located.path(),
            mode = ?resolution.mode,
            recipients = resolution.recipients.len(),
            tokens = batch.len(),
            dry_run,
            "Task event resolved"
        );

        let mut report = DispatchReport {
            ok: true,
            task_id: task.id.clone(),
            mode: ReportMode::Sent,
            resolution: resolution.mode,
            recipients: resolution.recipients.len(),
            tokens_tried: batch.len(),
            sent: 0,
            failed: 0,
            stale_tokens_removed: 0,
            location: None,
            info: None,
        };

        if dry_run {
            report.mode = ReportMode::Debug;
            report.location = Some(located.path());
            return Ok(report);
        }

        if batch.is_empty() {
            report.mode = ReportMode::NoTokens;
            report.info = Some("no tokens".to_string());
            return Ok(report);
        }

        let message = build_message(event, task, &self.payload);
        let result = self.dispatcher.dispatch(&batch, &message).await?;

        let cleanup: CleanupSummary = if result.failure_count > 0 {
            self.reconciler
                .reconcile(&batch, &result.outcomes, self.users.as_ref())
                .await
        } else {
            CleanupSummary::default()
        };

        report.sent = result.success_count;
        report.failed = result.failure_count;
        report.stale_tokens_removed = cleanup.tokens_removed;
        Ok(report)
    }
}
