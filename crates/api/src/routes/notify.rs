//! Task event notification routes.
//!
//! Both endpoints accept the task id either in a JSON body or in the query
//! string, so they can be called from app code as well as from curl.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use taskbell_common::config::parse_bool;
use taskbell_common::error::AppError;
use taskbell_common::types::{AssigneeIds, TaskEvent};
use taskbell_engine::DispatchReport;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notify-task-created",
            get(task_created).post(task_created),
        )
        .route(
            "/api/notify-task-finished",
            get(task_finished).post(task_finished),
        )
}

/// JSON body accepted by both endpoints.
///
/// The task id may arrive under any of three spellings, several at once;
/// the first non-blank one wins.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default, rename = "taskid")]
    pub task_id_lower: Option<String>,
    #[serde(default, rename = "taskID")]
    pub task_id_upper: Option<String>,
    /// Comma-joined string or array
    #[serde(default)]
    pub assignee_ids: Option<AssigneeIds>,
}

impl NotifyBody {
    fn task_id(&self) -> Option<&str> {
        first_non_blank([&self.task_id, &self.task_id_lower, &self.task_id_upper])
    }
}

/// Query parameters accepted by both endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyQuery {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default, rename = "taskid")]
    pub task_id_lower: Option<String>,
    #[serde(default, rename = "taskID")]
    pub task_id_upper: Option<String>,
    /// Comma-joined
    #[serde(default)]
    pub assignee_ids: Option<String>,
    /// `1` resolves recipients and tokens without sending
    #[serde(default)]
    pub debug: Option<String>,
}

impl NotifyQuery {
    fn task_id(&self) -> Option<&str> {
        first_non_blank([&self.task_id, &self.task_id_lower, &self.task_id_upper])
    }

    fn is_debug(&self) -> bool {
        self.debug.as_deref().and_then(parse_bool).unwrap_or(false)
    }
}

fn first_non_blank<'a, const N: usize>(candidates: [&'a Option<String>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|id| !id.is_empty())
}

/// Unwrap the query extractor, keeping rejections in the JSON error shape.
fn parse_query(query: Result<Query<NotifyQuery>, QueryRejection>) -> Result<NotifyQuery, AppError> {
    query
        .map(|Query(query)| query)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Parse the request body. An empty body is allowed; the query may carry the id.
fn parse_body(body: &Bytes) -> Result<NotifyBody, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(NotifyBody::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Task id from the body, falling back to the query string.
fn task_id(body: &NotifyBody, query: &NotifyQuery) -> Result<String, AppError> {
    body.task_id()
        .or_else(|| query.task_id())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("Missing taskId".to_string()))
}

/// GET|POST /api/notify-task-created: Notify assignees, or pickup-eligible staff.
async fn task_created(
    State(state): State<AppState>,
    query: Result<Query<NotifyQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<DispatchReport>, AppError> {
    let query = parse_query(query)?;
    let body = parse_body(&body)?;
    let task_id = task_id(&body, &query)?;

    let assignee_ids = body
        .assignee_ids
        .or_else(|| query.assignee_ids.as_deref().map(AssigneeIds::parse_joined))
        .map(AssigneeIds::into_inner)
        .filter(|ids| !ids.is_empty());

    let event = TaskEvent::TaskCreated {
        task_id,
        assignee_ids,
    };
    run(&state, &event, query.is_debug()).await
}

/// GET|POST /api/notify-task-finished: Notify managers that a task is done.
async fn task_finished(
    State(state): State<AppState>,
    query: Result<Query<NotifyQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<DispatchReport>, AppError> {
    let query = parse_query(query)?;
    let body = parse_body(&body)?;
    let event = TaskEvent::TaskFinished {
        task_id: task_id(&body, &query)?,
    };
    run(&state, &event, query.is_debug()).await
}

async fn run(state: &AppState, event: &TaskEvent, debug: bool) -> Result<Json<DispatchReport>, AppError> {
    let report = if debug {
        state.notifications.preview(event).await?
    } else {
        state.notifications.handle(event).await?
    };
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_task_id_aliases() {
        let body = parse_body(&Bytes::from_static(br#"{"taskID":" T1 "}"#)).unwrap();
        assert_eq!(task_id(&body, &NotifyQuery::default()).unwrap(), "T1");
    }

    #[test]
    fn test_query_fallback_and_missing_id() {
        let body = parse_body(&Bytes::new()).unwrap();
        let query = NotifyQuery {
            task_id: Some("T2".to_string()),
            ..Default::default()
        };
        assert_eq!(task_id(&body, &query).unwrap(), "T2");
        assert!(matches!(
            task_id(&body, &NotifyQuery::default()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_body_with_several_id_spellings() {
        let body = parse_body(&Bytes::from_static(br#"{"taskId":"  ","taskid":"T1","taskID":"T9"}"#)).unwrap();
        assert_eq!(task_id(&body, &NotifyQuery::default()).unwrap(), "T1");
    }

    #[test]
    fn test_blank_body_id_falls_back_to_query() {
        let body = parse_body(&Bytes::from_static(br#"{"taskId":""}"#)).unwrap();
        let query = NotifyQuery {
            task_id: Some("T3".to_string()),
            ..Default::default()
        };
        assert_eq!(task_id(&body, &query).unwrap(), "T3");
    }

    #[test]
    fn test_malformed_body_is_bad_request() {
        assert!(matches!(
            parse_body(&Bytes::from_static(b"{taskId:")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_debug_flag() {
        let query = NotifyQuery {
            debug: Some("1".to_string()),
            ..Default::default()
        };
        assert!(query.is_debug());
        assert!(!NotifyQuery::default().is_debug());
    }
}
