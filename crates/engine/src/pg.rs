//! PostgreSQL-backed task store and user directory.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use sqlx::PgPool;

use taskbell_common::error::AppError;
use taskbell_common::types::{LocatedTask, TaskLocation, TaskRecord, UserRecord};

use crate::store::{TaskRef, TaskStore, UserDirectory, UserQuery};

const TASK_COLUMNS: &str =
    "id, title, comment, created_by, assignee_ids, assignee_names, taken_by_name";

const USER_COLUMNS: &str = "id, role, pickup_opt_in, fcm_tokens";

/// Tasks in the `tasks` table, falling back to `archived_tasks`.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
    lookback_days: u32,
}

impl PgTaskStore {
    pub fn new(pool: PgPool, lookback_days: u32) -> Self {
        Self {
            pool,
            lookback_days,
        }
    }

    async fn find_live(&self, id: &str) -> Result<Option<TaskRecord>, AppError> {
        let task: Option<TaskRecord> = sqlx::query_as(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn find_archived_on(&self, day: NaiveDate, id: &str) -> Result<Option<TaskRecord>, AppError> {
        let task: Option<TaskRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM archived_tasks WHERE archive_day = $1 AND id = $2",
            TASK_COLUMNS
        ))
        .bind(day)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    /// Most recent archived copy within the lookback window.
    async fn find_latest_archived(&self, id: &str) -> Result<Option<(NaiveDate, TaskRecord)>, AppError> {
        let today = Utc::now().date_naive();
        let oldest = today
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(NaiveDate::MIN);

        let row: Option<(NaiveDate,)> = sqlx::query_as(
            r#"
            SELECT archive_day
            FROM archived_tasks
            WHERE id = $1 AND archive_day BETWEEN $2 AND $3
            ORDER BY archive_day DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .bind(oldest)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((day,)) => Ok(self.find_archived_on(day, id).await?.map(|t| (day, t))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn get_task(&self, task: &TaskRef) -> Result<Option<LocatedTask>, AppError> {
        if let TaskRef::Archived { day, id } = task
            && let Some(record) = self.find_archived_on(*day, id).await?
        {
            return Ok(Some(LocatedTask {
                record,
                location: TaskLocation::Archive(*day),
            }));
        }

        if let Some(record) = self.find_live(task.id()).await? {
            return Ok(Some(LocatedTask {
                record,
                location: TaskLocation::Primary,
            }));
        }

        let archived = self.find_latest_archived(task.id()).await?;
        if archived.is_none() {
            tracing::debug!(
                task_id = %task.id(),
                lookback_days = self.lookback_days,
                "Task not found in live table or archives"
            );
        }

        Ok(archived.map(|(day, record)| LocatedTask {
            record,
            location: TaskLocation::Archive(day),
        }))
    }
}

/// Users in the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        let user: Option<UserRecord> = sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn users_where(&self, query: UserQuery) -> Result<Vec<UserRecord>, AppError> {
        let filter = match query {
            UserQuery::All => "TRUE",
            UserQuery::OptedIntoPickup => "pickup_opt_in = TRUE",
        };

        let users: Vec<UserRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE {} ORDER BY created_at, id",
            USER_COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn remove_tokens(&self, user_id: &str, tokens: &[String]) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET fcm_tokens = ARRAY(
                    SELECT t FROM unnest(fcm_tokens) AS t WHERE NOT (t = ANY($2))
                ),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(tokens)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }

        tracing::info!(user_id = %user_id, removed = tokens.len(), "Removed stale push tokens");
        Ok(())
    }
}
