//! In-process task store and user directory.
//!
//! Used by tests and local demos. Users are kept in insertion order so query
//! results are deterministic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use indexmap::IndexMap;

use taskbell_common::error::AppError;
use taskbell_common::types::{LocatedTask, TaskLocation, TaskRecord, UserRecord};

use crate::store::{TaskRef, TaskStore, UserDirectory, UserQuery};

/// Default archive lookback, matching the PostgreSQL store.
const DEFAULT_LOOKBACK_DAYS: u32 = 60;

#[derive(Default)]
struct TaskTables {
    live: HashMap<String, TaskRecord>,
    archives: BTreeMap<NaiveDate, HashMap<String, TaskRecord>>,
}

/// Tasks held in memory, with dated archive partitions.
pub struct InMemoryTaskStore {
    tables: Mutex<TaskTables>,
    lookback_days: u32,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(TaskTables::default()),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn insert(&self, task: TaskRecord) {
        let mut tables = lock(&self.tables);
        tables.live.insert(task.id.clone(), task);
    }

    pub fn insert_archived(&self, day: NaiveDate, task: TaskRecord) {
        let mut tables = lock(&self.tables);
        tables
            .archives
            .entry(day)
            .or_default()
            .insert(task.id.clone(), task);
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, task: &TaskRef) -> Result<Option<LocatedTask>, AppError> {
        let tables = lock(&self.tables);

        if let TaskRef::Archived { day, id } = task
            && let Some(record) = tables.archives.get(day).and_then(|p| p.get(id))
        {
            return Ok(Some(LocatedTask {
                record: record.clone(),
                location: TaskLocation::Archive(*day),
            }));
        }

        let id = task.id();
        if let Some(record) = tables.live.get(id) {
            return Ok(Some(LocatedTask {
                record: record.clone(),
                location: TaskLocation::Primary,
            }));
        }

        let today = Utc::now().date_naive();
        let oldest = today
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(NaiveDate::MIN);

        // Newest partition first.
        let found = tables
            .archives
            .range(oldest..=today)
            .rev()
            .find_map(|(day, partition)| partition.get(id).map(|r| (*day, r.clone())));

        Ok(found.map(|(day, record)| LocatedTask {
            record,
            location: TaskLocation::Archive(day),
        }))
    }
}

/// Users held in memory. Records every token removal for assertions.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<IndexMap<String, UserRecord>>,
    failing_removals: Mutex<Vec<String>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        lock(&self.users).insert(user.id.clone(), user);
    }

    /// Make `remove_tokens` fail for this user, to exercise best-effort cleanup.
    pub fn fail_removals_for(&self, user_id: &str) {
        lock(&self.failing_removals).push(user_id.to_string());
    }

    pub fn tokens_of(&self, user_id: &str) -> Vec<String> {
        lock(&self.users)
            .get(user_id)
            .map(|u| u.fcm_tokens.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(lock(&self.users).get(user_id).cloned())
    }

    async fn users_where(&self, query: UserQuery) -> Result<Vec<UserRecord>, AppError> {
        let users = lock(&self.users);
        Ok(users
            .values()
            .filter(|u| match query {
                UserQuery::All => true,
                UserQuery::OptedIntoPickup => u.pickup_opt_in,
            })
            .cloned()
            .collect())
    }

    async fn remove_tokens(&self, user_id: &str, tokens: &[String]) -> Result<(), AppError> {
        if lock(&self.failing_removals).iter().any(|id| id == user_id) {
            return Err(AppError::Internal(format!(
                "token update rejected for user {}",
                user_id
            )));
        }

        let mut users = lock(&self.users);
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        user.fcm_tokens.retain(|t| !tokens.contains(t));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
