//! Shared application state for the Axum API server.

use std::sync::Arc;

use taskbell_engine::NotificationService;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub notifications: Arc<NotificationService>,
}

impl AppState {
    pub fn new(notifications: NotificationService) -> Self {
        Self {
            notifications: Arc::new(notifications),
        }
    }
}
