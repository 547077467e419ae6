//! HTTP surface for task notifications.
//!
//! Endpoints:
//! - GET|POST /api/notify-task-created: notify assignees or pickup-eligible staff
//! - GET|POST /api/notify-task-finished: notify managers
//! - GET /health

pub mod routes;
pub mod state;
