pub mod dispatch;
pub mod memory;
pub mod payload;
pub mod pg;
pub mod recipients;
pub mod reconcile;
pub mod role;
pub mod service;
pub mod store;
pub mod tokens;

pub use service::{DispatchReport, NotificationService, ReportMode, ServiceSettings};
