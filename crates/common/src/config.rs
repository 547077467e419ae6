use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Firebase service account JSON (the whole document, as downloaded)
    pub firebase_service_account: String,

    /// Static FCM bearer token; skips the service-account JWT grant when set
    pub fcm_access_token: Option<String>,

    /// Socket address the API server binds to
    pub bind_addr: String,

    /// How many dated archive partitions to search for a missing task (default: 60)
    pub archive_lookback_days: u32,

    /// Whether users with the Head role receive pickup broadcasts (default: true)
    pub pickup_include_head: bool,

    /// Android notification channel id attached to every push
    pub push_android_channel: String,

    /// Click target the mobile client routes on
    pub push_click_action: String,

    /// Maximum in-flight FCM send requests per multicast (default: 16)
    pub push_concurrency: usize,

    /// Maximum in-flight user directory lookups during token aggregation (default: 8)
    pub lookup_concurrency: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Missing delivery credentials are fatal here, at startup, rather than
    /// surfacing on the first request.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            firebase_service_account: std::env::var("FIREBASE_SERVICE_ACCOUNT").map_err(|_| {
                anyhow::anyhow!("FIREBASE_SERVICE_ACCOUNT environment variable is required")
            })?,
            fcm_access_token: std::env::var("FCM_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            archive_lookback_days: parse_var("ARCHIVE_LOOKBACK_DAYS", "60")?,
            pickup_include_head: parse_flag("PICKUP_INCLUDE_HEAD", true)?,
            push_android_channel: std::env::var("PUSH_ANDROID_CHANNEL")
                .unwrap_or_else(|_| "tasks".to_string()),
            push_click_action: std::env::var("PUSH_CLICK_ACTION")
                .unwrap_or_else(|_| "OPEN_TASK".to_string()),
            push_concurrency: parse_var("PUSH_CONCURRENCY", "16")?,
            lookup_concurrency: parse_var("LOOKUP_CONCURRENCY", "8")?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        })
}

fn parse_flag(name: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| anyhow::anyhow!("{} must be one of true/false/1/0/yes/no", name)),
    }
}

/// Accepts the usual spellings of a boolean environment flag.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
