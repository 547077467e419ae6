//! TaskBell API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use taskbell_common::config::AppConfig;
use taskbell_common::db;
use taskbell_engine::pg::{PgTaskStore, PgUserDirectory};
use taskbell_engine::{NotificationService, ServiceSettings};
use taskbell_notifier::FcmClient;
use taskbell_notifier::auth::ServiceAccount;

use taskbell_api::routes::create_router;
use taskbell_api::state::AppState;

/// Event payloads are a task id and a handful of user ids.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "taskbell_api=debug,taskbell_engine=debug,taskbell_notifier=info,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting TaskBell API server...");

    // Load configuration; missing credentials stop the process here
    let config = AppConfig::from_env()?;
    let account = ServiceAccount::from_json(&config.firebase_service_account)?;
    tracing::info!(project_id = %account.project_id, "Loaded Firebase service account");

    let push = FcmClient::new(account, config.fcm_access_token.clone())?
        .with_concurrency(config.push_concurrency);

    // Connect to PostgreSQL and apply migrations
    let pool = db::connect(&config.database_url, config.db_max_connections).await?;

    // Build application state
    let service = NotificationService::new(
        Arc::new(PgTaskStore::new(pool.clone(), config.archive_lookback_days)),
        Arc::new(PgUserDirectory::new(pool)),
        Arc::new(push),
        ServiceSettings::from_config(&config),
    );
    let state = AppState::new(service);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|_| anyhow::anyhow!("BIND_ADDR must be a socket address, got '{}'", config.bind_addr))?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    Ok(())
}
