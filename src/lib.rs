pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod notifier;
pub mod registry;
pub mod seed;
pub mod service;
pub mod tree;

use crate::api::AppState;
use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::notifier::Notifier;
use crate::service::PromptService;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Opens the store, seeds it when empty, and serves the API until ctrl-c.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    if config.api_key.is_none() && config.is_production() {
        tracing::warn!("API_KEY is not set; the API is open to every client");
    }

    let db = Arc::new(Database::new(&config.database_path)?);
    tracing::info!(path = %db.path().display(), "database opened");
    if config.seed_on_empty {
        seed::seed_if_empty(&db)?;
    }

    let notifier = Notifier::new(config.event_queue_capacity);
    let service = PromptService::new(db, notifier.clone());
    let addr = config.bind_address();
    let environment = config.environment.clone();
    let app = api::router(AppState::new(service, config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = %environment, "prompt tree api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(notifier))
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(notifier: Notifier) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown requested");
    notifier.close_all();
}

/// Installs the global subscriber. `RUST_LOG` filters (default `info`),
/// `LOG_FORMAT=json` switches to JSON lines, and `LOG_DIR` sends output to a
/// daily rolling file instead of stdout.
pub fn init_tracing() -> AppResult<()> {
    let writer = match std::env::var_os("LOG_DIR").filter(|dir| !dir.is_empty()) {
        Some(dir) => {
            let log_dir = PathBuf::from(dir);
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "prompt-tree-api.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);
            BoxMakeWriter::new(non_blocking)
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|error| AppError::Config(format!("failed to initialize tracing: {}", error)))
}
