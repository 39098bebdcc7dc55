//! Server initialization and startup logic for Chronix.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chronix_api::{ApiConfig, ApiServer, AppState};
use chronix_config::{Config, ConfigValidator, LoggingConfig};
use chronix_core::{HandlerRegistry, SchedulerService, SqliteTaskStore};
use chronix_reminder::{mailer_from_config, register_all};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initialize tracing with console and file output.
///
/// Log files rotate daily under the configured directory.
pub(crate) fn init_tracing(config: &LoggingConfig) -> Result<(), BoxError> {
    let log_dir = config.resolved_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("chronix")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop; keep it for the process lifetime.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(config.json.then(|| fmt::layer().json()))
        .with((!config.json).then(|| fmt::layer().with_target(true).with_ansi(true)))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Build the scheduler service from configuration.
pub(crate) async fn build_service(config: &Config) -> Result<SchedulerService, BoxError> {
    let mut registry = HandlerRegistry::new();
    let mailer = mailer_from_config(&config.reminder)?;
    register_all(&mut registry, &config.reminder, mailer)?;

    let builder = SchedulerService::builder()
        .registry(registry)
        .dispatcher_config(config.dispatcher.clone())
        .worker_config(config.workers.clone());

    let builder = if config.database.in_memory {
        warn!("Using in-memory task store; scheduled tasks will not survive a restart");
        builder
    } else {
        let path = config.database.resolved_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        builder.store(Arc::new(SqliteTaskStore::open(&path).await?))
    };

    Ok(builder.build())
}

/// Run the scheduler and HTTP server until a shutdown signal arrives.
pub(crate) async fn run_server(config: Config) -> Result<(), BoxError> {
    for warning in ConfigValidator::validate(&config).into_result()? {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    let service = Arc::new(build_service(&config).await?);
    let running = service.start();

    let server = ApiServer::new(
        ApiConfig::new(config.server.host.clone(), config.server.port),
        Arc::new(AppState::new(service.clone())),
    );
    let served = match server.bind().await {
        Ok(listener) => server.serve(listener, shutdown_signal()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &served {
        error!("API server error: {}", e);
    }

    // The HTTP server is down; stop scheduling before exiting either way.
    if !running.shutdown().await {
        warn!("Shutdown timed out; unfinished tasks will be reclaimed after their lease expires");
    }
    info!("Chronix stopped");
    served
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
