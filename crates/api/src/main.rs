use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worktrace_api::config::ServerConfig;
use worktrace_api::router::build_app_router;
use worktrace_api::state::AppState;
use worktrace_db::PgSessionStore;
use worktrace_pipeline::scheduler::{self, SchedulerConfig};
use worktrace_pipeline::{analyzer, Aggregator, AggregatorOptions, AnalyzerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "worktrace_api=debug,worktrace_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = worktrace_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    worktrace_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    worktrace_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Aggregation pipeline ---
    let store = Arc::new(PgSessionStore::new(pool));
    let analyzer_config = AnalyzerConfig::from_env();
    let analyzer =
        analyzer::from_config(&analyzer_config).expect("Failed to build analyzer client");
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        analyzer,
        AggregatorOptions::from_env(&analyzer_config),
    ));

    // Optional in-process scheduler (normally run by worktrace-worker).
    let scheduler_cancel = CancellationToken::new();
    let scheduler_handle = config.embedded_scheduler.then(|| {
        tracing::info!("Starting embedded aggregation scheduler");
        tokio::spawn(scheduler::run(
            Arc::clone(&aggregator),
            SchedulerConfig::from_env(),
            scheduler_cancel.clone(),
        ))
    });

    // --- App state ---
    let state = AppState {
        store,
        aggregator,
        config: Arc::new(config.clone()),
        shutdown: scheduler_cancel.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    scheduler_cancel.cancel();
    if let Some(handle) = scheduler_handle {
        let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        tracing::info!("Aggregation scheduler stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
