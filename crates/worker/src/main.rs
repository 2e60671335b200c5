//! Aggregation scheduler process.
//!
//! Runs periodic sweeps over every employee with pending samples until
//! SIGINT/SIGTERM. Pass `--once` to run a single sweep and exit.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worktrace_db::PgSessionStore;
use worktrace_pipeline::scheduler::{self, SchedulerConfig};
use worktrace_pipeline::{analyzer, Aggregator, AggregatorOptions, AnalyzerConfig};

/// How long an in-flight sweep may take to wind down after a signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worktrace_worker=debug,worktrace_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = worktrace_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    worktrace_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    worktrace_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    // --- Pipeline ---
    let store = Arc::new(PgSessionStore::new(pool));
    let analyzer_config = AnalyzerConfig::from_env();
    let analyzer =
        analyzer::from_config(&analyzer_config).expect("Failed to build analyzer client");
    let options = AggregatorOptions::from_env(&analyzer_config);
    tracing::info!(
        concurrency = options.concurrency,
        claim_ttl_secs = options.claim_ttl.num_seconds(),
        "Aggregator configured"
    );
    let aggregator = Arc::new(Aggregator::new(store, analyzer, options));
    let config = SchedulerConfig::from_env();

    let cancel = CancellationToken::new();

    if run_once {
        tracing::info!("Running a single aggregation sweep");
        scheduler::tick(&aggregator, &config, &cancel).await;
        return;
    }

    let handle = tokio::spawn(scheduler::run(
        Arc::clone(&aggregator),
        config,
        cancel.clone(),
    ));

    shutdown_signal().await;
    cancel.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(_) => tracing::info!("Worker stopped"),
        Err(_) => tracing::warn!("Scheduler did not stop within the grace period"),
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM (on Unix).
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
            tracing::info!("Received SIGINT (Ctrl-C), stopping scheduler");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping scheduler");
        }
    }
}
