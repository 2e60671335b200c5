//! Periodic aggregation sweeps.
//!
//! [`run`] is a long-running loop intended to be spawned via `tokio::spawn`
//! and stopped through its [`CancellationToken`]. Every tick sweeps all
//! employees with pending samples (live trailing windows are deferred), then
//! retries enrichment for a bounded batch of degraded sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use worktrace_core::access::SweepScope;

use crate::aggregator::Aggregator;

/// Default interval between sweeps.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Default number of degraded sessions retried per tick.
pub const DEFAULT_DEGRADED_RETRY_LIMIT: i64 = 50;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub degraded_retry_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            degraded_retry_limit: DEFAULT_DEGRADED_RETRY_LIMIT,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `AGGREGATION_INTERVAL_SECS` | `300`   |
    /// | `DEGRADED_RETRY_LIMIT`      | `50`    |
    pub fn from_env() -> Self {
        let interval_secs: u64 = std::env::var("AGGREGATION_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_INTERVAL_SECS.to_string())
            .parse()
            .expect("AGGREGATION_INTERVAL_SECS must be a valid u64");

        let degraded_retry_limit: i64 = std::env::var("DEGRADED_RETRY_LIMIT")
            .unwrap_or_else(|_| DEFAULT_DEGRADED_RETRY_LIMIT.to_string())
            .parse()
            .expect("DEGRADED_RETRY_LIMIT must be a valid i64");

        Self {
            interval: Duration::from_secs(interval_secs.max(1)),
            degraded_retry_limit,
        }
    }
}

/// Run one sweep followed by a degraded-analysis retry batch.
pub async fn tick(aggregator: &Aggregator, config: &SchedulerConfig, cancel: &CancellationToken) {
    match aggregator
        .process_all_pending(SweepScope::All, false, cancel)
        .await
    {
        Ok(report) => {
            let changed = report.sessions_created() + report.sessions_updated();
            if changed > 0 || report.failures() > 0 {
                tracing::info!(
                    employees = report.employees.len(),
                    sessions_created = report.sessions_created(),
                    sessions_updated = report.sessions_updated(),
                    failures = report.failures(),
                    "Scheduled aggregation complete"
                );
            } else {
                tracing::debug!("Scheduled aggregation: nothing to do");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduled aggregation failed");
        }
    }

    if cancel.is_cancelled() || config.degraded_retry_limit <= 0 {
        return;
    }
    match aggregator.retry_degraded(config.degraded_retry_limit).await {
        Ok(retry) if retry.attempted > 0 => {
            tracing::info!(
                attempted = retry.attempted,
                recovered = retry.recovered,
                "Degraded analysis retry complete"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "Degraded analysis retry failed");
        }
    }
}

/// Run the scheduler loop until `cancel` is triggered.
pub async fn run(aggregator: Arc<Aggregator>, config: SchedulerConfig, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Aggregation scheduler started"
    );

    let mut interval = tokio::time::interval(config.interval);
    // A slow sweep must not trigger a burst of catch-up sweeps.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Aggregation scheduler stopping");
                break;
            }
            _ = interval.tick() => {
                tick(&aggregator, &config, &cancel).await;
            }
        }
    }
}
