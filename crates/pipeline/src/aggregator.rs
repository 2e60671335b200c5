//! Incremental, idempotent aggregation of pending samples into sessions.
//!
//! One run per employee:
//!
//! 1. take the per-employee claim (a concurrent run exits with a skip),
//! 2. load runtime settings and the employee's pending samples,
//! 3. quarantine malformed and late samples,
//! 4. if the latest session is still `open`, pull its samples back in,
//! 5. window everything and defer a still-live trailing group unless flushing,
//! 6. for each group: synthesize metrics, enrich, and write the session
//!    atomically with its sample transitions (the group holding the open
//!    session's samples rewrites that session in place),
//! 7. release the claim.
//!
//! A write failure stops the employee's run. Later groups stay pending and
//! the next run regroups the same set identically.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use worktrace_core::access::SweepScope;
use worktrace_core::analytics::{screenshot_records, synthesize, SessionSignals};
use worktrace_core::samples::{QuarantineReason, RawSample, SampleRef};
use worktrace_core::session::{NewSession, Session, SessionStatus};
use worktrace_core::settings::AggregationSettings;
use worktrace_core::store::{SessionStore, StoreError, WriteOutcome};
use worktrace_core::types::{DbId, TimeRange, Timestamp};
use worktrace_core::windowing::{drop_late, window, SampleGroup, Watermark};

use crate::analyzer::{enrich, AnalyzerConfig, SessionAnalyzer, DEFAULT_ANALYZER_TIMEOUT_SECS};
use crate::error::PipelineError;

/// Default number of employees aggregated in parallel.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default lifetime of a per-employee claim.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 600;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tuning knobs for the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Employees processed concurrently during a sweep.
    pub concurrency: usize,
    /// How long a claim survives a crashed run.
    pub claim_ttl: TimeDelta,
    /// Bound on each analyzer call.
    pub analyzer_timeout: Duration,
    /// Settings used when none have been persisted yet.
    pub default_settings: AggregationSettings,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            claim_ttl: TimeDelta::seconds(DEFAULT_CLAIM_TTL_SECS),
            analyzer_timeout: Duration::from_secs(DEFAULT_ANALYZER_TIMEOUT_SECS),
            default_settings: AggregationSettings::default(),
        }
    }
}

impl AggregatorOptions {
    /// Load options from environment variables.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `AGGREGATION_CONCURRENCY` | `4`     |
    /// | `CLAIM_TTL_SECS`          | `600`   |
    ///
    /// The analyzer timeout is taken from `analyzer` so the client timeout
    /// and the enrichment bound agree. Threshold defaults come from
    /// [`AggregationSettings::from_env`].
    pub fn from_env(analyzer: &AnalyzerConfig) -> Self {
        let concurrency: usize = std::env::var("AGGREGATION_CONCURRENCY")
            .unwrap_or_else(|_| DEFAULT_CONCURRENCY.to_string())
            .parse()
            .expect("AGGREGATION_CONCURRENCY must be a valid usize");

        let claim_ttl_secs: i64 = std::env::var("CLAIM_TTL_SECS")
            .unwrap_or_else(|_| DEFAULT_CLAIM_TTL_SECS.to_string())
            .parse()
            .expect("CLAIM_TTL_SECS must be a valid i64");

        Self {
            concurrency: concurrency.max(1),
            claim_ttl: TimeDelta::seconds(claim_ttl_secs.max(1)),
            analyzer_timeout: analyzer.timeout,
            default_settings: AggregationSettings::from_env(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How an employee's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Another run held the employee's claim.
    Skipped,
    /// The run stopped early; remaining samples stay pending.
    Failed,
}

/// Result of aggregating one employee.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRun {
    pub employee_id: DbId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sessions inserted by this run.
    pub sessions: Vec<Session>,
    /// Open sessions this run extended or closed.
    pub updated: Vec<Session>,
    pub quarantined: usize,
    pub late: usize,
    /// Samples left pending in a live trailing group.
    pub deferred: usize,
}

impl EmployeeRun {
    fn new(employee_id: DbId, status: RunStatus) -> Self {
        Self {
            employee_id,
            status,
            error: None,
            sessions: Vec::new(),
            updated: Vec::new(),
            quarantined: 0,
            late: 0,
            deferred: 0,
        }
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.len()
    }

    fn failed(employee_id: DbId, error: String) -> Self {
        let mut run = Self::new(employee_id, RunStatus::Failed);
        run.error = Some(error);
        run
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Result of a multi-employee sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub employees: Vec<EmployeeRun>,
    /// Set when cancellation stopped the sweep before every employee ran.
    pub cancelled: bool,
}

impl SweepReport {
    pub fn sessions_created(&self) -> usize {
        self.employees.iter().map(EmployeeRun::sessions_created).sum()
    }

    pub fn sessions_updated(&self) -> usize {
        self.employees.iter().map(|r| r.updated.len()).sum()
    }

    pub fn failures(&self) -> usize {
        self.employees.iter().filter(|r| r.is_failed()).count()
    }
}

/// Result of re-running enrichment on degraded sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
    pub attempted: usize,
    pub recovered: usize,
}

// ---------------------------------------------------------------------------
// Claim guard
// ---------------------------------------------------------------------------

/// Releases a per-employee claim even if the run's future is dropped.
struct ClaimGuard {
    store: Arc<dyn SessionStore>,
    employee_id: DbId,
    run_id: Uuid,
    armed: bool,
}

impl ClaimGuard {
    fn new(store: Arc<dyn SessionStore>, employee_id: DbId, run_id: Uuid) -> Self {
        Self {
            store,
            employee_id,
            run_id,
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        release_claim(self.store.as_ref(), self.employee_id, self.run_id).await;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            employee_id = self.employee_id,
            run_id = %self.run_id,
            "Aggregation run dropped before completion, releasing claim"
        );
        // Without a runtime the lease simply expires.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.store);
            let (employee_id, run_id) = (self.employee_id, self.run_id);
            handle.spawn(async move {
                release_claim(store.as_ref(), employee_id, run_id).await;
            });
        }
    }
}

async fn release_claim(store: &dyn SessionStore, employee_id: DbId, run_id: Uuid) {
    if let Err(e) = store.release_claim(employee_id, run_id).await {
        // The lease expires on its own; only log.
        tracing::error!(employee_id, %run_id, error = %e, "Failed to release aggregation claim");
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Turns pending samples into persisted sessions.
///
/// Cheap to share behind an `Arc`; holds no per-run state.
pub struct Aggregator {
    store: Arc<dyn SessionStore>,
    analyzer: Arc<dyn SessionAnalyzer>,
    options: AggregatorOptions,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        analyzer: Arc<dyn SessionAnalyzer>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            store,
            analyzer,
            options,
        }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    /// Settings for the next run: the persisted row, or the defaults.
    pub async fn current_settings(&self) -> Result<AggregationSettings, PipelineError> {
        Ok(self
            .store
            .load_settings()
            .await?
            .unwrap_or_else(|| self.options.default_settings.clone()))
    }

    /// Aggregate one employee's pending samples inside `range`.
    ///
    /// With `flush` a live trailing group is written as an `open` session
    /// instead of being deferred.
    pub async fn process_pending(
        &self,
        employee_id: DbId,
        range: TimeRange,
        flush: bool,
    ) -> Result<EmployeeRun, PipelineError> {
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if start >= end {
                return Err(PipelineError::InvalidRange(
                    "startTime must be before endTime".into(),
                ));
            }
        }

        let run_id = Uuid::new_v4();
        if !self
            .store
            .try_claim(employee_id, run_id, self.options.claim_ttl)
            .await?
        {
            tracing::info!(employee_id, "Aggregation already running for employee, skipping");
            return Ok(EmployeeRun::new(employee_id, RunStatus::Skipped));
        }
        let claim = ClaimGuard::new(Arc::clone(&self.store), employee_id, run_id);

        let result = self.run_claimed(employee_id, range, flush, run_id).await;

        claim.release().await;
        result
    }

    async fn run_claimed(
        &self,
        employee_id: DbId,
        range: TimeRange,
        flush: bool,
        run_id: Uuid,
    ) -> Result<EmployeeRun, PipelineError> {
        let settings = self.current_settings().await?;
        let mut run = EmployeeRun::new(employee_id, RunStatus::Completed);

        let latest = self.store.latest_session(employee_id).await?;
        let mut reopened = latest.as_ref().filter(|s| s.status == SessionStatus::Open);

        let pending = self.store.pending_samples(employee_id, range).await?;
        if pending.is_empty() && reopened.is_none() {
            tracing::debug!(employee_id, %run_id, "No pending samples");
            return Ok(run);
        }

        let samples = self.quarantine_malformed(employee_id, pending, &mut run).await?;

        let watermark = latest.as_ref().map(|s| match s.status {
            SessionStatus::Open => Watermark::OpenFrom(s.session_start),
            SessionStatus::Closed => Watermark::ClosedAt(s.session_end),
        });
        let (mut samples, late) = drop_late(samples, watermark);
        if !late.is_empty() {
            tracing::warn!(
                employee_id,
                count = late.len(),
                watermark = ?watermark,
                "Dropping samples older than the latest session"
            );
            self.quarantine_late(&late, &mut run).await?;
        }

        let mut open_refs = BTreeSet::new();
        if let Some(open) = reopened {
            let linked = self.store.session_samples(open.id).await?;
            open_refs = linked.iter().map(RawSample::sample_ref).collect();
            tracing::debug!(
                employee_id,
                session_id = open.id,
                samples = linked.len(),
                "Re-windowing open session"
            );
            samples.extend(linked);
        }

        let mut groups = window(samples, &settings);
        let now = Utc::now();
        let trailing_live = groups
            .last()
            .is_some_and(|g| g.is_live(now, &settings));
        if trailing_live && !flush {
            if let Some(live) = groups.pop() {
                run.deferred = live
                    .samples
                    .iter()
                    .filter(|s| !open_refs.contains(&s.sample_ref()))
                    .count();
                tracing::debug!(employee_id, deferred = run.deferred, "Deferring live trailing window");
            }
        }

        let last = groups.len().saturating_sub(1);
        for (i, group) in groups.iter().enumerate() {
            let status = if trailing_live && flush && i == last {
                SessionStatus::Open
            } else {
                SessionStatus::Closed
            };

            // Only the first group holding open-session samples keeps its id.
            // Any of its samples regrouped later were released by that rewrite.
            let extends_open = group
                .samples
                .iter()
                .any(|s| open_refs.contains(&s.sample_ref()));
            let target = if extends_open { reopened.take() } else { None };
            let written = match target {
                Some(open) => {
                    self.extend_open(open, group, status, &open_refs, &settings, &mut run)
                        .await
                }
                None => self.create(employee_id, group, status, &settings, &mut run).await,
            };

            if let Err(e) = written {
                tracing::error!(
                    employee_id,
                    %run_id,
                    error = %e,
                    "Session write failed, stopping run for employee"
                );
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
                break;
            }
        }

        Ok(run)
    }

    /// Persist a group as a new session.
    async fn create(
        &self,
        employee_id: DbId,
        group: &SampleGroup,
        status: SessionStatus,
        settings: &AggregationSettings,
        run: &mut EmployeeRun,
    ) -> Result<(), StoreError> {
        let session = self.build_session(employee_id, group, status, settings).await;

        match self.store.write_session(&session, &group.sample_refs()).await? {
            WriteOutcome::Created(saved) => {
                tracing::info!(
                    employee_id,
                    session_id = saved.id,
                    samples = group.samples.len(),
                    degraded = saved.analysis_degraded,
                    "Session created"
                );
                run.sessions.push(saved);
            }
            WriteOutcome::WindowTaken(existing) => {
                // The key belongs to a session these samples were never part of.
                tracing::warn!(
                    employee_id,
                    session_id = existing.id,
                    count = group.samples.len(),
                    "Window already taken, quarantining samples as late"
                );
                self.quarantine_late(&group.samples, run).await?;
            }
        }
        Ok(())
    }

    /// Rewrite the employee's open session with its re-windowed group.
    async fn extend_open(
        &self,
        open: &Session,
        group: &SampleGroup,
        status: SessionStatus,
        open_refs: &BTreeSet<SampleRef>,
        settings: &AggregationSettings,
        run: &mut EmployeeRun,
    ) -> Result<(), StoreError> {
        let refs = group.sample_refs();
        let unchanged = status == SessionStatus::Open
            && refs.len() == open_refs.len()
            && refs.iter().all(|r| open_refs.contains(r));
        if unchanged {
            tracing::debug!(session_id = open.id, "Open session has nothing new");
            return Ok(());
        }

        let session = self.build_session(open.employee_id, group, status, settings).await;
        let saved = self.store.rewrite_session(open.id, &session, &refs).await?;
        tracing::info!(
            employee_id = open.employee_id,
            session_id = saved.id,
            samples = group.samples.len(),
            status = saved.status.as_str(),
            "Open session updated"
        );
        run.updated.push(saved);
        Ok(())
    }

    async fn quarantine_late(
        &self,
        samples: &[RawSample],
        run: &mut EmployeeRun,
    ) -> Result<(), StoreError> {
        let refs: Vec<SampleRef> = samples.iter().map(RawSample::sample_ref).collect();
        self.store
            .quarantine(&refs, &QuarantineReason::LateArrival)
            .await?;
        run.late += samples.len();
        Ok(())
    }

    /// Quarantine samples that cannot be aggregated and return the rest.
    async fn quarantine_malformed(
        &self,
        employee_id: DbId,
        samples: Vec<RawSample>,
        run: &mut EmployeeRun,
    ) -> Result<Vec<RawSample>, PipelineError> {
        let mut kept = Vec::with_capacity(samples.len());
        for sample in samples {
            match sample.check_well_formed() {
                Ok(()) => kept.push(sample),
                Err(reason) => {
                    tracing::warn!(
                        employee_id,
                        kind = sample.kind().as_str(),
                        sample_id = sample.id,
                        reason = %reason,
                        "Quarantining malformed sample"
                    );
                    self.store
                        .quarantine(&[sample.sample_ref()], &QuarantineReason::Malformed(reason))
                        .await?;
                    run.quarantined += 1;
                }
            }
        }
        Ok(kept)
    }

    async fn build_session(
        &self,
        employee_id: DbId,
        group: &SampleGroup,
        status: SessionStatus,
        settings: &AggregationSettings,
    ) -> NewSession {
        let metrics = synthesize(group, settings);
        let screenshots = screenshot_records(group);
        let signals =
            SessionSignals::new(employee_id, group.start, group.end, &metrics, screenshots.len());
        let enrichment =
            enrich(self.analyzer.as_ref(), &signals, self.options.analyzer_timeout).await;

        NewSession {
            employee_id,
            session_start: group.start,
            session_end: group.end,
            status,
            metrics,
            ai_analysis: enrichment.analysis,
            analysis_degraded: enrichment.degraded,
            screenshots,
        }
    }

    /// Aggregate every employee inside `scope` with pending samples or an
    /// open session.
    ///
    /// Employees run with bounded parallelism; one failure never blocks the
    /// others. Cancellation is honoured before each employee starts.
    pub async fn process_all_pending(
        &self,
        scope: SweepScope,
        flush: bool,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, PipelineError> {
        let mut candidates = self.store.employees_with_pending().await?;
        candidates.extend(self.store.employees_with_open_sessions().await?);
        candidates.sort_unstable();
        candidates.dedup();
        let employees = self.filter_scope(candidates, scope).await?;
        let started_at: Timestamp = Utc::now();

        tracing::info!(employees = employees.len(), ?scope, "Aggregation sweep starting");

        let runs: Vec<Option<EmployeeRun>> = stream::iter(employees)
            .map(|employee_id| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let run = match self.process_pending(employee_id, TimeRange::all(), flush).await {
                    Ok(run) => run,
                    Err(e) => {
                        tracing::error!(employee_id, error = %e, "Aggregation failed for employee");
                        EmployeeRun::failed(employee_id, e.to_string())
                    }
                };
                Some(run)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let cancelled = runs.iter().any(Option::is_none);
        let mut employees: Vec<EmployeeRun> = runs.into_iter().flatten().collect();
        employees.sort_by_key(|r| r.employee_id);

        let report = SweepReport {
            employees,
            cancelled,
        };
        tracing::info!(
            sessions_created = report.sessions_created(),
            sessions_updated = report.sessions_updated(),
            failures = report.failures(),
            cancelled,
            elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
            "Aggregation sweep finished"
        );
        Ok(report)
    }

    async fn filter_scope(
        &self,
        employees: Vec<DbId>,
        scope: SweepScope,
    ) -> Result<Vec<DbId>, PipelineError> {
        if scope == SweepScope::All {
            return Ok(employees);
        }
        let mut kept = Vec::new();
        for employee_id in employees {
            if let Some(profile) = self.store.find_employee(employee_id).await? {
                if scope.includes(&profile) {
                    kept.push(employee_id);
                }
            }
        }
        Ok(kept)
    }

    /// Re-run enrichment for sessions that fell back, using their stored
    /// metrics. Sessions keep their fallback analysis when the retry fails.
    pub async fn retry_degraded(&self, limit: i64) -> Result<RetryReport, PipelineError> {
        let sessions = self.store.degraded_sessions(limit).await?;
        let mut report = RetryReport::default();

        for session in sessions {
            report.attempted += 1;
            let signals = SessionSignals::from_session(&session);
            let enrichment =
                enrich(self.analyzer.as_ref(), &signals, self.options.analyzer_timeout).await;
            if enrichment.degraded {
                continue;
            }
            if self
                .store
                .update_analysis(session.id, &enrichment.analysis)
                .await?
            {
                tracing::info!(session_id = session.id, "Recovered session analysis");
                report.recovered += 1;
            }
        }
        Ok(report)
    }
}
