//! End-to-end aggregation runs against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DurationRound, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use worktrace_core::access::{EmployeeProfile, SweepScope};
use worktrace_core::analytics::{synthesize, SessionSignals};
use worktrace_core::samples::{
    ActivityCategory, FocusInterval, ProcessingState, RawSample, SampleKind, SamplePayload,
    SampleRef, ScreenshotCapture,
};
use worktrace_core::session::{AiAnalysis, NewSession, SessionStatus};
use worktrace_core::settings::AggregationSettings;
use worktrace_core::store::memory::InMemoryStore;
use worktrace_core::store::SessionStore;
use worktrace_core::types::{DbId, TimeRange, Timestamp};
use worktrace_core::windowing::window;
use worktrace_pipeline::analyzer::AnalyzerError;
use worktrace_pipeline::{
    Aggregator, AggregatorOptions, LocalAnalyzer, PipelineError, RunStatus, SessionAnalyzer,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// PNG signature plus IHDR header, base64 encoded.
const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAA";

/// Two days ago, on a minute boundary, so no fixture window is live.
fn base() -> Timestamp {
    (Utc::now() - TimeDelta::days(2))
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap()
}

fn at(min: i64) -> Timestamp {
    base() + TimeDelta::minutes(min)
}

fn keystrokes(store: &InMemoryStore, employee: DbId, min: i64) {
    store.insert_sample(employee, at(min), SamplePayload::Keystroke { count: 30 });
}

fn focus(
    store: &InMemoryStore,
    employee: DbId,
    min: i64,
    len_mins: i64,
    app: &str,
    category: ActivityCategory,
) {
    store.insert_sample(
        employee,
        at(min),
        SamplePayload::WindowFocus(FocusInterval {
            application_name: app.into(),
            window_title: format!("{app} window"),
            url: None,
            focus_start: at(min),
            focus_end: at(min + len_mins),
            category,
        }),
    );
}

fn screenshot(store: &InMemoryStore, employee: DbId, min: i64, full: &str) -> DbId {
    store
        .insert_sample(
            employee,
            at(min),
            SamplePayload::Screenshot(ScreenshotCapture {
                thumbnail: PNG_B64.into(),
                full_data: full.into(),
                capture_type: "scheduled".into(),
            }),
        )
        .id
}

struct Unavailable;

#[async_trait]
impl SessionAnalyzer for Unavailable {
    async fn analyze(&self, _: &SessionSignals) -> Result<AiAnalysis, AnalyzerError> {
        Err(AnalyzerError::Api {
            status: 503,
            body: "down".into(),
        })
    }
}

struct Stalls;

#[async_trait]
impl SessionAnalyzer for Stalls {
    async fn analyze(&self, _: &SessionSignals) -> Result<AiAnalysis, AnalyzerError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(AnalyzerError::InvalidResponse("late".into()))
    }
}

fn aggregator_with(store: Arc<InMemoryStore>, analyzer: Arc<dyn SessionAnalyzer>) -> Aggregator {
    let options = AggregatorOptions {
        concurrency: 1,
        analyzer_timeout: Duration::from_millis(50),
        ..AggregatorOptions::default()
    };
    Aggregator::new(store, analyzer, options)
}

fn aggregator(store: Arc<InMemoryStore>) -> Aggregator {
    aggregator_with(store, Arc::new(LocalAnalyzer))
}

// ---------------------------------------------------------------------------
// Windowing and idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_gap_produces_two_sessions_and_rerun_is_noop() {
    let store = Arc::new(InMemoryStore::new());
    for min in [0, 5, 12, 40] {
        keystrokes(&store, 1, min);
    }
    let agg = aggregator(store.clone());

    let run = agg.process_pending(1, TimeRange::all(), false).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.sessions_created(), 2);
    assert_eq!(run.sessions[0].session_start, at(0));
    assert_eq!(run.sessions[0].session_end, at(12));
    assert_eq!(run.sessions[0].duration_minutes, 12);
    assert_eq!(run.sessions[1].session_start, at(40));
    assert_eq!(run.sessions[1].session_end, at(40));
    assert!(run.sessions.iter().all(|s| s.status == SessionStatus::Closed));

    let again = agg.process_pending(1, TimeRange::all(), false).await.unwrap();
    assert_eq!(again.sessions_created(), 0);
    assert_eq!(store.session_count(), 2);
}

#[tokio::test]
async fn every_sample_is_aggregated_exactly_once() {
    let store = Arc::new(InMemoryStore::new());
    let shot = screenshot(&store, 1, 1, PNG_B64);
    focus(&store, 1, 0, 4, "Editor", ActivityCategory::Productive);
    keystrokes(&store, 1, 2);
    let agg = aggregator(store.clone());

    let run = agg.process_pending(1, TimeRange::all(), true).await.unwrap();
    assert_eq!(run.sessions_created(), 1);
    let session_id = run.sessions[0].id;

    let status = store
        .sample_status(SampleRef {
            kind: SampleKind::Screenshot,
            id: shot,
        })
        .unwrap();
    assert_eq!(status.state, ProcessingState::Aggregated);
    assert_eq!(status.session_id, Some(session_id));
    assert!(store.pending_samples(1, TimeRange::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn live_trailing_window_is_deferred_unless_flushed() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    store.insert_sample(2, now - TimeDelta::minutes(3), SamplePayload::Keystroke { count: 5 });
    store.insert_sample(2, now - TimeDelta::minutes(1), SamplePayload::Keystroke { count: 5 });
    let agg = aggregator(store.clone());

    let scheduled = agg.process_pending(2, TimeRange::all(), false).await.unwrap();
    assert_eq!(scheduled.sessions_created(), 0);
    assert_eq!(scheduled.deferred, 2);
    assert_eq!(store.pending_samples(2, TimeRange::all()).await.unwrap().len(), 2);

    let flushed = agg.process_pending(2, TimeRange::all(), true).await.unwrap();
    assert_eq!(flushed.sessions_created(), 1);
    assert_eq!(flushed.sessions[0].status, SessionStatus::Open);
}

#[tokio::test]
async fn range_limits_the_samples_considered() {
    let store = Arc::new(InMemoryStore::new());
    for min in [0, 5, 100, 105] {
        keystrokes(&store, 3, min);
    }
    let agg = aggregator(store.clone());

    let range = TimeRange {
        start: Some(at(90)),
        end: Some(at(120)),
    };
    let run = agg.process_pending(3, range, false).await.unwrap();
    assert_eq!(run.sessions_created(), 1);
    assert_eq!(run.sessions[0].session_start, at(100));
    // Samples outside the range stay pending; they are now late arrivals.
    assert_eq!(store.pending_samples(3, TimeRange::all()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let agg = aggregator(store);
    let range = TimeRange {
        start: Some(at(10)),
        end: Some(at(0)),
    };
    assert_matches!(
        agg.process_pending(1, range, false).await,
        Err(PipelineError::InvalidRange(_))
    );
}

#[tokio::test]
async fn persisted_settings_apply_on_next_run() {
    let store = Arc::new(InMemoryStore::new());
    for min in [0, 30] {
        keystrokes(&store, 4, min);
    }
    let settings = AggregationSettings {
        max_idle_gap_mins: 45,
        ..AggregationSettings::default()
    };
    store.save_settings(&settings).await.unwrap();

    let run = aggregator(store).process_pending(4, TimeRange::all(), false).await.unwrap();
    assert_eq!(run.sessions_created(), 1);
    assert_eq!(run.sessions[0].duration_minutes, 30);
}

// ---------------------------------------------------------------------------
// Quarantine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_samples_are_quarantined_and_run_continues() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 5, 0);
    let broken = store.insert_sample(5, at(1), SamplePayload::Keystroke { count: -3 });
    screenshot(&store, 5, 2, "%%% definitely not base64 %%%");
    keystrokes(&store, 5, 3);

    let run = aggregator(store.clone())
        .process_pending(5, TimeRange::all(), false)
        .await
        .unwrap();
    assert_eq!(run.quarantined, 2);
    assert_eq!(run.sessions_created(), 1);
    assert_eq!(run.sessions[0].screenshot_count, 0);

    let status = store.sample_status(broken.sample_ref()).unwrap();
    assert_eq!(status.state, ProcessingState::Pending);
    assert!(status.invalid_reason.unwrap().starts_with("malformed"));
}

#[tokio::test]
async fn late_samples_are_dropped_not_merged() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 6, 60);
    let agg = aggregator(store.clone());
    agg.process_pending(6, TimeRange::all(), false).await.unwrap();

    let late = store.insert_sample(6, at(10), SamplePayload::Keystroke { count: 1 });
    let run = agg.process_pending(6, TimeRange::all(), false).await.unwrap();

    assert_eq!(run.late, 1);
    assert_eq!(run.sessions_created(), 0);
    let status = store.sample_status(late.sample_ref()).unwrap();
    assert_eq!(status.invalid_reason.as_deref(), Some("late_arrival"));

    // Not re-warned on the following run.
    let quiet = agg.process_pending(6, TimeRange::all(), false).await.unwrap();
    assert_eq!(quiet.late, 0);
}

// ---------------------------------------------------------------------------
// Analytics and enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_and_screenshots_are_stored() {
    let store = Arc::new(InMemoryStore::new());
    focus(&store, 7, 0, 6, "Editor", ActivityCategory::Productive);
    screenshot(&store, 7, 2, PNG_B64);
    focus(&store, 7, 6, 2, "Chat", ActivityCategory::Distraction);
    screenshot(&store, 7, 7, PNG_B64);
    keystrokes(&store, 7, 8);

    let run = aggregator(store.clone())
        .process_pending(7, TimeRange::all(), false)
        .await
        .unwrap();
    let session = &run.sessions[0];

    assert_eq!(session.metrics.app_usage_summary["Editor"], 360);
    assert_eq!(session.metrics.top_apps[0].name, "Editor");
    assert_eq!(session.metrics.keystroke_summary.total_keystrokes, 30);
    assert!((0.0..=100.0).contains(&session.metrics.productivity_score));
    assert_eq!(session.screenshot_count, 2);
    assert!(!session.analysis_degraded);

    let index = store.screenshot_index(session.id).await.unwrap();
    assert_eq!(index.iter().map(|m| m.index).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(index[0].captured_at, at(2));
    assert_eq!(index[1].captured_at, at(7));
}

#[tokio::test]
async fn analyzer_timeout_persists_degraded_session() {
    let store = Arc::new(InMemoryStore::new());
    focus(&store, 8, 0, 5, "Editor", ActivityCategory::Productive);
    let agg = aggregator_with(store.clone(), Arc::new(Stalls));

    let run = agg.process_pending(8, TimeRange::all(), false).await.unwrap();
    let session = &run.sessions[0];
    assert!(session.analysis_degraded);
    let analysis = session.ai_analysis.as_ref().unwrap();
    assert!(!analysis.summary.is_empty());
    assert_eq!(analysis.score, session.metrics.productivity_score);
}

#[tokio::test]
async fn degraded_sessions_recover_when_analyzer_returns() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 9, 0);
    aggregator_with(store.clone(), Arc::new(Unavailable))
        .process_pending(9, TimeRange::all(), false)
        .await
        .unwrap();
    assert_eq!(store.degraded_sessions(10).await.unwrap().len(), 1);

    let still_down = aggregator_with(store.clone(), Arc::new(Unavailable))
        .retry_degraded(10)
        .await
        .unwrap();
    assert_eq!((still_down.attempted, still_down.recovered), (1, 0));

    let report = aggregator(store.clone()).retry_degraded(10).await.unwrap();
    assert_eq!((report.attempted, report.recovered), (1, 1));
    assert!(store.degraded_sessions(10).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Failure handling and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_write_stops_run_and_retry_converges() {
    let store = Arc::new(InMemoryStore::new());
    for min in [0, 5, 40, 45] {
        keystrokes(&store, 10, min);
    }
    let agg = aggregator(store.clone());

    store.fail_next_writes(1);
    let failed = agg.process_pending(10, TimeRange::all(), false).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error.is_some());
    assert_eq!(failed.sessions_created(), 0);
    assert_eq!(store.session_count(), 0);
    assert_eq!(store.pending_samples(10, TimeRange::all()).await.unwrap().len(), 4);

    let retried = agg.process_pending(10, TimeRange::all(), false).await.unwrap();
    assert_eq!(retried.status, RunStatus::Completed);
    assert_eq!(retried.sessions_created(), 2);
}

#[tokio::test]
async fn held_claim_skips_the_employee() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 11, 0);
    let other_run = Uuid::new_v4();
    assert!(store
        .try_claim(11, other_run, TimeDelta::minutes(5))
        .await
        .unwrap());

    let agg = aggregator(store.clone());
    let run = agg.process_pending(11, TimeRange::all(), false).await.unwrap();
    assert_eq!(run.status, RunStatus::Skipped);
    assert_eq!(store.session_count(), 0);

    store.release_claim(11, other_run).await.unwrap();
    let run = agg.process_pending(11, TimeRange::all(), false).await.unwrap();
    assert_eq!(run.sessions_created(), 1);
}

#[tokio::test]
async fn concurrent_runs_never_duplicate_sessions() {
    let store = Arc::new(InMemoryStore::new());
    for min in [0, 3, 6, 30, 33] {
        keystrokes(&store, 12, min);
    }
    let agg = Arc::new(aggregator(store.clone()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let agg = Arc::clone(&agg);
            tokio::spawn(async move { agg.process_pending(12, TimeRange::all(), false).await })
        })
        .collect();
    let mut created = 0;
    for handle in handles {
        created += handle.await.unwrap().unwrap().sessions_created();
    }

    assert_eq!(created, 2);
    assert_eq!(store.session_count(), 2);
}

#[tokio::test]
async fn one_failing_employee_does_not_block_others() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 20, 0);
    keystrokes(&store, 21, 0);
    let agg = aggregator(store.clone());

    // Concurrency 1 processes employees in id order, so 20 fails.
    store.fail_next_writes(1);
    let report = agg
        .process_all_pending(SweepScope::All, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.employees.len(), 2);
    assert_eq!(report.failures(), 1);
    assert_eq!(report.sessions_created(), 1);
    assert_eq!(report.employees[0].employee_id, 20);
    assert!(report.employees[0].is_failed());
    assert_eq!(report.employees[1].sessions_created(), 1);
}

#[tokio::test]
async fn cancelled_sweep_processes_nobody() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 30, 0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = aggregator(store.clone())
        .process_all_pending(SweepScope::All, false, &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert!(report.employees.is_empty());
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn department_scope_only_sweeps_own_department() {
    let store = Arc::new(InMemoryStore::new());
    store.add_employee(EmployeeProfile {
        employee_id: 40,
        department_id: Some(1),
        department_head_id: Some(99),
    });
    store.add_employee(EmployeeProfile {
        employee_id: 41,
        department_id: Some(2),
        department_head_id: Some(98),
    });
    keystrokes(&store, 40, 0);
    keystrokes(&store, 41, 0);

    let report = aggregator(store.clone())
        .process_all_pending(SweepScope::DepartmentOf(99), true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.employees.len(), 1);
    assert_eq!(report.employees[0].employee_id, 40);
    assert_eq!(store.pending_samples(41, TimeRange::all()).await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Open sessions
// ---------------------------------------------------------------------------

/// Keystrokes relative to a fixed "now" so both runs see the same window.
fn keystroke_ago(store: &InMemoryStore, employee: DbId, now: Timestamp, mins_ago: i64) -> RawSample {
    store.insert_sample(
        employee,
        now - TimeDelta::minutes(mins_ago),
        SamplePayload::Keystroke { count: 10 },
    )
}

#[tokio::test]
async fn flushed_open_session_grows_instead_of_splitting() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    keystroke_ago(&store, 50, now, 6);
    keystroke_ago(&store, 50, now, 1);
    let agg = aggregator(store.clone());

    let first = agg.process_pending(50, TimeRange::all(), true).await.unwrap();
    assert_eq!(first.sessions_created(), 1);
    let open = first.sessions[0].clone();
    assert_eq!(open.status, SessionStatus::Open);

    let latest = keystroke_ago(&store, 50, now, 0);
    let second = agg.process_pending(50, TimeRange::all(), true).await.unwrap();
    assert_eq!(second.sessions_created(), 0);
    assert_eq!(second.updated.len(), 1);
    let grown = &second.updated[0];
    assert_eq!(grown.id, open.id);
    assert_eq!(grown.session_start, open.session_start);
    assert_eq!(grown.session_end, now);
    assert_eq!(grown.status, SessionStatus::Open);
    assert_eq!(grown.metrics.keystroke_summary.total_keystrokes, 30);

    assert_eq!(store.session_count(), 1);
    assert_eq!(
        store.sample_status(latest.sample_ref()).unwrap().session_id,
        Some(open.id)
    );

    // The same three samples aggregated in one pass give the same window.
    let fresh = Arc::new(InMemoryStore::new());
    for mins_ago in [6, 1, 0] {
        keystroke_ago(&fresh, 50, now, mins_ago);
    }
    let single = aggregator(fresh).process_pending(50, TimeRange::all(), true).await.unwrap();
    assert_eq!(single.sessions_created(), 1);
    assert_eq!(single.sessions[0].session_start, grown.session_start);
    assert_eq!(single.sessions[0].session_end, grown.session_end);
}

#[tokio::test]
async fn repeated_flush_without_new_samples_changes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    keystroke_ago(&store, 51, now, 2);
    let agg = aggregator(store.clone());

    agg.process_pending(51, TimeRange::all(), true).await.unwrap();
    let again = agg.process_pending(51, TimeRange::all(), true).await.unwrap();
    assert_eq!(again.sessions_created(), 0);
    assert!(again.updated.is_empty());
    assert_eq!(store.session_count(), 1);
}

/// Persist an `open` session over past keystrokes, as an earlier flush
/// would have left it.
async fn seed_open_session(store: &InMemoryStore, employee: DbId, minutes: &[i64]) -> DbId {
    let samples: Vec<RawSample> = minutes
        .iter()
        .map(|&min| store.insert_sample(employee, at(min), SamplePayload::Keystroke { count: 10 }))
        .collect();
    let refs: Vec<SampleRef> = samples.iter().map(RawSample::sample_ref).collect();
    let settings = AggregationSettings::default();
    let group = window(samples, &settings).remove(0);
    let open = NewSession {
        employee_id: employee,
        session_start: group.start,
        session_end: group.end,
        status: SessionStatus::Open,
        metrics: synthesize(&group, &settings),
        ai_analysis: AiAnalysis {
            summary: "in progress".into(),
            score: 50.0,
            tips: vec![],
            insights: vec![],
        },
        analysis_degraded: false,
        screenshots: vec![],
    };
    store.write_session(&open, &refs).await.unwrap().session().id
}

#[tokio::test]
async fn idle_open_session_is_closed_by_the_sweep() {
    let store = Arc::new(InMemoryStore::new());
    let id = seed_open_session(&store, 52, &[0, 4]).await;
    assert!(store.employees_with_pending().await.unwrap().is_empty());

    let report = aggregator(store.clone())
        .process_all_pending(SweepScope::All, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.employees.len(), 1);
    let run = &report.employees[0];
    assert_eq!(run.sessions_created(), 0);
    assert_eq!(run.updated.len(), 1);
    let closed = store.get_session(id).await.unwrap().unwrap();
    assert_eq!(closed.status, SessionStatus::Closed);
    assert_eq!(closed.session_start, at(0));
    assert_eq!(closed.session_end, at(4));
    assert!(store.employees_with_open_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn open_session_absorbs_in_gap_samples_and_closes_before_a_new_one() {
    let store = Arc::new(InMemoryStore::new());
    let id = seed_open_session(&store, 53, &[0, 4]).await;
    keystrokes(&store, 53, 9);
    keystrokes(&store, 53, 40);

    let run = aggregator(store.clone())
        .process_pending(53, TimeRange::all(), false)
        .await
        .unwrap();

    assert_eq!(run.updated.len(), 1);
    assert_eq!(run.updated[0].id, id);
    assert_eq!(run.updated[0].status, SessionStatus::Closed);
    assert_eq!(run.updated[0].session_end, at(9));
    assert_eq!(run.updated[0].metrics.keystroke_summary.total_keystrokes, 50);
    assert_eq!(run.sessions_created(), 1);
    assert_eq!(run.sessions[0].session_start, at(40));
    assert_eq!(store.session_count(), 2);
    assert!(store.pending_samples(53, TimeRange::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn stricter_idle_gap_splits_a_reopened_session() {
    let store = Arc::new(InMemoryStore::new());
    let id = seed_open_session(&store, 54, &[0, 8]).await;
    let settings = AggregationSettings {
        max_idle_gap_mins: 5,
        ..AggregationSettings::default()
    };
    store.save_settings(&settings).await.unwrap();

    let run = aggregator(store.clone())
        .process_pending(54, TimeRange::all(), false)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.updated.len(), 1);
    assert_eq!(run.updated[0].id, id);
    assert_eq!(run.updated[0].session_end, at(0));
    assert_eq!(run.sessions_created(), 1);
    assert_eq!(run.sessions[0].session_start, at(8));
    assert_eq!(store.session_samples(id).await.unwrap().len(), 1);
    assert_eq!(store.session_samples(run.sessions[0].id).await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Window key collisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sample_at_closed_session_end_is_late_not_lost() {
    let store = Arc::new(InMemoryStore::new());
    keystrokes(&store, 55, 0);
    let agg = aggregator(store.clone());
    let first = agg.process_pending(55, TimeRange::all(), false).await.unwrap();
    let closed = first.sessions[0].clone();
    assert_eq!((closed.session_start, closed.session_end), (at(0), at(0)));

    let shot = screenshot(&store, 55, 0, PNG_B64);
    let follow_up = store.insert_sample(55, at(5), SamplePayload::Keystroke { count: 99 });
    let run = agg.process_pending(55, TimeRange::all(), false).await.unwrap();

    // The screenshot shares the closed window's instant and is quarantined.
    assert_eq!(run.late, 1);
    let shot_status = store
        .sample_status(SampleRef {
            kind: SampleKind::Screenshot,
            id: shot,
        })
        .unwrap();
    assert_eq!(shot_status.state, ProcessingState::Pending);
    assert_eq!(shot_status.session_id, None);
    assert_eq!(shot_status.invalid_reason.as_deref(), Some("late_arrival"));

    // The follow-up starts its own session instead of vanishing into the old one.
    assert_eq!(run.sessions_created(), 1);
    let fresh = &run.sessions[0];
    assert_eq!(fresh.session_start, at(5));
    assert_eq!(fresh.metrics.keystroke_summary.total_keystrokes, 99);
    assert_eq!(
        store.sample_status(follow_up.sample_ref()).unwrap().session_id,
        Some(fresh.id)
    );
    let untouched = store.get_session(closed.id).await.unwrap().unwrap();
    assert_eq!(untouched, closed);
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_run_releases_its_claim() {
    let store = Arc::new(InMemoryStore::new());
    let sample = store.insert_sample(56, at(0), SamplePayload::Keystroke { count: 10 });
    let options = AggregatorOptions {
        analyzer_timeout: Duration::from_secs(60),
        ..AggregatorOptions::default()
    };
    let agg = Aggregator::new(store.clone(), Arc::new(Stalls), options);

    let cut_short = tokio::time::timeout(
        Duration::from_millis(100),
        agg.process_pending(56, TimeRange::all(), false),
    )
    .await;
    assert!(cut_short.is_err());

    // The release runs on a spawned task.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store
        .try_claim(56, Uuid::new_v4(), TimeDelta::minutes(5))
        .await
        .unwrap());
    assert_eq!(
        store.sample_status(sample.sample_ref()).unwrap().state,
        ProcessingState::Pending
    );
    assert_eq!(store.session_count(), 0);
}
