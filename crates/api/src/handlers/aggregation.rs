//! Handlers for on-demand aggregation and runtime settings.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use worktrace_core::access::{authorize_aggregate, sweep_scope_for};
use worktrace_core::session::{Session, SessionStatus};
use worktrace_core::settings::{AggregationSettings, UpdateAggregationSettings};
use worktrace_core::types::{DbId, TimeRange, Timestamp};
use worktrace_pipeline::{EmployeeRun, RunStatus};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of `POST /aggregate`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    /// Employee to aggregate; defaults to the caller.
    pub user_id: Option<DbId>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    /// Sweep every employee in the caller's scope instead of one.
    #[serde(default)]
    pub process_all: bool,
}

/// Compact view of a session created by a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: DbId,
    pub employee_id: DbId,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    pub productivity_score: f64,
    pub screenshot_count: i32,
    pub analysis_degraded: bool,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            employee_id: s.employee_id,
            session_start: s.session_start,
            session_end: s.session_end,
            duration_minutes: s.duration_minutes,
            status: s.status,
            productivity_score: s.metrics.productivity_score,
            screenshot_count: s.screenshot_count,
            analysis_degraded: s.analysis_degraded,
        }
    }
}

/// Per-employee line of a bulk aggregation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeOutcome {
    pub employee_id: DbId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sessions_created: usize,
    pub sessions_updated: usize,
    pub quarantined: usize,
    pub deferred: usize,
}

impl From<&EmployeeRun> for EmployeeOutcome {
    fn from(run: &EmployeeRun) -> Self {
        Self {
            employee_id: run.employee_id,
            status: run.status,
            error: run.error.clone(),
            sessions_created: run.sessions_created(),
            sessions_updated: run.updated.len(),
            quarantined: run.quarantined + run.late,
            deferred: run.deferred,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    pub sessions_created: usize,
    pub sessions: Vec<SessionSummary>,
    /// Previously open sessions this run extended or closed.
    pub updated: Vec<SessionSummary>,
    /// Outcome of a single-employee run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// Per-employee outcomes of a `processAll` sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employees: Option<Vec<EmployeeOutcome>>,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// POST /api/v1/aggregate
///
/// Aggregate pending samples now. A trailing group that is still live is
/// flushed as an `open` session so the caller sees current activity.
///
/// The run executes on its own task: if the request times out or the client
/// disconnects, the employee being processed still finishes and its claim is
/// released. Only server shutdown stops a sweep, between employees.
///
/// - Single employee: the caller themself or an administrator.
/// - `processAll`: administrators sweep everyone, department heads sweep
///   their own department.
pub async fn aggregate(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<AggregateRequest>,
) -> AppResult<Json<DataResponse<AggregateResponse>>> {
    let requester = auth.requester();

    if input.process_all {
        let scope = sweep_scope_for(&requester)?;
        tracing::info!(user_id = auth.user_id, ?scope, "On-demand aggregation sweep requested");

        let aggregator = Arc::clone(&state.aggregator);
        let cancel = state.shutdown.child_token();
        let report = tokio::spawn(async move {
            aggregator.process_all_pending(scope, true, &cancel).await
        })
        .await??;

        let sessions = report
            .employees
            .iter()
            .flat_map(|run| run.sessions.iter().map(SessionSummary::from))
            .collect();
        let updated = report
            .employees
            .iter()
            .flat_map(|run| run.updated.iter().map(SessionSummary::from))
            .collect();
        let employees = report.employees.iter().map(EmployeeOutcome::from).collect();

        return Ok(Json(DataResponse {
            data: AggregateResponse {
                sessions_created: report.sessions_created(),
                sessions,
                updated,
                status: None,
                employees: Some(employees),
            },
        }));
    }

    let employee_id = input.user_id.unwrap_or(auth.user_id);
    authorize_aggregate(&requester, employee_id)?;

    let range = TimeRange {
        start: input.start_time,
        end: input.end_time,
    };

    tracing::info!(
        user_id = auth.user_id,
        employee_id,
        "On-demand aggregation requested"
    );

    let aggregator = Arc::clone(&state.aggregator);
    let run = tokio::spawn(async move { aggregator.process_pending(employee_id, range, true).await })
        .await??;

    Ok(Json(DataResponse {
        data: AggregateResponse {
            sessions_created: run.sessions_created(),
            sessions: run.sessions.iter().map(SessionSummary::from).collect(),
            updated: run.updated.iter().map(SessionSummary::from).collect(),
            status: Some(run.status),
            employees: None,
        },
    }))
}

/// GET /api/v1/aggregation/settings
///
/// Settings the next aggregation run will use.
pub async fn get_settings(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<AggregationSettings>>> {
    let settings = state.aggregator.current_settings().await?;
    Ok(Json(DataResponse { data: settings }))
}

/// PUT /api/v1/aggregation/settings
///
/// Partially update the runtime settings. Takes effect on the next run
/// without a restart.
pub async fn update_settings(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<UpdateAggregationSettings>,
) -> AppResult<Json<DataResponse<AggregationSettings>>> {
    let current = state.aggregator.current_settings().await?;
    let next = current.merged(&input)?;
    state.store.save_settings(&next).await?;

    tracing::info!(
        user_id = admin.user_id,
        max_idle_gap_mins = next.max_idle_gap_mins,
        max_session_span_mins = next.max_session_span_mins,
        "Aggregation settings updated"
    );

    Ok(Json(DataResponse { data: next }))
}
