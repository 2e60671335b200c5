//! Rows of the `work_sessions` table.

use sqlx::types::Json;
use sqlx::FromRow;
use worktrace_core::session::{AiAnalysis, Session, SessionMetrics, SessionStatus};
use worktrace_core::types::{DbId, Timestamp};

/// A row from the `work_sessions` table.
///
/// Metrics are stored as one JSONB document; `productivity_score` is also
/// kept as a column so it can be filtered and sorted on.
#[derive(Debug, Clone, FromRow)]
pub struct WorkSessionRow {
    pub id: DbId,
    pub employee_id: DbId,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub duration_minutes: i64,
    pub status: String,
    pub metrics: Json<SessionMetrics>,
    pub ai_analysis: Option<Json<AiAnalysis>>,
    pub analysis_degraded: bool,
    pub screenshot_count: i32,
    pub created_at: Timestamp,
}

impl From<WorkSessionRow> for Session {
    fn from(row: WorkSessionRow) -> Self {
        Self {
            id: row.id,
            employee_id: row.employee_id,
            session_start: row.session_start,
            session_end: row.session_end,
            duration_minutes: row.duration_minutes,
            status: SessionStatus::from_db(&row.status),
            metrics: row.metrics.0,
            ai_analysis: row.ai_analysis.map(|a| a.0),
            analysis_degraded: row.analysis_degraded,
            screenshot_count: row.screenshot_count,
            created_at: row.created_at,
        }
    }
}
