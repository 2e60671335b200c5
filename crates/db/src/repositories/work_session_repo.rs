//! Repository for the `work_sessions` table.

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use worktrace_core::session::{AiAnalysis, NewSession};
use worktrace_core::types::{DbId, TimeRange, Timestamp};

use crate::models::work_session::WorkSessionRow;

/// Column list for `work_sessions` queries.
const COLUMNS: &str = "id, employee_id, session_start, session_end, duration_minutes, status, \
     metrics, ai_analysis, analysis_degraded, screenshot_count, created_at";

/// Provides CRUD operations for work sessions.
pub struct WorkSessionRepo;

impl WorkSessionRepo {
    /// Insert a session unless one already exists for the same
    /// `(employee_id, session_start)`.
    ///
    /// Returns `None` when the unique window key already exists.
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        session: &NewSession,
    ) -> Result<Option<WorkSessionRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO work_sessions \
                (employee_id, session_start, session_end, duration_minutes, status, \
                 metrics, productivity_score, ai_analysis, analysis_degraded, screenshot_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (employee_id, session_start) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(session.employee_id)
            .bind(session.session_start)
            .bind(session.session_end)
            .bind(session.duration_minutes())
            .bind(session.status.as_str())
            .bind(Json(&session.metrics))
            .bind(session.metrics.productivity_score)
            .bind(Json(&session.ai_analysis))
            .bind(session.analysis_degraded)
            .bind(session.screenshots.len() as i32)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Find the session occupying a window key.
    pub async fn find_by_window(
        conn: &mut PgConnection,
        employee_id: DbId,
        session_start: Timestamp,
    ) -> Result<Option<WorkSessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM work_sessions \
             WHERE employee_id = $1 AND session_start = $2"
        );
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(employee_id)
            .bind(session_start)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WorkSessionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM work_sessions WHERE id = $1");
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Sessions of one employee starting inside `range`, newest first.
    pub async fn list_for_employee(
        pool: &PgPool,
        employee_id: DbId,
        range: TimeRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkSessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM work_sessions \
             WHERE employee_id = $1 \
               AND ($2::timestamptz IS NULL OR session_start >= $2) \
               AND ($3::timestamptz IS NULL OR session_start < $3) \
             ORDER BY session_start DESC \
             LIMIT $4 OFFSET $5"
        );
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(employee_id)
            .bind(range.start)
            .bind(range.end)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// The employee's most recent session, used for the late-arrival
    /// watermark and to find a session that is still open.
    pub async fn latest(
        pool: &PgPool,
        employee_id: DbId,
    ) -> Result<Option<WorkSessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM work_sessions \
             WHERE employee_id = $1 \
             ORDER BY session_end DESC, session_start DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(employee_id)
            .fetch_optional(pool)
            .await
    }

    /// Employees whose most recent session is `open`.
    pub async fn employees_with_open(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT employee_id FROM ( \
                 SELECT DISTINCT ON (employee_id) employee_id, status \
                 FROM work_sessions \
                 ORDER BY employee_id, session_end DESC, session_start DESC \
             ) latest \
             WHERE status = 'open' \
             ORDER BY employee_id",
        )
        .fetch_all(pool)
        .await
    }

    /// Replace everything but the window key of an existing session.
    ///
    /// Returns `None` if the session no longer exists.
    pub async fn replace_content(
        conn: &mut PgConnection,
        id: DbId,
        session: &NewSession,
    ) -> Result<Option<WorkSessionRow>, sqlx::Error> {
        let query = format!(
            "UPDATE work_sessions SET \
                session_end = $2, \
                duration_minutes = GREATEST(FLOOR(EXTRACT(EPOCH FROM ($2 - session_start)) / 60), 0)::BIGINT, \
                status = $3, metrics = $4, productivity_score = $5, ai_analysis = $6, \
                analysis_degraded = $7, screenshot_count = $8, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(id)
            .bind(session.session_end)
            .bind(session.status.as_str())
            .bind(Json(&session.metrics))
            .bind(session.metrics.productivity_score)
            .bind(Json(&session.ai_analysis))
            .bind(session.analysis_degraded)
            .bind(session.screenshots.len() as i32)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Sessions still carrying fallback analysis, oldest first.
    pub async fn list_degraded(pool: &PgPool, limit: i64) -> Result<Vec<WorkSessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM work_sessions \
             WHERE analysis_degraded \
             ORDER BY created_at ASC \
             LIMIT $1"
        );
        sqlx::query_as::<_, WorkSessionRow>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Replace the analysis and clear the degraded flag.
    ///
    /// Returns `true` if the session was found.
    pub async fn update_analysis(
        pool: &PgPool,
        id: DbId,
        analysis: &AiAnalysis,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE work_sessions \
             SET ai_analysis = $2, analysis_degraded = false, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(Json(analysis))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
