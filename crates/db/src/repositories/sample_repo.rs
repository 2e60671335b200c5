//! Repository for the raw telemetry tables (`screenshots`,
//! `window_focus_events`, `keystroke_counts`).

use sqlx::{PgConnection, PgPool};
use worktrace_core::samples::{RawSample, SampleKind};
use worktrace_core::types::{DbId, TimeRange};

use crate::models::sample::{FocusEventRow, KeystrokeRow, ScreenshotRow};

const SCREENSHOT_COLUMNS: &str =
    "id, employee_id, captured_at, thumbnail, full_data, capture_type, processing_state";

const FOCUS_COLUMNS: &str = "id, employee_id, application_name, window_title, url, \
     focus_start, focus_end, category, processing_state";

const KEYSTROKE_COLUMNS: &str = "id, employee_id, captured_at, keystroke_count, processing_state";

/// Rows eligible for windowing.
const PENDING: &str = "processing_state = 'pending' AND invalid_reason IS NULL";

/// Table holding samples of `kind`.
pub fn table_for(kind: SampleKind) -> &'static str {
    match kind {
        SampleKind::Screenshot => "screenshots",
        SampleKind::WindowFocus => "window_focus_events",
        SampleKind::Keystroke => "keystroke_counts",
    }
}

/// Column that places a sample of `kind` on the timeline.
fn time_column(kind: SampleKind) -> &'static str {
    match kind {
        SampleKind::WindowFocus => "focus_start",
        SampleKind::Screenshot | SampleKind::Keystroke => "captured_at",
    }
}

fn decode_err(e: worktrace_core::error::CoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

/// Reads and processing-state transitions for raw samples.
pub struct SampleRepo;

impl SampleRepo {
    /// Distinct employees with at least one pending, non-quarantined sample.
    pub async fn employees_with_pending(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        let query = format!(
            "SELECT employee_id FROM screenshots WHERE {PENDING} \
             UNION SELECT employee_id FROM window_focus_events WHERE {PENDING} \
             UNION SELECT employee_id FROM keystroke_counts WHERE {PENDING} \
             ORDER BY employee_id"
        );
        sqlx::query_scalar(&query).fetch_all(pool).await
    }

    /// All pending samples of one employee inside `range`, from every stream.
    ///
    /// The result is unordered; the windower sorts it.
    pub async fn pending_for_employee(
        pool: &PgPool,
        employee_id: DbId,
        range: TimeRange,
    ) -> Result<Vec<RawSample>, sqlx::Error> {
        let mut samples = Vec::new();

        let query = Self::pending_query(SampleKind::Screenshot, SCREENSHOT_COLUMNS);
        for row in sqlx::query_as::<_, ScreenshotRow>(&query)
            .bind(employee_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(pool)
            .await?
        {
            samples.push(RawSample::try_from(row).map_err(decode_err)?);
        }

        let query = Self::pending_query(SampleKind::WindowFocus, FOCUS_COLUMNS);
        for row in sqlx::query_as::<_, FocusEventRow>(&query)
            .bind(employee_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(pool)
            .await?
        {
            samples.push(RawSample::try_from(row).map_err(decode_err)?);
        }

        let query = Self::pending_query(SampleKind::Keystroke, KEYSTROKE_COLUMNS);
        for row in sqlx::query_as::<_, KeystrokeRow>(&query)
            .bind(employee_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(pool)
            .await?
        {
            samples.push(RawSample::try_from(row).map_err(decode_err)?);
        }

        Ok(samples)
    }

    /// Every sample currently linked to a session, from every stream.
    pub async fn for_session(pool: &PgPool, session_id: DbId) -> Result<Vec<RawSample>, sqlx::Error> {
        let mut samples = Vec::new();

        let query = Self::linked_query(SampleKind::Screenshot, SCREENSHOT_COLUMNS);
        for row in sqlx::query_as::<_, ScreenshotRow>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await?
        {
            samples.push(RawSample::try_from(row).map_err(decode_err)?);
        }

        let query = Self::linked_query(SampleKind::WindowFocus, FOCUS_COLUMNS);
        for row in sqlx::query_as::<_, FocusEventRow>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await?
        {
            samples.push(RawSample::try_from(row).map_err(decode_err)?);
        }

        let query = Self::linked_query(SampleKind::Keystroke, KEYSTROKE_COLUMNS);
        for row in sqlx::query_as::<_, KeystrokeRow>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await?
        {
            samples.push(RawSample::try_from(row).map_err(decode_err)?);
        }

        Ok(samples)
    }

    fn linked_query(kind: SampleKind, columns: &str) -> String {
        let table = table_for(kind);
        format!(
            "SELECT {columns} FROM {table} \
             WHERE session_id = $1 AND processing_state = 'aggregated'"
        )
    }

    fn pending_query(kind: SampleKind, columns: &str) -> String {
        let table = table_for(kind);
        let ts = time_column(kind);
        format!(
            "SELECT {columns} FROM {table} \
             WHERE employee_id = $1 AND {PENDING} \
               AND ($2::timestamptz IS NULL OR {ts} >= $2) \
               AND ($3::timestamptz IS NULL OR {ts} < $3)"
        )
    }

    /// Record an `invalid_reason` on pending samples so they stop being
    /// windowed. The processing state is left untouched.
    pub async fn quarantine(
        pool: &PgPool,
        kind: SampleKind,
        ids: &[DbId],
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = table_for(kind);
        let query = format!(
            "UPDATE {table} SET invalid_reason = $2, updated_at = NOW() \
             WHERE id = ANY($1) AND processing_state = 'pending'"
        );
        let result = sqlx::query(&query)
            .bind(ids)
            .bind(reason)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Return every sample linked to `session_id` to pending and unlink it.
    pub async fn release_session(
        conn: &mut PgConnection,
        kind: SampleKind,
        session_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let table = table_for(kind);
        let query = format!(
            "UPDATE {table} \
             SET processing_state = 'pending', session_id = NULL, updated_at = NOW() \
             WHERE session_id = $1 AND processing_state = 'aggregated'"
        );
        let result = sqlx::query(&query)
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Transition pending samples to `aggregated` and link them to a session.
    ///
    /// Returns the number of rows transitioned. Rows that were no longer
    /// pending are skipped, so callers compare the count to `ids.len()`.
    pub async fn mark_aggregated(
        conn: &mut PgConnection,
        kind: SampleKind,
        ids: &[DbId],
        session_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = table_for(kind);
        let query = format!(
            "UPDATE {table} \
             SET processing_state = 'aggregated', session_id = $2, updated_at = NOW() \
             WHERE id = ANY($1) AND processing_state = 'pending'"
        );
        let result = sqlx::query(&query)
            .bind(ids)
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}
