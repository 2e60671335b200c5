//! Repository for the `session_screenshots` arena.

use sqlx::{PgConnection, PgPool};
use worktrace_core::session::ScreenshotRecord;
use worktrace_core::types::DbId;

use crate::models::screenshot::{ScreenshotMetaRow, SessionScreenshotRow};

/// Metadata columns only. Image columns must never be added here.
const META_COLUMNS: &str = "idx, captured_at, capture_type";

const FULL_COLUMNS: &str =
    "session_id, idx, sample_id, captured_at, capture_type, thumbnail, full_data";

pub struct ScreenshotRepo;

impl ScreenshotRepo {
    /// Store every screenshot of a new or rebuilt session.
    pub async fn insert_all(
        conn: &mut PgConnection,
        session_id: DbId,
        screenshots: &[ScreenshotRecord],
    ) -> Result<(), sqlx::Error> {
        for shot in screenshots {
            sqlx::query(
                "INSERT INTO session_screenshots \
                    (session_id, idx, sample_id, captured_at, capture_type, thumbnail, full_data) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(session_id)
            .bind(shot.index)
            .bind(shot.sample_id)
            .bind(shot.captured_at)
            .bind(&shot.capture_type)
            .bind(&shot.thumbnail)
            .bind(&shot.full_data)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Drop a session's arena before it is rebuilt.
    pub async fn delete_for_session(
        conn: &mut PgConnection,
        session_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM session_screenshots WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Listing projection ordered by index.
    pub async fn list_meta(
        pool: &PgPool,
        session_id: DbId,
    ) -> Result<Vec<ScreenshotMetaRow>, sqlx::Error> {
        let query = format!(
            "SELECT {META_COLUMNS} FROM session_screenshots \
             WHERE session_id = $1 ORDER BY idx"
        );
        sqlx::query_as::<_, ScreenshotMetaRow>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_full(
        pool: &PgPool,
        session_id: DbId,
    ) -> Result<Vec<SessionScreenshotRow>, sqlx::Error> {
        let query = format!(
            "SELECT {FULL_COLUMNS} FROM session_screenshots \
             WHERE session_id = $1 ORDER BY idx"
        );
        sqlx::query_as::<_, SessionScreenshotRow>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await
    }

    /// Exactly one screenshot, by primary key.
    pub async fn find_one(
        pool: &PgPool,
        session_id: DbId,
        idx: i32,
    ) -> Result<Option<SessionScreenshotRow>, sqlx::Error> {
        let query = format!(
            "SELECT {FULL_COLUMNS} FROM session_screenshots \
             WHERE session_id = $1 AND idx = $2"
        );
        sqlx::query_as::<_, SessionScreenshotRow>(&query)
            .bind(session_id)
            .bind(idx)
            .fetch_optional(pool)
            .await
    }
}
