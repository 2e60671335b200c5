//! Rows of the `session_screenshots` arena.

use sqlx::FromRow;
use worktrace_core::session::{ScreenshotMeta, ScreenshotRecord};
use worktrace_core::types::{DbId, Timestamp};

/// Listing projection. Deliberately has no image columns.
#[derive(Debug, Clone, FromRow)]
pub struct ScreenshotMetaRow {
    pub idx: i32,
    pub captured_at: Timestamp,
    pub capture_type: String,
}

/// A full row including both image tiers.
#[derive(Debug, Clone, FromRow)]
pub struct SessionScreenshotRow {
    pub session_id: DbId,
    pub idx: i32,
    pub sample_id: DbId,
    pub captured_at: Timestamp,
    pub capture_type: String,
    pub thumbnail: String,
    pub full_data: String,
}

impl From<ScreenshotMetaRow> for ScreenshotMeta {
    fn from(row: ScreenshotMetaRow) -> Self {
        Self {
            index: row.idx,
            captured_at: row.captured_at,
            capture_type: row.capture_type,
        }
    }
}

impl From<SessionScreenshotRow> for ScreenshotRecord {
    fn from(row: SessionScreenshotRow) -> Self {
        Self {
            index: row.idx,
            sample_id: row.sample_id,
            captured_at: row.captured_at,
            capture_type: row.capture_type,
            thumbnail: row.thumbnail,
            full_data: row.full_data,
        }
    }
}
