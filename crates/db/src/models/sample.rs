//! Rows of the three raw telemetry tables.

use sqlx::FromRow;
use worktrace_core::error::CoreError;
use worktrace_core::samples::{
    ActivityCategory, FocusInterval, ProcessingState, RawSample, SamplePayload, ScreenshotCapture,
};
use worktrace_core::types::{DbId, Timestamp};

/// A row from the `screenshots` table.
#[derive(Debug, Clone, FromRow)]
pub struct ScreenshotRow {
    pub id: DbId,
    pub employee_id: DbId,
    pub captured_at: Timestamp,
    pub thumbnail: String,
    pub full_data: String,
    pub capture_type: String,
    pub processing_state: String,
}

/// A row from the `window_focus_events` table.
#[derive(Debug, Clone, FromRow)]
pub struct FocusEventRow {
    pub id: DbId,
    pub employee_id: DbId,
    pub application_name: String,
    pub window_title: String,
    pub url: Option<String>,
    pub focus_start: Timestamp,
    pub focus_end: Timestamp,
    pub category: String,
    pub processing_state: String,
}

/// A row from the `keystroke_counts` table.
#[derive(Debug, Clone, FromRow)]
pub struct KeystrokeRow {
    pub id: DbId,
    pub employee_id: DbId,
    pub captured_at: Timestamp,
    pub keystroke_count: i64,
    pub processing_state: String,
}

impl TryFrom<ScreenshotRow> for RawSample {
    type Error = CoreError;

    fn try_from(row: ScreenshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            employee_id: row.employee_id,
            captured_at: row.captured_at,
            state: ProcessingState::parse(&row.processing_state)?,
            payload: SamplePayload::Screenshot(ScreenshotCapture {
                thumbnail: row.thumbnail,
                full_data: row.full_data,
                capture_type: row.capture_type,
            }),
        })
    }
}

impl TryFrom<FocusEventRow> for RawSample {
    type Error = CoreError;

    /// A focus interval is placed on the timeline at its start.
    fn try_from(row: FocusEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            employee_id: row.employee_id,
            captured_at: row.focus_start,
            state: ProcessingState::parse(&row.processing_state)?,
            payload: SamplePayload::WindowFocus(FocusInterval {
                application_name: row.application_name,
                window_title: row.window_title,
                url: row.url,
                focus_start: row.focus_start,
                focus_end: row.focus_end,
                category: ActivityCategory::from_label(&row.category),
            }),
        })
    }
}

impl TryFrom<KeystrokeRow> for RawSample {
    type Error = CoreError;

    fn try_from(row: KeystrokeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            employee_id: row.employee_id,
            captured_at: row.captured_at,
            state: ProcessingState::parse(&row.processing_state)?,
            payload: SamplePayload::Keystroke {
                count: row.keystroke_count,
            },
        })
    }
}
