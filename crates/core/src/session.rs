//! Work-session domain types.
//!
//! A session is a synthesized, time-bounded aggregate of one employee's raw
//! samples. Screenshot image data is deliberately kept out of [`Session`]:
//! it lives in a separate arena keyed by `(session_id, index)` and is only
//! loaded through [`ScreenshotRecord`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

pub const STATUS_OPEN: &str = "open";
pub const STATUS_CLOSED: &str = "closed";

/// Whether a session's window may still have been growing when it was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => STATUS_OPEN,
            Self::Closed => STATUS_CLOSED,
        }
    }

    /// Lenient parse; anything other than `open` is treated as closed.
    pub fn from_db(s: &str) -> Self {
        if s == STATUS_OPEN {
            Self::Open
        } else {
            Self::Closed
        }
    }
}

/// One `(name, seconds)` entry of a top-N ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub name: String,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystrokeSummary {
    pub total_keystrokes: i64,
    pub sample_count: i64,
    pub keys_per_active_minute: f64,
}

/// Seconds of focus time per productivity bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub productive_secs: i64,
    pub neutral_secs: i64,
    pub distraction_secs: i64,
    pub uncategorized_secs: i64,
}

impl CategoryBreakdown {
    pub fn total_secs(&self) -> i64 {
        self.productive_secs + self.neutral_secs + self.distraction_secs + self.uncategorized_secs
    }
}

/// Aggregate analytics derived from one sample group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub app_usage_summary: IndexMap<String, i64>,
    pub website_visit_summary: IndexMap<String, i64>,
    pub top_apps: Vec<UsageEntry>,
    pub top_websites: Vec<UsageEntry>,
    pub keystroke_summary: KeystrokeSummary,
    pub category_breakdown: CategoryBreakdown,
    pub active_secs: i64,
    pub idle_secs: i64,
    pub productivity_score: f64,
}

/// Natural-language enrichment (from the external analyzer or the fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    pub summary: String,
    pub score: f64,
    #[serde(default)]
    pub tips: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
}

/// Listing projection of a screenshot: no image data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotMeta {
    pub index: i32,
    pub captured_at: Timestamp,
    pub capture_type: String,
}

/// A screenshot with both tiers of image data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub index: i32,
    pub sample_id: DbId,
    pub captured_at: Timestamp,
    pub capture_type: String,
    pub thumbnail: String,
    pub full_data: String,
}

impl ScreenshotRecord {
    pub fn meta(&self) -> ScreenshotMeta {
        ScreenshotMeta {
            index: self.index,
            captured_at: self.captured_at,
            capture_type: self.capture_type.clone(),
        }
    }
}

/// A persisted work session (metadata only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: DbId,
    pub employee_id: DbId,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    #[serde(flatten)]
    pub metrics: SessionMetrics,
    pub ai_analysis: Option<AiAnalysis>,
    pub analysis_degraded: bool,
    pub screenshot_count: i32,
    pub created_at: Timestamp,
}

/// Everything the writer persists for one new session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub employee_id: DbId,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub status: SessionStatus,
    pub metrics: SessionMetrics,
    pub ai_analysis: AiAnalysis,
    pub analysis_degraded: bool,
    pub screenshots: Vec<ScreenshotRecord>,
}

impl NewSession {
    /// Whole minutes between start and end.
    pub fn duration_minutes(&self) -> i64 {
        duration_minutes(self.session_start, self.session_end)
    }
}

/// Whole minutes between two instants, never negative.
pub fn duration_minutes(start: Timestamp, end: Timestamp) -> i64 {
    (end - start).num_minutes().max(0)
}
