//! Raw telemetry samples emitted by monitoring agents.
//!
//! Three independent streams (screenshots, window focus intervals and
//! keystroke counts) are modelled as one tagged union so the windower can
//! order them on a single timeline.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::screenshot;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const KIND_SCREENSHOT: &str = "screenshot";
pub const KIND_WINDOW_FOCUS: &str = "window_focus";
pub const KIND_KEYSTROKE: &str = "keystroke";

pub const STATE_PENDING: &str = "pending";
pub const STATE_AGGREGATED: &str = "aggregated";

pub const CAPTURE_SCHEDULED: &str = "scheduled";
pub const CAPTURE_MANUAL: &str = "manual";
pub const CAPTURE_ACTIVITY: &str = "activity";

/// Prefix stored in `invalid_reason` for undecodable samples.
pub const QUARANTINE_MALFORMED_PREFIX: &str = "malformed";
/// `invalid_reason` for samples older than the employee's last session.
pub const QUARANTINE_LATE_ARRIVAL: &str = "late_arrival";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which stream a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Screenshot,
    WindowFocus,
    Keystroke,
}

impl SampleKind {
    /// Return the database string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screenshot => KIND_SCREENSHOT,
            Self::WindowFocus => KIND_WINDOW_FOCUS,
            Self::Keystroke => KIND_KEYSTROKE,
        }
    }

    /// Parse from a string, returning an error for unknown kinds.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            KIND_SCREENSHOT => Ok(Self::Screenshot),
            KIND_WINDOW_FOCUS => Ok(Self::WindowFocus),
            KIND_KEYSTROKE => Ok(Self::Keystroke),
            other => Err(CoreError::Validation(format!("Unknown sample kind: '{other}'"))),
        }
    }
}

/// Processing state of a raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Aggregated,
}

impl ProcessingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => STATE_PENDING,
            Self::Aggregated => STATE_AGGREGATED,
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            STATE_PENDING => Ok(Self::Pending),
            STATE_AGGREGATED => Ok(Self::Aggregated),
            other => Err(CoreError::Validation(format!(
                "Unknown processing state: '{other}'"
            ))),
        }
    }
}

/// Productivity bucket assigned to a focus interval by the agent's rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Productive,
    Neutral,
    Distraction,
    Uncategorized,
}

impl ActivityCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Productive => "productive",
            Self::Neutral => "neutral",
            Self::Distraction => "distraction",
            Self::Uncategorized => "uncategorized",
        }
    }

    /// Lenient parse: anything unrecognised is `Uncategorized`.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "productive" => Self::Productive,
            "neutral" => Self::Neutral,
            "distraction" | "distracting" | "unproductive" => Self::Distraction,
            _ => Self::Uncategorized,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Screenshot capture with both tiers of image data (base64 text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotCapture {
    pub thumbnail: String,
    pub full_data: String,
    pub capture_type: String,
}

/// One window/application focus interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusInterval {
    pub application_name: String,
    pub window_title: String,
    pub url: Option<String>,
    pub focus_start: Timestamp,
    pub focus_end: Timestamp,
    pub category: ActivityCategory,
}

impl FocusInterval {
    /// Focused duration in whole seconds, never negative.
    pub fn duration_secs(&self) -> i64 {
        (self.focus_end - self.focus_start).num_seconds().max(0)
    }

    /// Website key for site accounting: the URL host without a `www.` prefix.
    pub fn site_key(&self) -> Option<String> {
        let raw = self.url.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = url::Url::parse(raw)
            .or_else(|_| url::Url::parse(&format!("https://{raw}")))
            .ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
    }
}

/// Kind-specific sample data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplePayload {
    Screenshot(ScreenshotCapture),
    WindowFocus(FocusInterval),
    Keystroke { count: i64 },
}

// ---------------------------------------------------------------------------
// RawSample
// ---------------------------------------------------------------------------

/// One atomic telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub id: DbId,
    pub employee_id: DbId,
    pub captured_at: Timestamp,
    pub payload: SamplePayload,
    pub state: ProcessingState,
}

/// Stable reference to a sample. Ids are only unique within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRef {
    pub kind: SampleKind,
    pub id: DbId,
}

impl RawSample {
    pub fn kind(&self) -> SampleKind {
        match self.payload {
            SamplePayload::Screenshot(_) => SampleKind::Screenshot,
            SamplePayload::WindowFocus(_) => SampleKind::WindowFocus,
            SamplePayload::Keystroke { .. } => SampleKind::Keystroke,
        }
    }

    pub fn sample_ref(&self) -> SampleRef {
        SampleRef {
            kind: self.kind(),
            id: self.id,
        }
    }

    /// Check that the payload can be aggregated.
    ///
    /// Returns a short human-readable reason when it cannot; the caller
    /// quarantines the sample instead of failing the run.
    pub fn check_well_formed(&self) -> Result<(), String> {
        match &self.payload {
            SamplePayload::Screenshot(shot) => {
                if shot.full_data.trim().is_empty() {
                    return Err("screenshot has no image data".into());
                }
                screenshot::check_payload(&shot.full_data)
                    .map_err(|e| format!("full image: {e}"))?;
                if !shot.thumbnail.trim().is_empty() {
                    screenshot::check_payload(&shot.thumbnail)
                        .map_err(|e| format!("thumbnail: {e}"))?;
                }
                Ok(())
            }
            SamplePayload::WindowFocus(focus) => {
                if focus.focus_end < focus.focus_start {
                    return Err("focus interval ends before it starts".into());
                }
                if focus.application_name.trim().is_empty() {
                    return Err("focus interval has no application name".into());
                }
                Ok(())
            }
            SamplePayload::Keystroke { count } => {
                if *count < 0 {
                    return Err(format!("negative keystroke count {count}"));
                }
                Ok(())
            }
        }
    }
}

/// Why a sample was excluded from windowing while staying `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineReason {
    Malformed(String),
    LateArrival,
}

impl QuarantineReason {
    /// Value persisted in the `invalid_reason` column.
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Malformed(detail) => format!("{QUARANTINE_MALFORMED_PREFIX}: {detail}"),
            Self::LateArrival => QUARANTINE_LATE_ARRIVAL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn focus(url: Option<&str>) -> FocusInterval {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        FocusInterval {
            application_name: "Firefox".into(),
            window_title: "Docs".into(),
            url: url.map(str::to_string),
            focus_start: start,
            focus_end: start + chrono::TimeDelta::seconds(90),
            category: ActivityCategory::Neutral,
        }
    }

    #[test]
    fn site_key_strips_www_and_path() {
        let f = focus(Some("https://www.GitHub.com/org/repo?tab=1"));
        assert_eq!(f.site_key().as_deref(), Some("github.com"));
    }

    #[test]
    fn site_key_accepts_bare_host() {
        let f = focus(Some("news.ycombinator.com/item?id=1"));
        assert_eq!(f.site_key().as_deref(), Some("news.ycombinator.com"));
    }

    #[test]
    fn site_key_none_without_url() {
        assert_eq!(focus(None).site_key(), None);
        assert_eq!(focus(Some("  ")).site_key(), None);
    }

    #[test]
    fn inverted_focus_interval_is_malformed() {
        let mut f = focus(None);
        std::mem::swap(&mut f.focus_start, &mut f.focus_end);
        let sample = RawSample {
            id: 1,
            employee_id: 7,
            captured_at: f.focus_start,
            payload: SamplePayload::WindowFocus(f),
            state: ProcessingState::Pending,
        };
        assert!(sample.check_well_formed().is_err());
    }

    #[test]
    fn negative_keystrokes_are_malformed() {
        let sample = RawSample {
            id: 1,
            employee_id: 7,
            captured_at: Utc::now(),
            payload: SamplePayload::Keystroke { count: -3 },
            state: ProcessingState::Pending,
        };
        assert!(sample.check_well_formed().is_err());
    }

    #[test]
    fn category_labels_are_lenient() {
        assert_eq!(ActivityCategory::from_label("Productive"), ActivityCategory::Productive);
        assert_eq!(ActivityCategory::from_label("unproductive"), ActivityCategory::Distraction);
        assert_eq!(ActivityCategory::from_label("gaming"), ActivityCategory::Uncategorized);
    }

    #[test]
    fn quarantine_reason_db_strings() {
        assert_eq!(QuarantineReason::LateArrival.to_db_string(), "late_arrival");
        assert_eq!(
            QuarantineReason::Malformed("bad base64".into()).to_db_string(),
            "malformed: bad base64"
        );
    }
}
