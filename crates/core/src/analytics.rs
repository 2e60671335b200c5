//! Session analytics synthesis.
//!
//! Turns one [`SampleGroup`] into [`SessionMetrics`], and provides the
//! deterministic fallback analysis used whenever the external analyzer is
//! unavailable.

use indexmap::IndexMap;
use serde::Serialize;

use crate::samples::{ActivityCategory, SamplePayload};
use crate::session::{
    duration_minutes, AiAnalysis, CategoryBreakdown, KeystrokeSummary, ScreenshotRecord, Session,
    SessionMetrics, UsageEntry,
};
use crate::settings::{AggregationSettings, CategoryWeights};
use crate::types::{DbId, Timestamp};
use crate::windowing::SampleGroup;

/// Score used when a session has no categorizable focus time.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Distraction share (of focused time) above which the fallback suggests a tip.
const DISTRACTION_TIP_SHARE: f64 = 0.25;

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Compute all aggregate fields for one group.
pub fn synthesize(group: &SampleGroup, settings: &AggregationSettings) -> SessionMetrics {
    let mut app_usage: IndexMap<String, i64> = IndexMap::new();
    let mut site_usage: IndexMap<String, i64> = IndexMap::new();
    let mut breakdown = CategoryBreakdown::default();
    let mut keystrokes = KeystrokeSummary::default();
    let mut active_secs: i64 = 0;

    for sample in &group.samples {
        match &sample.payload {
            SamplePayload::WindowFocus(focus) => {
                let secs = focus.duration_secs();
                active_secs += secs;
                *app_usage.entry(focus.application_name.clone()).or_insert(0) += secs;
                if let Some(site) = focus.site_key() {
                    *site_usage.entry(site).or_insert(0) += secs;
                }
                match focus.category {
                    ActivityCategory::Productive => breakdown.productive_secs += secs,
                    ActivityCategory::Neutral => breakdown.neutral_secs += secs,
                    ActivityCategory::Distraction => breakdown.distraction_secs += secs,
                    ActivityCategory::Uncategorized => breakdown.uncategorized_secs += secs,
                }
            }
            SamplePayload::Keystroke { count } => {
                keystrokes.total_keystrokes += count;
                keystrokes.sample_count += 1;
            }
            SamplePayload::Screenshot(_) => {}
        }
    }

    let session_secs = (group.end - group.start).num_seconds().max(0);
    let idle_secs = (session_secs - active_secs).max(0);
    if active_secs > 0 {
        keystrokes.keys_per_active_minute =
            round2(keystrokes.total_keystrokes as f64 / (active_secs as f64 / 60.0));
    }

    SessionMetrics {
        top_apps: top_n(&app_usage, settings.top_n),
        top_websites: top_n(&site_usage, settings.top_n),
        app_usage_summary: app_usage,
        website_visit_summary: site_usage,
        keystroke_summary: keystrokes,
        category_breakdown: breakdown,
        active_secs,
        idle_secs,
        productivity_score: productivity_score(&breakdown, &settings.weights),
    }
}

/// Weighted category score normalized by total categorized time, in `[0, 100]`.
pub fn productivity_score(breakdown: &CategoryBreakdown, weights: &CategoryWeights) -> f64 {
    let total = breakdown.total_secs();
    if total <= 0 {
        return NEUTRAL_SCORE;
    }
    let weighted = weights.weight_for(ActivityCategory::Productive) * breakdown.productive_secs as f64
        + weights.weight_for(ActivityCategory::Neutral) * breakdown.neutral_secs as f64
        + weights.weight_for(ActivityCategory::Distraction) * breakdown.distraction_secs as f64
        + weights.weight_for(ActivityCategory::Uncategorized) * breakdown.uncategorized_secs as f64;
    round2((weighted / total as f64).clamp(0.0, 100.0))
}

/// Top `n` entries by duration; ties keep first-seen (insertion) order.
pub fn top_n(usage: &IndexMap<String, i64>, n: usize) -> Vec<UsageEntry> {
    let mut entries: Vec<UsageEntry> = usage
        .iter()
        .map(|(name, secs)| UsageEntry {
            name: name.clone(),
            duration_secs: *secs,
        })
        .collect();
    // `sort_by` is stable, so equal durations stay in insertion order.
    entries.sort_by(|a, b| b.duration_secs.cmp(&a.duration_secs));
    entries.truncate(n);
    entries
}

/// Build the screenshot arena rows for a group, indexed in capture order.
pub fn screenshot_records(group: &SampleGroup) -> Vec<ScreenshotRecord> {
    group
        .samples
        .iter()
        .filter_map(|sample| match &sample.payload {
            SamplePayload::Screenshot(shot) => Some((sample, shot)),
            _ => None,
        })
        .enumerate()
        .map(|(index, (sample, shot))| ScreenshotRecord {
            index: index as i32,
            sample_id: sample.id,
            captured_at: sample.captured_at,
            capture_type: shot.capture_type.clone(),
            thumbnail: shot.thumbnail.clone(),
            full_data: shot.full_data.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Analyzer input
// ---------------------------------------------------------------------------

/// Compact signal set sent to the external analyzer. Never carries images.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSignals {
    pub employee_id: DbId,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub duration_minutes: i64,
    pub active_secs: i64,
    pub idle_secs: i64,
    pub productivity_score: f64,
    pub top_apps: Vec<UsageEntry>,
    pub top_websites: Vec<UsageEntry>,
    pub category_breakdown: CategoryBreakdown,
    pub total_keystrokes: i64,
    pub screenshot_count: usize,
}

impl SessionSignals {
    pub fn new(
        employee_id: DbId,
        session_start: Timestamp,
        session_end: Timestamp,
        metrics: &SessionMetrics,
        screenshot_count: usize,
    ) -> Self {
        Self {
            employee_id,
            session_start,
            session_end,
            duration_minutes: duration_minutes(session_start, session_end),
            active_secs: metrics.active_secs,
            idle_secs: metrics.idle_secs,
            productivity_score: metrics.productivity_score,
            top_apps: metrics.top_apps.clone(),
            top_websites: metrics.top_websites.clone(),
            category_breakdown: metrics.category_breakdown,
            total_keystrokes: metrics.keystroke_summary.total_keystrokes,
            screenshot_count,
        }
    }

    /// Rebuild signals from a stored session (used when retrying enrichment).
    pub fn from_session(session: &Session) -> Self {
        Self::new(
            session.employee_id,
            session.session_start,
            session.session_end,
            &session.metrics,
            session.screenshot_count.max(0) as usize,
        )
    }
}

// ---------------------------------------------------------------------------
// Fallback analysis
// ---------------------------------------------------------------------------

/// Deterministic analysis derived only from local metrics.
pub fn fallback_analysis(signals: &SessionSignals) -> AiAnalysis {
    let session_secs = signals.active_secs + signals.idle_secs;
    let mut summary = format!(
        "Session of {} with {} active and {} idle.",
        format_duration(session_secs),
        format_duration(signals.active_secs),
        format_duration(signals.idle_secs),
    );
    if let Some(top) = signals.top_apps.first() {
        summary.push_str(&format!(
            " Most time spent in {} ({}).",
            top.name,
            format_duration(top.duration_secs)
        ));
    }
    summary.push_str(&format!(
        " Productivity score {:.0}/100.",
        signals.productivity_score
    ));

    let focused = signals.category_breakdown.total_secs();
    let mut tips = Vec::new();
    if focused > 0 {
        let share = signals.category_breakdown.distraction_secs as f64 / focused as f64;
        if share > DISTRACTION_TIP_SHARE {
            tips.push(format!(
                "Distracting activity took {:.0}% of focused time; consider scheduling it outside work blocks.",
                share * 100.0
            ));
        }
    }
    if signals.idle_secs > signals.active_secs {
        tips.push("Idle time exceeded active time; shorter focused blocks with planned breaks may help.".into());
    }
    if tips.is_empty() {
        tips.push("Keep the current focus pattern.".into());
    }

    let mut insights = Vec::new();
    if let Some(top) = signals.top_apps.first() {
        insights.push(format!("Top application: {}", top.name));
    }
    if !signals.top_websites.is_empty() {
        insights.push(format!("Websites visited: {}", signals.top_websites.len()));
    }
    insights.push(format!("Keystrokes recorded: {}", signals.total_keystrokes));
    insights.push(format!("Screenshots captured: {}", signals.screenshot_count));

    AiAnalysis {
        summary,
        score: signals.productivity_score,
        tips,
        insights,
    }
}

/// Human-readable `1h 05m` / `12m` / `45s` rendering.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
