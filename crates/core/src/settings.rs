//! Aggregation thresholds and scoring weights.
//!
//! These are runtime-tunable: the aggregator reads the persisted row at the
//! start of every run, so changing them never requires restarting the
//! scheduler. [`AggregationSettings::from_env`] supplies the defaults used
//! when nothing has been persisted yet.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::samples::ActivityCategory;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default maximum gap between consecutive samples of one session.
pub const DEFAULT_MAX_IDLE_GAP_MINS: i64 = 10;

/// Default maximum elapsed span of one session (8 hours).
pub const DEFAULT_MAX_SESSION_SPAN_MINS: i64 = 8 * 60;

/// Default number of entries kept in `top_apps` / `top_websites`.
pub const DEFAULT_TOP_N: usize = 5;

pub const DEFAULT_WEIGHT_PRODUCTIVE: f64 = 100.0;
pub const DEFAULT_WEIGHT_NEUTRAL: f64 = 50.0;
pub const DEFAULT_WEIGHT_DISTRACTION: f64 = 10.0;
pub const DEFAULT_WEIGHT_UNCATEGORIZED: f64 = 50.0;

/// Upper bound accepted for either threshold (7 days).
const MAX_THRESHOLD_MINS: i64 = 7 * 24 * 60;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-category weights used by the productivity score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWeights {
    pub productive: f64,
    pub neutral: f64,
    pub distraction: f64,
    pub uncategorized: f64,
}

impl CategoryWeights {
    /// Weight applied to time spent in `category`.
    pub fn weight_for(&self, category: ActivityCategory) -> f64 {
        match category {
            ActivityCategory::Productive => self.productive,
            ActivityCategory::Neutral => self.neutral,
            ActivityCategory::Distraction => self.distraction,
            ActivityCategory::Uncategorized => self.uncategorized,
        }
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            productive: DEFAULT_WEIGHT_PRODUCTIVE,
            neutral: DEFAULT_WEIGHT_NEUTRAL,
            distraction: DEFAULT_WEIGHT_DISTRACTION,
            uncategorized: DEFAULT_WEIGHT_UNCATEGORIZED,
        }
    }
}

/// Windowing thresholds and scoring knobs for one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSettings {
    pub max_idle_gap_mins: i64,
    pub max_session_span_mins: i64,
    pub weights: CategoryWeights,
    pub top_n: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            max_idle_gap_mins: DEFAULT_MAX_IDLE_GAP_MINS,
            max_session_span_mins: DEFAULT_MAX_SESSION_SPAN_MINS,
            weights: CategoryWeights::default(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl AggregationSettings {
    /// Load defaults from environment variables.
    ///
    /// | Env Var                 | Default |
    /// |-------------------------|---------|
    /// | `MAX_IDLE_GAP_MINS`     | `10`    |
    /// | `MAX_SESSION_SPAN_MINS` | `480`   |
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(v) = env_i64("MAX_IDLE_GAP_MINS") {
            settings.max_idle_gap_mins = v;
        }
        if let Some(v) = env_i64("MAX_SESSION_SPAN_MINS") {
            settings.max_session_span_mins = v;
        }
        if let Err(e) = settings.validate() {
            tracing::warn!(error = %e, "Invalid aggregation settings in environment, using defaults");
            return Self::default();
        }
        settings
    }

    pub fn max_idle_gap(&self) -> TimeDelta {
        TimeDelta::minutes(self.max_idle_gap_mins)
    }

    pub fn max_session_span(&self) -> TimeDelta {
        TimeDelta::minutes(self.max_session_span_mins)
    }

    /// Check thresholds and weights for internal consistency.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_idle_gap_mins <= 0 || self.max_idle_gap_mins > MAX_THRESHOLD_MINS {
            return Err(CoreError::Validation(format!(
                "max_idle_gap_mins must be between 1 and {MAX_THRESHOLD_MINS}"
            )));
        }
        if self.max_session_span_mins <= 0 || self.max_session_span_mins > MAX_THRESHOLD_MINS {
            return Err(CoreError::Validation(format!(
                "max_session_span_mins must be between 1 and {MAX_THRESHOLD_MINS}"
            )));
        }
        if self.max_idle_gap_mins > self.max_session_span_mins {
            return Err(CoreError::Validation(
                "max_idle_gap_mins must not exceed max_session_span_mins".into(),
            ));
        }
        let w = &self.weights;
        for (name, value) in [
            ("productive", w.productive),
            ("neutral", w.neutral),
            ("distraction", w.distraction),
            ("uncategorized", w.uncategorized),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CoreError::Validation(format!(
                    "weight '{name}' must be within 0..=100, got {value}"
                )));
            }
        }
        if self.top_n == 0 {
            return Err(CoreError::Validation("top_n must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply a partial update, returning the merged settings after validation.
    pub fn merged(&self, update: &UpdateAggregationSettings) -> Result<Self, CoreError> {
        update
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let mut next = self.clone();
        if let Some(v) = update.max_idle_gap_mins {
            next.max_idle_gap_mins = v;
        }
        if let Some(v) = update.max_session_span_mins {
            next.max_session_span_mins = v;
        }
        if let Some(v) = update.weight_productive {
            next.weights.productive = v;
        }
        if let Some(v) = update.weight_neutral {
            next.weights.neutral = v;
        }
        if let Some(v) = update.weight_distraction {
            next.weights.distraction = v;
        }
        if let Some(v) = update.weight_uncategorized {
            next.weights.uncategorized = v;
        }
        if let Some(v) = update.top_n {
            next.top_n = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// DTO for `PUT /aggregation/settings`. All fields are optional.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAggregationSettings {
    #[validate(range(min = 1, max = 10080))]
    pub max_idle_gap_mins: Option<i64>,
    #[validate(range(min = 1, max = 10080))]
    pub max_session_span_mins: Option<i64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub weight_productive: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub weight_neutral: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub weight_distraction: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub weight_uncategorized: Option<f64>,
    #[validate(range(min = 1, max = 50))]
    pub top_n: Option<usize>,
}

fn env_i64(name: &str) -> Option<i64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring non-numeric setting");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
