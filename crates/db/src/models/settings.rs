//! The singleton `aggregation_settings` row.

use sqlx::types::Json;
use sqlx::FromRow;
use worktrace_core::settings::AggregationSettings;
use worktrace_core::types::Timestamp;

#[derive(Debug, Clone, FromRow)]
pub struct AggregationSettingsRow {
    pub settings: Json<AggregationSettings>,
    pub updated_at: Timestamp,
}
