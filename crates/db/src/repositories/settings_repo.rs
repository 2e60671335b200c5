//! Repository for the singleton `aggregation_settings` row.

use sqlx::types::Json;
use sqlx::PgPool;
use worktrace_core::settings::AggregationSettings;

use crate::models::settings::AggregationSettingsRow;

pub struct SettingsRepo;

impl SettingsRepo {
    pub async fn load(pool: &PgPool) -> Result<Option<AggregationSettingsRow>, sqlx::Error> {
        sqlx::query_as::<_, AggregationSettingsRow>(
            "SELECT settings, updated_at FROM aggregation_settings WHERE id = 1",
        )
        .fetch_optional(pool)
        .await
    }

    /// Insert or replace the settings row.
    pub async fn save(pool: &PgPool, settings: &AggregationSettings) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO aggregation_settings (id, settings) VALUES (1, $1) \
             ON CONFLICT (id) DO UPDATE SET settings = EXCLUDED.settings, updated_at = NOW()",
        )
        .bind(Json(settings))
        .execute(pool)
        .await?;
        Ok(())
    }
}
