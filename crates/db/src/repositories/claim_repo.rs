//! Repository for `aggregation_claims`, the per-employee run lease.

use sqlx::PgPool;
use uuid::Uuid;
use worktrace_core::types::DbId;

pub struct ClaimRepo;

impl ClaimRepo {
    /// Take or renew the lease for `employee_id`.
    ///
    /// Succeeds when no lease exists, the existing one has expired, or it is
    /// already held by `run_id`.
    pub async fn try_claim(
        pool: &PgPool,
        employee_id: DbId,
        run_id: Uuid,
        ttl_secs: i64,
    ) -> Result<bool, sqlx::Error> {
        let claimed: Option<DbId> = sqlx::query_scalar(
            "INSERT INTO aggregation_claims (employee_id, run_id, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
             ON CONFLICT (employee_id) DO UPDATE \
                SET run_id = EXCLUDED.run_id, \
                    expires_at = EXCLUDED.expires_at, \
                    updated_at = NOW() \
                WHERE aggregation_claims.expires_at <= NOW() \
                   OR aggregation_claims.run_id = EXCLUDED.run_id \
             RETURNING employee_id",
        )
        .bind(employee_id)
        .bind(run_id)
        .bind(ttl_secs as f64)
        .fetch_optional(pool)
        .await?;
        Ok(claimed.is_some())
    }

    /// Drop the lease if `run_id` still holds it.
    pub async fn release(pool: &PgPool, employee_id: DbId, run_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM aggregation_claims WHERE employee_id = $1 AND run_id = $2")
            .bind(employee_id)
            .bind(run_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
