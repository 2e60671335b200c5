//! Postgres implementation of [`SessionStore`].

use async_trait::async_trait;
use chrono::TimeDelta;
use sqlx::PgConnection;
use uuid::Uuid;
use worktrace_core::access::EmployeeProfile;
use worktrace_core::samples::{QuarantineReason, RawSample, SampleKind, SampleRef};
use worktrace_core::session::{AiAnalysis, NewSession, ScreenshotMeta, ScreenshotRecord, Session};
use worktrace_core::settings::AggregationSettings;
use worktrace_core::store::{SessionStore, StoreError, WriteOutcome};
use worktrace_core::types::{DbId, TimeRange};

use crate::repositories::{
    ClaimRepo, EmployeeRepo, SampleRepo, ScreenshotRepo, SettingsRepo, WorkSessionRepo,
};
use crate::DbPool;

const KINDS: [SampleKind; 3] = [
    SampleKind::Screenshot,
    SampleKind::WindowFocus,
    SampleKind::Keystroke,
];

/// Split sample refs into per-stream id lists.
fn ids_by_kind(samples: &[SampleRef], kind: SampleKind) -> Vec<DbId> {
    samples
        .iter()
        .filter(|s| s.kind == kind)
        .map(|s| s.id)
        .collect()
}

/// Mark `samples` aggregated against `session_id`, failing if any of them
/// was no longer pending.
async fn link_samples(
    conn: &mut PgConnection,
    samples: &[SampleRef],
    session_id: DbId,
) -> Result<(), StoreError> {
    for kind in KINDS {
        let ids = ids_by_kind(samples, kind);
        let updated = SampleRepo::mark_aggregated(conn, kind, &ids, session_id)
            .await
            .map_err(StoreError::backend)?;
        if updated != ids.len() as u64 {
            return Err(StoreError::SampleConflict(format!(
                "{} of {} {} samples were no longer pending",
                ids.len() as u64 - updated,
                ids.len(),
                kind.as_str(),
            )));
        }
    }
    Ok(())
}

/// [`SessionStore`] backed by a sqlx connection pool.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: DbPool,
}

impl PgSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn load_settings(&self) -> Result<Option<AggregationSettings>, StoreError> {
        let row = SettingsRepo::load(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(|r| r.settings.0))
    }

    async fn save_settings(&self, settings: &AggregationSettings) -> Result<(), StoreError> {
        SettingsRepo::save(&self.pool, settings)
            .await
            .map_err(StoreError::backend)
    }

    async fn find_employee(
        &self,
        employee_id: DbId,
    ) -> Result<Option<EmployeeProfile>, StoreError> {
        let row = EmployeeRepo::find_profile(&self.pool, employee_id)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(EmployeeProfile::from))
    }

    async fn employees_with_pending(&self) -> Result<Vec<DbId>, StoreError> {
        SampleRepo::employees_with_pending(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn employees_with_open_sessions(&self) -> Result<Vec<DbId>, StoreError> {
        WorkSessionRepo::employees_with_open(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn pending_samples(
        &self,
        employee_id: DbId,
        range: TimeRange,
    ) -> Result<Vec<RawSample>, StoreError> {
        SampleRepo::pending_for_employee(&self.pool, employee_id, range)
            .await
            .map_err(StoreError::backend)
    }

    async fn quarantine(
        &self,
        samples: &[SampleRef],
        reason: &QuarantineReason,
    ) -> Result<u64, StoreError> {
        let reason = reason.to_db_string();
        let mut flagged = 0;
        for kind in KINDS {
            let ids = ids_by_kind(samples, kind);
            flagged += SampleRepo::quarantine(&self.pool, kind, &ids, &reason)
                .await
                .map_err(StoreError::backend)?;
        }
        Ok(flagged)
    }

    async fn try_claim(
        &self,
        employee_id: DbId,
        run_id: Uuid,
        ttl: TimeDelta,
    ) -> Result<bool, StoreError> {
        ClaimRepo::try_claim(&self.pool, employee_id, run_id, ttl.num_seconds())
            .await
            .map_err(StoreError::backend)
    }

    async fn release_claim(&self, employee_id: DbId, run_id: Uuid) -> Result<(), StoreError> {
        ClaimRepo::release(&self.pool, employee_id, run_id)
            .await
            .map_err(StoreError::backend)
    }

    async fn latest_session(&self, employee_id: DbId) -> Result<Option<Session>, StoreError> {
        let row = WorkSessionRepo::latest(&self.pool, employee_id)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(Session::from))
    }

    async fn session_samples(&self, session_id: DbId) -> Result<Vec<RawSample>, StoreError> {
        SampleRepo::for_session(&self.pool, session_id)
            .await
            .map_err(StoreError::backend)
    }

    async fn write_session(
        &self,
        session: &NewSession,
        samples: &[SampleRef],
    ) -> Result<WriteOutcome, StoreError> {
        // Dropping `tx` without commit rolls everything back.
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let inserted = WorkSessionRepo::insert_if_absent(&mut tx, session)
            .await
            .map_err(StoreError::backend)?;

        let Some(row) = inserted else {
            let existing =
                WorkSessionRepo::find_by_window(&mut tx, session.employee_id, session.session_start)
                    .await
                    .map_err(StoreError::backend)?
                    .ok_or_else(|| {
                        StoreError::SampleConflict("session window key vanished during write".into())
                    })?;
            tracing::info!(
                session_id = existing.id,
                employee_id = session.employee_id,
                "Session window already taken, nothing written"
            );
            return Ok(WriteOutcome::WindowTaken(Session::from(existing)));
        };

        ScreenshotRepo::insert_all(&mut tx, row.id, &session.screenshots)
            .await
            .map_err(StoreError::backend)?;
        link_samples(&mut tx, samples, row.id).await?;

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(WriteOutcome::Created(Session::from(row)))
    }

    async fn rewrite_session(
        &self,
        session_id: DbId,
        session: &NewSession,
        samples: &[SampleRef],
    ) -> Result<Session, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for kind in KINDS {
            SampleRepo::release_session(&mut tx, kind, session_id)
                .await
                .map_err(StoreError::backend)?;
        }

        let row = WorkSessionRepo::replace_content(&mut tx, session_id, session)
            .await
            .map_err(StoreError::backend)?
            .ok_or_else(|| {
                StoreError::SampleConflict(format!("session {session_id} vanished before rewrite"))
            })?;

        ScreenshotRepo::delete_for_session(&mut tx, session_id)
            .await
            .map_err(StoreError::backend)?;
        ScreenshotRepo::insert_all(&mut tx, session_id, &session.screenshots)
            .await
            .map_err(StoreError::backend)?;
        link_samples(&mut tx, samples, session_id).await?;

        tx.commit().await.map_err(StoreError::backend)?;
        Ok(Session::from(row))
    }

    async fn get_session(&self, session_id: DbId) -> Result<Option<Session>, StoreError> {
        let row = WorkSessionRepo::find_by_id(&self.pool, session_id)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(Session::from))
    }

    async fn list_sessions(
        &self,
        employee_id: DbId,
        range: TimeRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = WorkSessionRepo::list_for_employee(&self.pool, employee_id, range, limit, offset)
            .await
            .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn screenshot_index(&self, session_id: DbId) -> Result<Vec<ScreenshotMeta>, StoreError> {
        let rows = ScreenshotRepo::list_meta(&self.pool, session_id)
            .await
            .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(ScreenshotMeta::from).collect())
    }

    async fn screenshots_full(
        &self,
        session_id: DbId,
    ) -> Result<Vec<ScreenshotRecord>, StoreError> {
        let rows = ScreenshotRepo::list_full(&self.pool, session_id)
            .await
            .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(ScreenshotRecord::from).collect())
    }

    async fn screenshot_at(
        &self,
        session_id: DbId,
        index: i32,
    ) -> Result<Option<ScreenshotRecord>, StoreError> {
        let row = ScreenshotRepo::find_one(&self.pool, session_id, index)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(ScreenshotRecord::from))
    }

    async fn degraded_sessions(&self, limit: i64) -> Result<Vec<Session>, StoreError> {
        let rows = WorkSessionRepo::list_degraded(&self.pool, limit)
            .await
            .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn update_analysis(
        &self,
        session_id: DbId,
        analysis: &AiAnalysis,
    ) -> Result<bool, StoreError> {
        WorkSessionRepo::update_analysis(&self.pool, session_id, analysis)
            .await
            .map_err(StoreError::backend)
    }
}
