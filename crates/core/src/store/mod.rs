//! Storage seam for the aggregation pipeline and the session query service.
//!
//! [`SessionStore`] is injected into the aggregator and the HTTP state so
//! both can run against Postgres in production and [`memory::InMemoryStore`]
//! in tests. Implementations must make [`SessionStore::write_session`] and
//! [`SessionStore::rewrite_session`] atomic: either the session, its
//! screenshots and every sample transition are persisted together, or
//! nothing is.

pub mod memory;

use async_trait::async_trait;
use chrono::TimeDelta;
use uuid::Uuid;

use crate::access::EmployeeProfile;
use crate::samples::{QuarantineReason, RawSample, SampleRef};
use crate::session::{AiAnalysis, NewSession, ScreenshotMeta, ScreenshotRecord, Session};
use crate::settings::AggregationSettings;
use crate::types::{DbId, TimeRange};

/// Errors surfaced by a [`SessionStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A contributing sample was no longer pending when the write ran; the
    /// whole write was rolled back.
    #[error("Sample conflict: {0}")]
    SampleConflict(String),

    /// The underlying storage backend failed.
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Result of persisting one session.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// A new session row was inserted.
    Created(Session),
    /// Another session already occupies the window key. Nothing was written
    /// and the samples are still pending.
    WindowTaken(Session),
}

impl WriteOutcome {
    pub fn session(&self) -> &Session {
        match self {
            Self::Created(s) | Self::WindowTaken(s) => s,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Created(s) | Self::WindowTaken(s) => s,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Liveness check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    // -- settings ----------------------------------------------------------

    /// Persisted runtime settings, if any have been saved.
    async fn load_settings(&self) -> Result<Option<AggregationSettings>, StoreError>;

    async fn save_settings(&self, settings: &AggregationSettings) -> Result<(), StoreError>;

    // -- directory ---------------------------------------------------------

    async fn find_employee(&self, employee_id: DbId)
        -> Result<Option<EmployeeProfile>, StoreError>;

    // -- raw samples -------------------------------------------------------

    /// Employees with at least one pending, non-quarantined sample.
    async fn employees_with_pending(&self) -> Result<Vec<DbId>, StoreError>;

    /// Employees whose latest session is still `open`.
    async fn employees_with_open_sessions(&self) -> Result<Vec<DbId>, StoreError>;

    /// Pending, non-quarantined samples for one employee within `range`.
    async fn pending_samples(
        &self,
        employee_id: DbId,
        range: TimeRange,
    ) -> Result<Vec<RawSample>, StoreError>;

    /// Flag samples so they are excluded from windowing; they stay pending.
    async fn quarantine(
        &self,
        samples: &[SampleRef],
        reason: &QuarantineReason,
    ) -> Result<u64, StoreError>;

    // -- claims ------------------------------------------------------------

    /// Try to take the per-employee aggregation lease. Returns `false` when
    /// another unexpired run holds it.
    async fn try_claim(
        &self,
        employee_id: DbId,
        run_id: Uuid,
        ttl: TimeDelta,
    ) -> Result<bool, StoreError>;

    /// Release the lease if it is still held by `run_id`.
    async fn release_claim(&self, employee_id: DbId, run_id: Uuid) -> Result<(), StoreError>;

    // -- sessions ----------------------------------------------------------

    /// The employee's latest persisted session (greatest end, then start).
    async fn latest_session(&self, employee_id: DbId) -> Result<Option<Session>, StoreError>;

    /// Samples currently linked to a session.
    async fn session_samples(&self, session_id: DbId) -> Result<Vec<RawSample>, StoreError>;

    /// Atomically persist a session and mark `samples` aggregated.
    ///
    /// Returns [`WriteOutcome::WindowTaken`] without side effects when a
    /// session with the same `(employee_id, session_start)` exists.
    async fn write_session(
        &self,
        session: &NewSession,
        samples: &[SampleRef],
    ) -> Result<WriteOutcome, StoreError>;

    /// Atomically replace an existing session's content.
    ///
    /// Every sample linked to the session is released back to pending, the
    /// row (end, status, metrics, analysis) and its screenshot arena are
    /// replaced, then `samples` are marked aggregated against it. The window
    /// key `(employee_id, session_start)` is left unchanged.
    async fn rewrite_session(
        &self,
        session_id: DbId,
        session: &NewSession,
        samples: &[SampleRef],
    ) -> Result<Session, StoreError>;

    async fn get_session(&self, session_id: DbId) -> Result<Option<Session>, StoreError>;

    /// Sessions for one employee starting inside `range`, newest first.
    async fn list_sessions(
        &self,
        employee_id: DbId,
        range: TimeRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StoreError>;

    /// Screenshot listing projection: never loads image data.
    async fn screenshot_index(&self, session_id: DbId) -> Result<Vec<ScreenshotMeta>, StoreError>;

    /// Every screenshot of a session with image data (export/admin use).
    async fn screenshots_full(&self, session_id: DbId)
        -> Result<Vec<ScreenshotRecord>, StoreError>;

    /// Exactly one screenshot by arena key.
    async fn screenshot_at(
        &self,
        session_id: DbId,
        index: i32,
    ) -> Result<Option<ScreenshotRecord>, StoreError>;

    /// Sessions whose enrichment fell back, oldest first.
    async fn degraded_sessions(&self, limit: i64) -> Result<Vec<Session>, StoreError>;

    /// Store a successful enrichment and clear the degraded flag.
    async fn update_analysis(
        &self,
        session_id: DbId,
        analysis: &AiAnalysis,
    ) -> Result<bool, StoreError>;
}
