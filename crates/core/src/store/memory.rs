//! In-process [`SessionStore`] used by tests and local tooling.
//!
//! All state sits behind one mutex, so every trait method is trivially
//! atomic. Write failures can be injected with
//! [`InMemoryStore::fail_next_writes`] to exercise the writer's rollback
//! path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use uuid::Uuid;

use super::{SessionStore, StoreError, WriteOutcome};
use crate::access::EmployeeProfile;
use crate::samples::{ProcessingState, QuarantineReason, RawSample, SampleKind, SamplePayload, SampleRef};
use crate::session::{
    duration_minutes, AiAnalysis, NewSession, ScreenshotMeta, ScreenshotRecord, Session,
    SessionStatus,
};
use crate::settings::AggregationSettings;
use crate::types::{DbId, TimeRange, Timestamp};

/// Observable state of one stored sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleStatus {
    pub state: ProcessingState,
    pub invalid_reason: Option<String>,
    pub session_id: Option<DbId>,
}

#[derive(Debug)]
struct StoredSample {
    sample: RawSample,
    invalid_reason: Option<String>,
    session_id: Option<DbId>,
}

#[derive(Debug, Default)]
struct State {
    samples: BTreeMap<SampleRef, StoredSample>,
    next_sample_id: HashMap<SampleKind, DbId>,
    sessions: BTreeMap<DbId, Session>,
    screenshots: HashMap<DbId, Vec<ScreenshotRecord>>,
    next_session_id: DbId,
    claims: HashMap<DbId, (Uuid, Timestamp)>,
    employees: HashMap<DbId, EmployeeProfile>,
    settings: Option<AggregationSettings>,
    failing_writes: u32,
}

impl State {
    fn take_injected_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::backend(std::io::Error::other(
                "injected write failure",
            )));
        }
        Ok(())
    }

    /// Validate every transition before mutating anything.
    fn check_pending(&self, samples: &[SampleRef]) -> Result<(), StoreError> {
        for sample_ref in samples {
            match self.samples.get(sample_ref) {
                Some(s) if s.sample.state == ProcessingState::Pending => {}
                _ => {
                    return Err(StoreError::SampleConflict(format!(
                        "{} sample {} is not pending",
                        sample_ref.kind.as_str(),
                        sample_ref.id
                    )))
                }
            }
        }
        Ok(())
    }

    fn link(&mut self, samples: &[SampleRef], session_id: DbId) {
        for sample_ref in samples {
            if let Some(stored) = self.samples.get_mut(sample_ref) {
                stored.sample.state = ProcessingState::Aggregated;
                stored.session_id = Some(session_id);
            }
        }
    }
}

fn stored_session(id: DbId, session: &NewSession, created_at: Timestamp) -> Session {
    Session {
        id,
        employee_id: session.employee_id,
        session_start: session.session_start,
        session_end: session.session_end,
        duration_minutes: session.duration_minutes(),
        status: session.status,
        metrics: session.metrics.clone(),
        ai_analysis: Some(session.ai_analysis.clone()),
        analysis_degraded: session.analysis_degraded,
        screenshot_count: session.screenshots.len() as i32,
        created_at,
    }
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a directory entry.
    pub fn add_employee(&self, profile: EmployeeProfile) {
        self.state().employees.insert(profile.employee_id, profile);
    }

    /// Ingest a pending sample, assigning the next id of its stream.
    pub fn insert_sample(
        &self,
        employee_id: DbId,
        captured_at: Timestamp,
        payload: SamplePayload,
    ) -> RawSample {
        let mut state = self.state();
        let mut sample = RawSample {
            id: 0,
            employee_id,
            captured_at,
            payload,
            state: ProcessingState::Pending,
        };
        let next = state.next_sample_id.entry(sample.kind()).or_insert(0);
        *next += 1;
        sample.id = *next;
        state.samples.insert(
            sample.sample_ref(),
            StoredSample {
                sample: sample.clone(),
                invalid_reason: None,
                session_id: None,
            },
        );
        sample
    }

    pub fn sample_status(&self, sample: SampleRef) -> Option<SampleStatus> {
        self.state().samples.get(&sample).map(|s| SampleStatus {
            state: s.sample.state,
            invalid_reason: s.invalid_reason.clone(),
            session_id: s.session_id,
        })
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Make the next `n` session writes or rewrites fail without side effects.
    pub fn fail_next_writes(&self, n: u32) {
        self.state().failing_writes = n;
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_settings(&self) -> Result<Option<AggregationSettings>, StoreError> {
        Ok(self.state().settings.clone())
    }

    async fn save_settings(&self, settings: &AggregationSettings) -> Result<(), StoreError> {
        self.state().settings = Some(settings.clone());
        Ok(())
    }

    async fn find_employee(
        &self,
        employee_id: DbId,
    ) -> Result<Option<EmployeeProfile>, StoreError> {
        Ok(self.state().employees.get(&employee_id).cloned())
    }

    async fn employees_with_pending(&self) -> Result<Vec<DbId>, StoreError> {
        let mut ids: Vec<DbId> = self
            .state()
            .samples
            .values()
            .filter(|s| s.sample.state == ProcessingState::Pending && s.invalid_reason.is_none())
            .map(|s| s.sample.employee_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn employees_with_open_sessions(&self) -> Result<Vec<DbId>, StoreError> {
        let state = self.state();
        let mut latest: BTreeMap<DbId, &Session> = BTreeMap::new();
        for session in state.sessions.values() {
            let entry = latest.entry(session.employee_id).or_insert(session);
            if (session.session_end, session.session_start) > (entry.session_end, entry.session_start) {
                *entry = session;
            }
        }
        Ok(latest
            .into_iter()
            .filter(|(_, s)| s.status == SessionStatus::Open)
            .map(|(id, _)| id)
            .collect())
    }

    async fn pending_samples(
        &self,
        employee_id: DbId,
        range: TimeRange,
    ) -> Result<Vec<RawSample>, StoreError> {
        Ok(self
            .state()
            .samples
            .values()
            .filter(|s| {
                s.sample.employee_id == employee_id
                    && s.sample.state == ProcessingState::Pending
                    && s.invalid_reason.is_none()
                    && range.contains(s.sample.captured_at)
            })
            .map(|s| s.sample.clone())
            .collect())
    }

    async fn quarantine(
        &self,
        samples: &[SampleRef],
        reason: &QuarantineReason,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        let mut flagged = 0;
        for sample_ref in samples {
            if let Some(stored) = state.samples.get_mut(sample_ref) {
                if stored.sample.state == ProcessingState::Pending {
                    stored.invalid_reason = Some(reason.to_db_string());
                    flagged += 1;
                }
            }
        }
        Ok(flagged)
    }

    async fn try_claim(
        &self,
        employee_id: DbId,
        run_id: Uuid,
        ttl: TimeDelta,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut state = self.state();
        if let Some((holder, expires_at)) = state.claims.get(&employee_id) {
            if *holder != run_id && *expires_at > now {
                return Ok(false);
            }
        }
        state.claims.insert(employee_id, (run_id, now + ttl));
        Ok(true)
    }

    async fn release_claim(&self, employee_id: DbId, run_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.claims.get(&employee_id).map(|(holder, _)| *holder) == Some(run_id) {
            state.claims.remove(&employee_id);
        }
        Ok(())
    }

    async fn latest_session(&self, employee_id: DbId) -> Result<Option<Session>, StoreError> {
        Ok(self
            .state()
            .sessions
            .values()
            .filter(|s| s.employee_id == employee_id)
            .max_by_key(|s| (s.session_end, s.session_start))
            .cloned())
    }

    async fn session_samples(&self, session_id: DbId) -> Result<Vec<RawSample>, StoreError> {
        Ok(self
            .state()
            .samples
            .values()
            .filter(|s| s.session_id == Some(session_id))
            .map(|s| s.sample.clone())
            .collect())
    }

    async fn write_session(
        &self,
        session: &NewSession,
        samples: &[SampleRef],
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state();
        state.take_injected_failure()?;
        state.check_pending(samples)?;

        let existing = state
            .sessions
            .values()
            .find(|s| s.employee_id == session.employee_id && s.session_start == session.session_start)
            .cloned();
        if let Some(found) = existing {
            return Ok(WriteOutcome::WindowTaken(found));
        }

        state.next_session_id += 1;
        let id = state.next_session_id;
        let stored = stored_session(id, session, Utc::now());
        state.sessions.insert(id, stored.clone());
        state.screenshots.insert(id, session.screenshots.clone());
        state.link(samples, id);
        Ok(WriteOutcome::Created(stored))
    }

    async fn rewrite_session(
        &self,
        session_id: DbId,
        session: &NewSession,
        samples: &[SampleRef],
    ) -> Result<Session, StoreError> {
        let mut state = self.state();
        state.take_injected_failure()?;

        let Some(current) = state.sessions.get(&session_id).cloned() else {
            return Err(StoreError::SampleConflict(format!(
                "session {session_id} vanished before rewrite"
            )));
        };
        for sample_ref in samples {
            match state.samples.get(sample_ref) {
                Some(s)
                    if s.sample.state == ProcessingState::Pending
                        || s.session_id == Some(session_id) => {}
                _ => {
                    return Err(StoreError::SampleConflict(format!(
                        "{} sample {} belongs to another session",
                        sample_ref.kind.as_str(),
                        sample_ref.id
                    )))
                }
            }
        }

        for stored in state.samples.values_mut() {
            if stored.session_id == Some(session_id) {
                stored.sample.state = ProcessingState::Pending;
                stored.session_id = None;
            }
        }

        let mut updated = stored_session(session_id, session, current.created_at);
        updated.session_start = current.session_start;
        updated.duration_minutes = duration_minutes(updated.session_start, updated.session_end);
        state.sessions.insert(session_id, updated.clone());
        state.screenshots.insert(session_id, session.screenshots.clone());
        state.link(samples, session_id);
        Ok(updated)
    }

    async fn get_session(&self, session_id: DbId) -> Result<Option<Session>, StoreError> {
        Ok(self.state().sessions.get(&session_id).cloned())
    }

    async fn list_sessions(
        &self,
        employee_id: DbId,
        range: TimeRange,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .state()
            .sessions
            .values()
            .filter(|s| s.employee_id == employee_id && range.contains(s.session_start))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.session_start.cmp(&a.session_start));
        Ok(sessions
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn screenshot_index(&self, session_id: DbId) -> Result<Vec<ScreenshotMeta>, StoreError> {
        Ok(self
            .state()
            .screenshots
            .get(&session_id)
            .map(|shots| shots.iter().map(ScreenshotRecord::meta).collect())
            .unwrap_or_default())
    }

    async fn screenshots_full(
        &self,
        session_id: DbId,
    ) -> Result<Vec<ScreenshotRecord>, StoreError> {
        Ok(self
            .state()
            .screenshots
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn screenshot_at(
        &self,
        session_id: DbId,
        index: i32,
    ) -> Result<Option<ScreenshotRecord>, StoreError> {
        Ok(self
            .state()
            .screenshots
            .get(&session_id)
            .and_then(|shots| shots.iter().find(|s| s.index == index).cloned()))
    }

    async fn degraded_sessions(&self, limit: i64) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .state()
            .sessions
            .values()
            .filter(|s| s.analysis_degraded)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn update_analysis(
        &self,
        session_id: DbId,
        analysis: &AiAnalysis,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.sessions.get_mut(&session_id) {
            Some(session) => {
                session.ai_analysis = Some(analysis.clone());
                session.analysis_degraded = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
