//! Handlers for reading work sessions and their screenshots.
//!
//! Every endpoint follows the same order: authenticate (extractor), load the
//! session, then authorize against the owner's directory profile. Image data
//! is only loaded by the single-screenshot endpoint or when the caller
//! explicitly asks for `fullScreenshots`.

use std::num::IntErrorKind;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use worktrace_core::access::{authorize_view, EmployeeProfile};
use worktrace_core::error::CoreError;
use worktrace_core::screenshot::normalize_payload;
use worktrace_core::session::{ScreenshotMeta, ScreenshotRecord, Session};
use worktrace_core::types::{DbId, TimeRange, Timestamp};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query parameters for `GET /sessions/{id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailParams {
    #[serde(default)]
    pub full_screenshots: bool,
}

/// Query parameters for `GET /sessions`. Pagination is read separately.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsParams {
    /// Whose sessions to list; defaults to the caller.
    pub user_id: Option<DbId>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

/// A screenshot with normalized (marker-carrying) image payloads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotData {
    pub index: i32,
    pub captured_at: Timestamp,
    pub capture_type: String,
    pub thumbnail: String,
    pub full_data: String,
}

impl From<ScreenshotRecord> for ScreenshotData {
    fn from(record: ScreenshotRecord) -> Self {
        Self {
            index: record.index,
            captured_at: record.captured_at,
            capture_type: record.capture_type,
            thumbnail: normalize_payload(&record.thumbnail),
            full_data: normalize_payload(&record.full_data),
        }
    }
}

/// Screenshot list attached to a session detail response.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SessionScreenshots {
    /// Index only: `{index, capturedAt, captureType}`.
    Index(Vec<ScreenshotMeta>),
    /// Full image data, on explicit request.
    Full(Vec<ScreenshotData>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub screenshots: SessionScreenshots,
}

/// Response of the single-screenshot endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResponse {
    pub session_id: DbId,
    #[serde(flatten)]
    pub screenshot: ScreenshotData,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Directory profile of `employee_id`; unknown employees have no department.
async fn load_profile(state: &AppState, employee_id: DbId) -> AppResult<EmployeeProfile> {
    Ok(state
        .store
        .find_employee(employee_id)
        .await?
        .unwrap_or_else(|| EmployeeProfile::unassigned(employee_id)))
}

/// Load a session and check the caller may read it.
async fn load_authorized_session(
    state: &AppState,
    auth: &AuthUser,
    session_id: DbId,
) -> AppResult<Session> {
    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Session",
            id: session_id,
        }))?;

    let owner = load_profile(state, session.employee_id).await?;
    authorize_view(&auth.requester(), &owner)?;
    Ok(session)
}

/// Parse a path segment as a non-negative screenshot index.
///
/// Digits too large for any integer type saturate; they can only miss.
fn parse_index(raw: &str) -> AppResult<u64> {
    match raw.parse::<u64>() {
        Ok(index) => Ok(index),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Ok(u64::MAX),
        Err(_) => Err(AppError::BadRequest(format!(
            "Screenshot index must be a non-negative integer, got '{raw}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// GET /api/v1/sessions
///
/// List one employee's sessions, newest first. Screenshot data is never
/// included.
pub async fn list_sessions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<ListSessionsParams>,
    Query(page): Query<PaginationParams>,
) -> AppResult<Json<DataResponse<Vec<Session>>>> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(AppError::BadRequest(
                "'from' must not be after 'to'".into(),
            ));
        }
    }

    let employee_id = params.user_id.unwrap_or(auth.user_id);
    let owner = load_profile(&state, employee_id).await?;
    authorize_view(&auth.requester(), &owner)?;

    let range = TimeRange {
        start: params.from,
        end: params.to,
    };
    let sessions = state
        .store
        .list_sessions(employee_id, range, page.limit(), page.offset())
        .await?;

    Ok(Json(DataResponse { data: sessions }))
}

/// GET /api/v1/sessions/{id}
///
/// Session metadata plus its screenshot index. With `?fullScreenshots=true`
/// the screenshots carry their image data.
pub async fn get_session(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(session_id): Path<DbId>,
    Query(params): Query<SessionDetailParams>,
) -> AppResult<Json<DataResponse<SessionDetail>>> {
    let session = load_authorized_session(&state, &auth, session_id).await?;

    let screenshots = if params.full_screenshots {
        tracing::debug!(session_id, user_id = auth.user_id, "Loading full screenshots");
        let records = state.store.screenshots_full(session_id).await?;
        SessionScreenshots::Full(records.into_iter().map(ScreenshotData::from).collect())
    } else {
        SessionScreenshots::Index(state.store.screenshot_index(session_id).await?)
    };

    Ok(Json(DataResponse {
        data: SessionDetail {
            session,
            screenshots,
        },
    }))
}

/// GET /api/v1/sessions/{id}/screenshots/{index}
///
/// Exactly one screenshot with normalized image payloads. Authorization is
/// re-checked on every call.
pub async fn get_screenshot(
    auth: AuthUser,
    State(state): State<AppState>,
    Path((session_id, raw_index)): Path<(DbId, String)>,
) -> AppResult<Json<DataResponse<ScreenshotResponse>>> {
    let index = parse_index(&raw_index)?;
    load_authorized_session(&state, &auth, session_id).await?;

    let not_found = || {
        AppError::Core(CoreError::NotFound {
            entity: "Screenshot",
            id: DbId::try_from(index).unwrap_or(DbId::MAX),
        })
    };
    let Ok(arena_index) = i32::try_from(index) else {
        return Err(not_found());
    };
    let record = state
        .store
        .screenshot_at(session_id, arena_index)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(DataResponse {
        data: ScreenshotResponse {
            session_id,
            screenshot: ScreenshotData::from(record),
        },
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn index_parsing() {
        assert_eq!(parse_index("0").unwrap(), 0);
        assert_eq!(parse_index("12").unwrap(), 12);
        assert_eq!(parse_index("3000000000").unwrap(), 3_000_000_000);
        assert_eq!(parse_index("99999999999999999999999").unwrap(), u64::MAX);
        assert_matches!(parse_index("-1"), Err(AppError::BadRequest(_)));
        assert_matches!(parse_index("first"), Err(AppError::BadRequest(_)));
        assert_matches!(parse_index(""), Err(AppError::BadRequest(_)));
    }
}
