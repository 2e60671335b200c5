//! Route definitions for work sessions and their screenshots.

use axum::routing::get;
use axum::Router;

use crate::handlers::sessions;
use crate::state::AppState;

/// Session routes mounted at `/sessions`.
///
/// ```text
/// GET /                              -> list_sessions
/// GET /{id}                          -> get_session
/// GET /{id}/screenshots/{index}      -> get_screenshot
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(sessions::list_sessions))
        .route("/{id}", get(sessions::get_session))
        .route("/{id}/screenshots/{index}", get(sessions::get_screenshot))
}
