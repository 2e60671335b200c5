//! Route definitions for aggregation settings.

use axum::routing::get;
use axum::Router;

use crate::handlers::aggregation;
use crate::state::AppState;

/// Aggregation routes mounted at `/aggregation`.
///
/// ```text
/// GET /settings   -> get_settings
/// PUT /settings   -> update_settings
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/settings",
        get(aggregation::get_settings).put(aggregation::update_settings),
    )
}
