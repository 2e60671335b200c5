pub mod aggregation;
pub mod health;
pub mod sessions;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /aggregate                                   trigger aggregation (POST)
///
/// /aggregation/settings                        get, update (admin only)
///
/// /sessions                                    list (?userId, from, to, limit, offset)
/// /sessions/{id}                               get (?fullScreenshots)
/// /sessions/{id}/screenshots/{index}           single screenshot with image data
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/aggregate", post(handlers::aggregation::aggregate))
        .nest("/aggregation", aggregation::router())
        .nest("/sessions", sessions::router())
}
