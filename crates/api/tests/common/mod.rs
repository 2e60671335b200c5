#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use worktrace_api::auth::jwt::{generate_access_token, JwtConfig};
use worktrace_api::config::ServerConfig;
use worktrace_api::router::build_app_router;
use tokio_util::sync::CancellationToken;
use worktrace_api::state::AppState;
use worktrace_core::access::EmployeeProfile;
use worktrace_core::session::{
    AiAnalysis, NewSession, ScreenshotRecord, SessionMetrics, SessionStatus,
};
use worktrace_core::store::memory::InMemoryStore;
use worktrace_core::store::SessionStore;
use worktrace_core::types::{DbId, Timestamp};
use worktrace_pipeline::{Aggregator, AggregatorOptions, LocalAnalyzer};

// ---------------------------------------------------------------------------
// Directory fixture
// ---------------------------------------------------------------------------

pub const ADMIN: DbId = 1;
/// Employee in department 3, headed by [`HEAD_OF_ALICE`].
pub const ALICE: DbId = 10;
/// Employee in department 4, headed by [`HEAD_OF_BOB`].
pub const BOB: DbId = 11;
pub const HEAD_OF_ALICE: DbId = 20;
pub const HEAD_OF_BOB: DbId = 21;

/// PNG signature plus IHDR header, base64 encoded without a marker.
pub const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAA";
/// A JPEG payload that already carries its marker.
pub const JPEG_MARKED: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQ==";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        embedded_scheduler: false,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
    }
}

/// In-memory store with the standard two-department directory.
pub fn test_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.add_employee(EmployeeProfile {
        employee_id: ALICE,
        department_id: Some(3),
        department_head_id: Some(HEAD_OF_ALICE),
    });
    store.add_employee(EmployeeProfile {
        employee_id: BOB,
        department_id: Some(4),
        department_head_id: Some(HEAD_OF_BOB),
    });
    Arc::new(store)
}

/// Build the full application router over `store`, with the same middleware
/// stack production uses.
pub fn build_test_app(store: Arc<InMemoryStore>) -> Router {
    let config = test_config();
    let aggregator = Aggregator::new(
        store.clone(),
        Arc::new(LocalAnalyzer),
        AggregatorOptions::default(),
    );

    let state = AppState {
        store,
        aggregator: Arc::new(aggregator),
        config: Arc::new(config.clone()),
        shutdown: CancellationToken::new(),
    };

    build_app_router(state, &config)
}

/// Mint an access token accepted by [`test_config`].
pub fn token(user_id: DbId, role: &str) -> String {
    generate_access_token(user_id, role, &test_config().jwt).unwrap()
}

// ---------------------------------------------------------------------------
// Session fixture
// ---------------------------------------------------------------------------

/// 2026-03-02 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

/// Persist a closed one-hour session starting at `start` with two
/// screenshots: a bare PNG and a marked JPEG.
pub async fn seed_session(store: &InMemoryStore, employee_id: DbId, start: Timestamp) -> DbId {
    let shot = |index: i32, minute: i64, thumbnail: &str, full_data: &str| ScreenshotRecord {
        index,
        sample_id: DbId::from(index) + 100,
        captured_at: start + chrono::TimeDelta::minutes(minute),
        capture_type: "scheduled".into(),
        thumbnail: thumbnail.into(),
        full_data: full_data.into(),
    };

    let session = NewSession {
        employee_id,
        session_start: start,
        session_end: start + chrono::TimeDelta::hours(1),
        status: SessionStatus::Closed,
        metrics: SessionMetrics {
            active_secs: 3000,
            idle_secs: 600,
            productivity_score: 64.0,
            ..SessionMetrics::default()
        },
        ai_analysis: AiAnalysis {
            summary: "Focused work".into(),
            score: 64.0,
            tips: vec![],
            insights: vec![],
        },
        analysis_degraded: false,
        screenshots: vec![
            shot(0, 5, PNG_B64, PNG_B64),
            shot(1, 35, JPEG_MARKED, JPEG_MARKED),
        ],
    };

    store
        .write_session(&session, &[])
        .await
        .unwrap()
        .session()
        .id
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a request, optionally authenticated and with a JSON body.
pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

/// Unauthenticated `GET`.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

/// Authenticated `GET`.
pub async fn get_as(app: Router, uri: &str, bearer: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(bearer), None).await
}

/// Authenticated `POST` with a JSON body.
pub async fn post_json(
    app: Router,
    uri: &str,
    bearer: &str,
    body: serde_json::Value,
) -> Response<Body> {
    send(app, Method::POST, uri, Some(bearer), Some(body)).await
}

/// Authenticated `PUT` with a JSON body.
pub async fn put_json(
    app: Router,
    uri: &str,
    bearer: &str,
    body: serde_json::Value,
) -> Response<Body> {
    send(app, Method::PUT, uri, Some(bearer), Some(body)).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
