use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use worktrace_core::store::SessionStore;
use worktrace_pipeline::Aggregator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Session storage (Postgres in production, in-memory in tests).
    pub store: Arc<dyn SessionStore>,
    /// Aggregation pipeline used by on-demand `POST /aggregate`.
    pub aggregator: Arc<Aggregator>,
    /// Server configuration (accessed by middleware and handlers).
    pub config: Arc<ServerConfig>,
    /// Cancelled at shutdown; stops on-demand sweeps between employees.
    pub shutdown: CancellationToken,
}
