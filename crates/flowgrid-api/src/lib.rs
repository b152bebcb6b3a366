//! flowgrid-api: HTTP surface of the coordinator.
//!
//! Proxies ingest traffic to the worker running each stream and accepts
//! worker-originated events.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | ANY | `/ingest/{stream-id}[/subpath]` | Forward to the stream's worker |
//! | POST | `/api/v1/workers` | Register a worker |
//! | DELETE | `/api/v1/workers/{id}` | Deregister a worker |
//! | POST | `/api/v1/workers/{id}/heartbeat` | Record a heartbeat |
//! | POST | `/api/v1/worker-streams/{id}/status` | Report an assignment's status |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, delete, post};
use flowgrid_coordinator::CoordinatorExecutor;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<CoordinatorExecutor>,
}

/// Build the complete API router.
pub fn build_router(executor: Arc<CoordinatorExecutor>) -> Router {
    let state = ApiState { executor };

    let api_routes = Router::new()
        .route("/workers", post(handlers::register_worker))
        .route("/workers/{id}", delete(handlers::deregister_worker))
        .route("/workers/{id}/heartbeat", post(handlers::heartbeat))
        .route("/worker-streams/{id}/status", post(handlers::report_worker_stream_status))
        .with_state(state.clone());

    Router::new()
        .route("/ingest/{*path}", any(handlers::ingest))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
