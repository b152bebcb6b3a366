//! HTTP handlers.
//!
//! Worker endpoints return the JSON envelope `{success, data?, error?}`.
//! Ingest replies carry the worker's status code and body unchanged.

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowgrid_coordinator::CoordinatorError;
use flowgrid_state::{StateError, WorkerStreamStatus};
use tracing::{debug, warn};

use crate::ApiState;

/// Largest ingest body buffered before forwarding.
pub const MAX_INGEST_BODY: usize = 16 * 1024 * 1024;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Map a coordinator failure onto the status a caller can act on.
pub fn status_for(error: &CoordinatorError) -> StatusCode {
    match error {
        CoordinatorError::InvalidPath(_) | CoordinatorError::MalformedStreamId(_) => {
            StatusCode::BAD_REQUEST
        }
        CoordinatorError::StreamNotFound(_)
        | CoordinatorError::WorkerNotFound(_)
        | CoordinatorError::WorkerStreamNotFound(_) => StatusCode::NOT_FOUND,
        CoordinatorError::StreamUnassigned(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::Rpc(_) => StatusCode::BAD_GATEWAY,
        CoordinatorError::State(StateError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        CoordinatorError::State(e) if e.is_not_found() => StatusCode::NOT_FOUND,
        CoordinatorError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoordinatorError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn coordinator_error(error: CoordinatorError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(error = %error, %status, "request failed");
    } else {
        debug!(error = %error, %status, "request rejected");
    }
    error_response(&error.to_string(), status)
}

// ── Ingest ─────────────────────────────────────────────────────

/// ANY /ingest/{stream-id}[/subpath]
pub async fn ingest(State(state): State<ApiState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_INGEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(
                &format!("failed to read request body: {e}"),
                StatusCode::PAYLOAD_TOO_LARGE,
            );
        }
    };

    let forwarded = axum::http::Request::from_parts(parts, body);
    match state.executor.forward_request_to_worker(forwarded).await {
        Ok(reply) => {
            let status = u16::try_from(reply.status_code)
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok());
            match status {
                Some(status) => (status, Body::from(reply.body)).into_response(),
                None => {
                    warn!(status_code = reply.status_code, "worker replied with invalid status code");
                    error_response("worker replied with an invalid status code", StatusCode::BAD_GATEWAY)
                }
            }
        }
        Err(e) => coordinator_error(e),
    }
}

// ── Workers ────────────────────────────────────────────────────

/// Register request body.
#[derive(serde::Deserialize)]
pub struct RegisterWorkerRequest {
    pub id: String,
    pub address: String,
}

/// POST /api/v1/workers
pub async fn register_worker(
    State(state): State<ApiState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> Response {
    if req.id.trim().is_empty() || req.address.trim().is_empty() {
        return error_response("worker id and address are required", StatusCode::BAD_REQUEST);
    }
    match state.executor.events().register_worker(&req.id, &req.address) {
        Ok(worker) => (StatusCode::CREATED, ApiResponse::ok(worker)).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// DELETE /api/v1/workers/{id}
pub async fn deregister_worker(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.executor.events().deregister_worker(&id) {
        Ok(()) => ApiResponse::ok("deregistered").into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /api/v1/workers/{id}/heartbeat
pub async fn heartbeat(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.executor.events().heartbeat(&id) {
        Ok(()) => ApiResponse::ok("ok").into_response(),
        Err(e) => coordinator_error(e),
    }
}

// ── Worker streams ─────────────────────────────────────────────

/// Status report body.
#[derive(serde::Deserialize)]
pub struct StatusReport {
    pub status: WorkerStreamStatus,
}

/// POST /api/v1/worker-streams/{id}/status
pub async fn report_worker_stream_status(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(report): Json<StatusReport>,
) -> Response {
    match state
        .executor
        .events()
        .report_worker_stream_status(id, report.status)
    {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "worker_stream_id": id,
            "status": report.status,
        }))
        .into_response(),
        Err(e) => coordinator_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use flowgrid_coordinator::{CoordinatorExecutor, Repositories};
    use flowgrid_rpc::RpcError;
    use flowgrid_rpc::testing::FakeCluster;
    use flowgrid_state::StateStore;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let executor = CoordinatorExecutor::new(
            Repositories::from_store(store),
            Arc::new(FakeCluster::new()),
        );
        ApiState {
            executor: Arc::new(executor),
        }
    }

    fn register_request(id: &str) -> RegisterWorkerRequest {
        RegisterWorkerRequest {
            id: id.to_string(),
            address: "10.0.0.1:50051".to_string(),
        }
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            status_for(&CoordinatorError::InvalidPath("/x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoordinatorError::MalformedStreamId("abc".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&CoordinatorError::StreamNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&CoordinatorError::StreamUnassigned(1)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CoordinatorError::Rpc(RpcError::Unavailable("down".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&CoordinatorError::State(StateError::NotFound("w".into()))),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn register_creates_worker() {
        let state = test_state();
        let resp = register_worker(State(state), Json(register_request("w-1"))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn register_requires_id_and_address() {
        let state = test_state();
        let resp = register_worker(State(state), Json(register_request(" "))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_unknown_worker() {
        let state = test_state();
        let resp = heartbeat(State(state), Path("ghost".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deregister_registered_worker() {
        let state = test_state();
        register_worker(State(state.clone()), Json(register_request("w-1"))).await;

        let resp = deregister_worker(State(state), Path("w-1".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deregister_unknown_worker() {
        let state = test_state();
        let resp = deregister_worker(State(state), Path("ghost".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_report_for_unknown_assignment() {
        let state = test_state();
        let resp = report_worker_stream_status(
            State(state),
            Path(9),
            Json(StatusReport {
                status: WorkerStreamStatus::Running,
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
