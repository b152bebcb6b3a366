//! The worker RPC seam and its tonic implementation.
//!
//! The coordinator only sees [`WorkerRpc`] and [`WorkerConnector`]; the
//! gRPC types stay inside this module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flowgrid_state::{Worker, WorkerStreamId, WorkerStreamStatus};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::{RpcError, RpcResult};
use crate::proto;
use crate::proto::worker_client::WorkerClient;

/// An HTTP call to hand to the stream running on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestCall {
    pub worker_stream_id: WorkerStreamId,
    pub method: String,
    /// Sub-path after `/ingest/<stream-id>`, empty when absent.
    pub path: String,
    pub content_type: String,
    pub body: Bytes,
}

/// The worker's answer to an [`IngestCall`], passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReply {
    pub status_code: i32,
    pub body: Bytes,
}

/// Calls the coordinator makes against one worker.
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    async fn health_check(&self) -> RpcResult<()>;

    /// Hand a compiled config to the worker. Returns the worker's ack message.
    async fn assign_stream(
        &self,
        worker_stream_id: WorkerStreamId,
        config: &str,
    ) -> RpcResult<String>;

    async fn fetch_stream_status(
        &self,
        worker_stream_id: WorkerStreamId,
    ) -> RpcResult<WorkerStreamStatus>;

    /// Ask the worker to stop and finalize an assignment.
    async fn complete_stream(&self, worker_stream_id: WorkerStreamId) -> RpcResult<String>;

    async fn ingest(&self, call: IngestCall) -> RpcResult<IngestReply>;
}

/// Opens an RPC client for a worker. Connection is not retried here.
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, worker: &Worker) -> RpcResult<Arc<dyn WorkerRpc>>;
}

// ── gRPC ──────────────────────────────────────────────────────────

/// Connects to workers over gRPC with per-call and connect timeouts.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    rpc_timeout: Duration,
    connect_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(rpc_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            rpc_timeout,
            connect_timeout,
        }
    }
}

impl WorkerConnector for GrpcConnector {
    /// Builds a lazily connecting channel; the first call dials the worker.
    fn connect(&self, worker: &Worker) -> RpcResult<Arc<dyn WorkerRpc>> {
        let uri = if worker.address.contains("://") {
            worker.address.clone()
        } else {
            format!("http://{}", worker.address)
        };
        let endpoint = Endpoint::from_shared(uri).map_err(|e| RpcError::InvalidEndpoint {
            address: worker.address.clone(),
            reason: e.to_string(),
        })?;
        let channel = endpoint
            .timeout(self.rpc_timeout)
            .connect_timeout(self.connect_timeout)
            .connect_lazy();

        debug!(worker_id = %worker.id, address = %worker.address, "worker channel created");
        Ok(Arc::new(GrpcWorkerClient::new(channel)))
    }
}

/// [`WorkerRpc`] over a tonic channel. Cloning the stub per call is cheap
/// and lets calls proceed concurrently on the shared channel.
#[derive(Debug, Clone)]
pub struct GrpcWorkerClient {
    client: WorkerClient<Channel>,
}

impl GrpcWorkerClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: WorkerClient::new(channel),
        }
    }
}

#[async_trait]
impl WorkerRpc for GrpcWorkerClient {
    async fn health_check(&self) -> RpcResult<()> {
        self.client.clone().health_check(()).await?;
        Ok(())
    }

    async fn assign_stream(
        &self,
        worker_stream_id: WorkerStreamId,
        config: &str,
    ) -> RpcResult<String> {
        let response = self
            .client
            .clone()
            .assign_stream(proto::AssignStreamRequest {
                worker_stream_id,
                config: config.to_string(),
            })
            .await?;
        Ok(response.into_inner().message)
    }

    async fn fetch_stream_status(
        &self,
        worker_stream_id: WorkerStreamId,
    ) -> RpcResult<WorkerStreamStatus> {
        let response = self
            .client
            .clone()
            .fetch_stream(proto::FetchStreamRequest { worker_stream_id })
            .await?
            .into_inner();
        let status = proto::WorkerStreamStatus::try_from(response.status)
            .map_err(|_| RpcError::UnknownStatus(response.status))?;
        Ok(status.into())
    }

    async fn complete_stream(&self, worker_stream_id: WorkerStreamId) -> RpcResult<String> {
        let response = self
            .client
            .clone()
            .complete_stream(proto::CompleteStreamRequest { worker_stream_id })
            .await?;
        Ok(response.into_inner().message)
    }

    async fn ingest(&self, call: IngestCall) -> RpcResult<IngestReply> {
        let response = self
            .client
            .clone()
            .ingest(proto::IngestRequest {
                worker_stream_id: call.worker_stream_id,
                method: call.method,
                path: call.path,
                content_type: call.content_type,
                payload: call.body.to_vec(),
            })
            .await?
            .into_inner();
        Ok(IngestReply {
            status_code: response.status_code,
            body: Bytes::from(response.response),
        })
    }
}
