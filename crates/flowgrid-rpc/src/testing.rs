//! In-process fakes for the worker RPC seam.
//!
//! [`FakeCluster`] is a [`WorkerConnector`] handing out one scriptable
//! [`FakeWorker`] per worker id. Each fake records the calls it receives so
//! tests can assert on what the coordinator sent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use flowgrid_state::{Worker, WorkerStreamId, WorkerStreamStatus};

use crate::client::{IngestCall, IngestReply, WorkerConnector, WorkerRpc};
use crate::error::{RpcError, RpcResult};

#[derive(Default)]
pub struct FakeCluster {
    workers: Mutex<HashMap<String, Arc<FakeWorker>>>,
    refused: Mutex<HashSet<String>>,
    connects: Mutex<HashMap<String, u32>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fake behind `worker_id`, created healthy on first use.
    pub fn worker(&self, worker_id: &str) -> Arc<FakeWorker> {
        lock(&self.workers)
            .entry(worker_id.to_string())
            .or_insert_with(|| Arc::new(FakeWorker::new(worker_id)))
            .clone()
    }

    /// Make `connect` fail for `worker_id`.
    pub fn refuse(&self, worker_id: &str) {
        lock(&self.refused).insert(worker_id.to_string());
    }

    pub fn accept(&self, worker_id: &str) {
        lock(&self.refused).remove(worker_id);
    }

    pub fn connect_count(&self, worker_id: &str) -> u32 {
        lock(&self.connects).get(worker_id).copied().unwrap_or(0)
    }
}

impl WorkerConnector for FakeCluster {
    fn connect(&self, worker: &Worker) -> RpcResult<Arc<dyn WorkerRpc>> {
        *lock(&self.connects).entry(worker.id.clone()).or_default() += 1;
        if lock(&self.refused).contains(&worker.id) {
            return Err(RpcError::Unavailable(format!("{} refused connection", worker.id)));
        }
        Ok(self.worker(&worker.id))
    }
}

// ── FakeWorker ────────────────────────────────────────────────────

pub struct FakeWorker {
    id: String,
    state: Mutex<FakeState>,
}

struct FakeState {
    healthy: bool,
    fail_assign: bool,
    fail_fetch: bool,
    fail_complete: bool,
    statuses: HashMap<WorkerStreamId, WorkerStreamStatus>,
    assigned: Vec<(WorkerStreamId, String)>,
    completed: Vec<WorkerStreamId>,
    ingested: Vec<IngestCall>,
    ingest_reply: IngestReply,
}

impl FakeWorker {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(FakeState {
                healthy: true,
                fail_assign: false,
                fail_fetch: false,
                fail_complete: false,
                statuses: HashMap::new(),
                assigned: Vec::new(),
                completed: Vec::new(),
                ingested: Vec::new(),
                ingest_reply: IngestReply {
                    status_code: 200,
                    body: Bytes::from_static(b"ok"),
                },
            }),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        lock(&self.state).healthy = healthy;
    }

    pub fn fail_assign(&self, fail: bool) {
        lock(&self.state).fail_assign = fail;
    }

    pub fn fail_fetch(&self, fail: bool) {
        lock(&self.state).fail_fetch = fail;
    }

    pub fn fail_complete(&self, fail: bool) {
        lock(&self.state).fail_complete = fail;
    }

    /// Script what `fetch_stream_status` reports for an assignment.
    pub fn set_status(&self, worker_stream_id: WorkerStreamId, status: WorkerStreamStatus) {
        lock(&self.state).statuses.insert(worker_stream_id, status);
    }

    pub fn set_ingest_reply(&self, status_code: i32, body: &'static [u8]) {
        lock(&self.state).ingest_reply = IngestReply {
            status_code,
            body: Bytes::from_static(body),
        };
    }

    /// `(worker_stream_id, config)` for every accepted assignment.
    pub fn assigned(&self) -> Vec<(WorkerStreamId, String)> {
        lock(&self.state).assigned.clone()
    }

    pub fn completed(&self) -> Vec<WorkerStreamId> {
        lock(&self.state).completed.clone()
    }

    pub fn ingested(&self) -> Vec<IngestCall> {
        lock(&self.state).ingested.clone()
    }

    fn unavailable(&self, what: &str) -> RpcError {
        RpcError::Call {
            code: tonic::Code::Unavailable,
            message: format!("{} {what} failed", self.id),
        }
    }
}

#[async_trait]
impl WorkerRpc for FakeWorker {
    async fn health_check(&self) -> RpcResult<()> {
        if lock(&self.state).healthy {
            Ok(())
        } else {
            Err(self.unavailable("health check"))
        }
    }

    async fn assign_stream(
        &self,
        worker_stream_id: WorkerStreamId,
        config: &str,
    ) -> RpcResult<String> {
        let mut state = lock(&self.state);
        if state.fail_assign {
            return Err(self.unavailable("assign"));
        }
        state.assigned.push((worker_stream_id, config.to_string()));
        state
            .statuses
            .insert(worker_stream_id, WorkerStreamStatus::Running);
        Ok("assigned".to_string())
    }

    async fn fetch_stream_status(
        &self,
        worker_stream_id: WorkerStreamId,
    ) -> RpcResult<WorkerStreamStatus> {
        let state = lock(&self.state);
        if state.fail_fetch {
            return Err(self.unavailable("fetch"));
        }
        state
            .statuses
            .get(&worker_stream_id)
            .copied()
            .ok_or_else(|| RpcError::Call {
                code: tonic::Code::NotFound,
                message: format!("worker stream {worker_stream_id} unknown to {}", self.id),
            })
    }

    async fn complete_stream(&self, worker_stream_id: WorkerStreamId) -> RpcResult<String> {
        let mut state = lock(&self.state);
        state.completed.push(worker_stream_id);
        if state.fail_complete {
            return Err(self.unavailable("complete"));
        }
        state
            .statuses
            .insert(worker_stream_id, WorkerStreamStatus::Completed);
        Ok("completed".to_string())
    }

    async fn ingest(&self, call: IngestCall) -> RpcResult<IngestReply> {
        let mut state = lock(&self.state);
        if !state.healthy {
            return Err(self.unavailable("ingest"));
        }
        state.ingested.push(call);
        Ok(state.ingest_reply.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
