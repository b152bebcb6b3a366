//! Stream monitor: reconciles remote worker-stream state into persisted
//! state, once per tick.
//!
//! For each waiting or running assignment:
//!
//! - no client for the worker → `stopped`
//! - stream is the current version → poll `FetchStream`
//!   - call fails → `stopped`
//!   - `completed` / `failed` → stream and assignment both move there
//!   - anything else → still running, untouched
//! - stream was superseded by a newer version → `CompleteStream`, and the
//!   assignment becomes `completed` whether or not the call succeeds

use std::sync::Arc;

use flowgrid_rpc::WorkerRpc;
use flowgrid_state::{
    Lineage, StreamRepository, StreamStatus, WorkerStreamDetails, WorkerStreamRepository,
    WorkerStreamStatus,
};
use tracing::{debug, error, info, warn};

use crate::error::CoordinatorResult;
use crate::repositories::Repositories;
use crate::worker_manager::WorkerManager;

/// What one monitor pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub checked: usize,
    pub still_running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
    pub superseded: usize,
}

enum Outcome {
    StillRunning,
    Completed,
    Failed,
    Stopped,
    Superseded,
}

pub struct StreamMonitor {
    workers: Arc<WorkerManager>,
    streams: Arc<dyn StreamRepository>,
    worker_streams: Arc<dyn WorkerStreamRepository>,
}

impl StreamMonitor {
    pub fn new(workers: Arc<WorkerManager>, repos: &Repositories) -> Self {
        Self {
            workers,
            streams: Arc::clone(&repos.streams),
            worker_streams: Arc::clone(&repos.worker_streams),
        }
    }

    /// Run one monitor pass. Only the initial listing can fail the pass.
    pub async fn check_worker_streams(&self) -> CoordinatorResult<MonitorSummary> {
        let details = self
            .worker_streams
            .list_all_by_statuses(&WorkerStreamStatus::IN_FLIGHT)?;
        debug!(running_worker_stream_count = details.len(), "checking worker streams");

        let mut summary = MonitorSummary {
            checked: details.len(),
            ..Default::default()
        };

        for detail in &details {
            match self.check_one(detail).await {
                Outcome::StillRunning => summary.still_running += 1,
                Outcome::Completed => summary.completed += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Stopped => summary.stopped += 1,
                Outcome::Superseded => summary.superseded += 1,
            }
        }

        Ok(summary)
    }

    async fn check_one(&self, detail: &WorkerStreamDetails) -> Outcome {
        let client = match self.workers.get_worker_client(&detail.worker) {
            Ok(client) => client,
            Err(e) => {
                error!(
                    worker_id = %detail.worker.id,
                    worker_stream_id = detail.worker_stream.id,
                    error = %e,
                    "failed to get worker client"
                );
                self.set_worker_stream(detail, WorkerStreamStatus::Stopped);
                return Outcome::Stopped;
            }
        };

        if detail.stream.is_current() {
            self.check_stream(client.as_ref(), detail).await
        } else {
            self.complete_stream(client.as_ref(), detail).await
        }
    }

    async fn check_stream(&self, client: &dyn WorkerRpc, detail: &WorkerStreamDetails) -> Outcome {
        let ws = &detail.worker_stream;
        let status = match client.fetch_stream_status(ws.id).await {
            Ok(status) => status,
            Err(e) => {
                error!(
                    worker_id = %ws.worker_id,
                    worker_stream_id = ws.id,
                    stream_id = ws.stream_id,
                    error = %e,
                    "failed to perform stream check"
                );
                self.set_worker_stream(detail, WorkerStreamStatus::Stopped);
                return Outcome::Stopped;
            }
        };

        debug!(worker_stream_id = ws.id, %status, "worker stream checked");

        match status {
            WorkerStreamStatus::Completed => {
                self.set_stream(detail, StreamStatus::Completed);
                self.set_worker_stream(detail, WorkerStreamStatus::Completed);
                Outcome::Completed
            }
            WorkerStreamStatus::Failed => {
                self.set_stream(detail, StreamStatus::Failed);
                self.set_worker_stream(detail, WorkerStreamStatus::Failed);
                Outcome::Failed
            }
            _ => {
                debug!(
                    worker_id = %ws.worker_id,
                    worker_stream_id = ws.id,
                    stream_id = ws.stream_id,
                    "worker stream is still running"
                );
                Outcome::StillRunning
            }
        }
    }

    async fn complete_stream(
        &self,
        client: &dyn WorkerRpc,
        detail: &WorkerStreamDetails,
    ) -> Outcome {
        let ws = &detail.worker_stream;
        match client.complete_stream(ws.id).await {
            Ok(message) => info!(
                worker_id = %ws.worker_id,
                worker_stream_id = ws.id,
                response = %message,
                "superseded worker stream completed"
            ),
            Err(e) => warn!(
                worker_id = %ws.worker_id,
                worker_stream_id = ws.id,
                error = %e,
                "complete call for superseded worker stream failed"
            ),
        }
        self.set_worker_stream(detail, WorkerStreamStatus::Completed);
        Outcome::Superseded
    }

    fn set_worker_stream(&self, detail: &WorkerStreamDetails, status: WorkerStreamStatus) {
        let ws = &detail.worker_stream;
        if let Err(e) = self.worker_streams.update_worker_stream_status(ws.id, status) {
            error!(
                worker_id = %ws.worker_id,
                worker_stream_id = ws.id,
                stream_id = ws.stream_id,
                %status,
                error = %e,
                "failed to update worker stream status"
            );
        }
    }

    fn set_stream(&self, detail: &WorkerStreamDetails, status: StreamStatus) {
        let stream_id = detail.worker_stream.stream_id;
        if let Err(e) = self.streams.update_stream_status(stream_id, status) {
            error!(
                worker_stream_id = detail.worker_stream.id,
                stream_id,
                %status,
                error = %e,
                "failed to update stream status"
            );
        }
    }
}
