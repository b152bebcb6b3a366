//! Stream assigner: matches pending streams to the least-loaded healthy
//! worker, once per scheduling tick.
//!
//! # Assignment of one stream
//!
//! ```text
//! client for worker ──err──▶ skip (no record)
//! compile config    ──err──▶ skip (no record, stream stays pending)
//! queue `waiting`   ──err──▶ abort the pass (persistence failure)
//! AssignStream RPC  ──err──▶ record → failed, stream retried next tick
//!                   ──ok───▶ route stream + lineage root, worker load += 1
//! ```

use std::sync::Arc;

use flowgrid_state::{Stream, StreamRepository, Worker, WorkerStreamRepository, WorkerStreamStatus};
use tracing::{debug, error, info, warn};

use crate::config_builder::ConfigBuilder;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::repositories::Repositories;
use crate::routing::RoutingTable;
use crate::worker_heap::WorkerHeap;
use crate::worker_manager::WorkerManager;

/// What one assignment pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignSummary {
    pub pending: usize,
    pub assigned: usize,
    pub failed: usize,
}

pub struct StreamAssigner {
    workers: Arc<WorkerManager>,
    streams: Arc<dyn StreamRepository>,
    worker_streams: Arc<dyn WorkerStreamRepository>,
    config_builder: ConfigBuilder,
    routing: Arc<RoutingTable>,
}

impl StreamAssigner {
    pub fn new(
        workers: Arc<WorkerManager>,
        repos: &Repositories,
        config_builder: ConfigBuilder,
        routing: Arc<RoutingTable>,
    ) -> Self {
        Self {
            workers,
            streams: Arc::clone(&repos.streams),
            worker_streams: Arc::clone(&repos.worker_streams),
            config_builder,
            routing,
        }
    }

    /// Run one assignment pass. Per-stream failures are logged and counted;
    /// only persistence failures abort the pass.
    pub async fn assign_streams(&self) -> CoordinatorResult<AssignSummary> {
        let mut heap: WorkerHeap = self.workers.get_healthy_workers().await?.into_iter().collect();

        let streams = self.streams.list_all_active_and_non_assigned().map_err(|e| {
            error!(error = %e, "failed to list active and non-assigned streams");
            e
        })?;

        let mut summary = AssignSummary {
            pending: streams.len(),
            ..Default::default()
        };

        if streams.is_empty() {
            return Ok(summary);
        }
        if heap.is_empty() {
            warn!(waiting_stream_count = streams.len(), "no active workers to assign streams");
            return Ok(summary);
        }

        for stream in &streams {
            let Some(mut worker) = heap.pop() else {
                break;
            };

            let outcome = self.assign_stream_to_worker(&worker, stream).await;
            match outcome {
                Ok(()) => {
                    worker.running_stream_count += 1;
                    summary.assigned += 1;
                }
                Err(e @ CoordinatorError::State(_)) => {
                    heap.push(worker);
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        worker_id = %worker.id,
                        stream_id = stream.id,
                        error = %e,
                        "failed to assign stream"
                    );
                    summary.failed += 1;
                }
            }
            heap.push(worker);
        }

        debug!(?summary, "assignment pass finished");
        Ok(summary)
    }

    async fn assign_stream_to_worker(
        &self,
        worker: &Worker,
        stream: &Stream,
    ) -> CoordinatorResult<()> {
        let client = self.workers.get_worker_client(worker)?;

        let config = self.config_builder.build_stream_config(stream)?.render()?;
        debug!(worker_id = %worker.id, stream_id = stream.id, %config, "config for worker stream");

        let worker_stream = self.worker_streams.queue(&worker.id, stream.id)?;

        let ack = match client.assign_stream(worker_stream.id, &config).await {
            Ok(ack) => ack,
            Err(e) => {
                if let Err(update) = self
                    .worker_streams
                    .update_worker_stream_status(worker_stream.id, WorkerStreamStatus::Failed)
                {
                    warn!(
                        worker_stream_id = worker_stream.id,
                        error = %update,
                        "failed to mark worker stream failed after rejected assignment"
                    );
                }
                return Err(e.into());
            }
        };

        self.routing.set_lineage(stream, &worker.id, worker_stream.id);

        info!(
            worker_id = %worker.id,
            stream_id = stream.id,
            worker_stream_id = worker_stream.id,
            response = %ack,
            "assigned stream to worker"
        );
        Ok(())
    }
}
