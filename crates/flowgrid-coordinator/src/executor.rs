//! Coordinator executor: the single entry point the daemon drives.
//!
//! Owns one instance of each component, all sharing one client registry
//! and one routing table.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flowgrid_rpc::{ClientRegistry, WorkerConnector};
use flowgrid_state::{
    Lineage, Stream, WorkerRepository, WorkerStreamRepository, WorkerStreamStatus, epoch_secs,
};
use tracing::{debug, error, info, warn};

use crate::assigner::{AssignSummary, StreamAssigner};
use crate::config_builder::ConfigBuilder;
use crate::error::{ConfigResult, CoordinatorResult};
use crate::events::WorkerEvents;
use crate::forwarder::{ForwardedResponse, RequestForwarder};
use crate::monitor::{MonitorSummary, StreamMonitor};
use crate::repositories::Repositories;
use crate::routing::RoutingTable;
use crate::worker_manager::WorkerManager;

pub struct CoordinatorExecutor {
    workers: Arc<WorkerManager>,
    worker_repo: Arc<dyn WorkerRepository>,
    worker_streams: Arc<dyn WorkerStreamRepository>,
    config_builder: ConfigBuilder,
    routing: Arc<RoutingTable>,
    assigner: StreamAssigner,
    monitor: StreamMonitor,
    forwarder: RequestForwarder,
    events: WorkerEvents,
}

impl CoordinatorExecutor {
    /// Wire up every component and rebuild routes from the assignments
    /// persisted as running.
    pub fn new(repos: Repositories, connector: Arc<dyn WorkerConnector>) -> Self {
        let workers = Arc::new(WorkerManager::new(&repos, ClientRegistry::new(connector)));
        let config_builder = ConfigBuilder::new();
        let routing = Arc::new(RoutingTable::new());

        let executor = Self {
            assigner: StreamAssigner::new(
                Arc::clone(&workers),
                &repos,
                config_builder,
                Arc::clone(&routing),
            ),
            monitor: StreamMonitor::new(Arc::clone(&workers), &repos),
            forwarder: RequestForwarder::new(Arc::clone(&workers), &repos, Arc::clone(&routing)),
            events: WorkerEvents::new(Arc::clone(&workers), &repos, Arc::clone(&routing)),
            worker_repo: Arc::clone(&repos.workers),
            worker_streams: Arc::clone(&repos.worker_streams),
            workers,
            config_builder,
            routing,
        };
        executor.restore_routes(repos.worker_streams.as_ref());
        executor
    }

    /// One scheduling tick: health-check workers, then place pending streams.
    pub async fn check_workers_and_assign_streams(&self) -> CoordinatorResult<AssignSummary> {
        self.assigner.assign_streams().await
    }

    /// One monitoring tick.
    pub async fn check_worker_streams(&self) -> CoordinatorResult<MonitorSummary> {
        self.monitor.check_worker_streams().await
    }

    pub async fn forward_request_to_worker(
        &self,
        request: http::Request<Bytes>,
    ) -> CoordinatorResult<ForwardedResponse> {
        self.forwarder.forward_request_to_worker(request).await
    }

    /// Deactivate every active worker that has not sent a heartbeat within
    /// `timeout`. Returns how many were deactivated.
    ///
    /// Heartbeats are stored at second resolution, so a fractional timeout
    /// is rounded up to the next whole second.
    pub fn check_worker_heartbeats(&self, timeout: Duration) -> CoordinatorResult<usize> {
        let timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        let older_than = epoch_secs().saturating_sub(timeout_secs);
        let stale = self.worker_repo.find_active_with_stale_heartbeat(older_than)?;

        let mut deactivated = 0;
        for worker in &stale {
            warn!(
                worker_id = %worker.id,
                last_heartbeat = worker.last_heartbeat,
                "worker heartbeat expired"
            );
            match self.workers.deactivate_worker(&worker.id) {
                Ok(()) => deactivated += 1,
                Err(e) => error!(worker_id = %worker.id, error = %e, "failed to deactivate stale worker"),
            }
        }
        Ok(deactivated)
    }

    /// Stop every running assignment whose lease ran out, dropping its routes
    /// so the stream can be placed again. Returns how many were stopped.
    pub fn check_stream_leases(&self) -> CoordinatorResult<usize> {
        let now = epoch_secs();
        let expired = self.worker_streams.find_running_with_expired_leases(now)?;

        let mut stopped = 0;
        for ws in &expired {
            warn!(
                worker_id = %ws.worker_id,
                stream_id = ws.stream_id,
                worker_stream_id = ws.id,
                expired_secs_ago = now.saturating_sub(ws.lease_expires_at),
                "stream lease expired, marking as stopped"
            );
            if let Err(e) = self
                .worker_streams
                .update_worker_stream_status(ws.id, WorkerStreamStatus::Stopped)
            {
                error!(worker_stream_id = ws.id, error = %e, "failed to stop expired worker stream");
                continue;
            }
            self.routing.remove_worker_stream(ws.id);
            info!(
                worker_id = %ws.worker_id,
                stream_id = ws.stream_id,
                "expired worker stream stopped, stream is available for reassignment"
            );
            stopped += 1;
        }
        Ok(stopped)
    }

    /// Compile-check a stream without assigning it.
    pub fn validate_stream(&self, stream: &Stream) -> ConfigResult<()> {
        self.config_builder.validate_stream(stream)
    }

    pub fn events(&self) -> &WorkerEvents {
        &self.events
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    fn restore_routes(&self, worker_streams: &dyn WorkerStreamRepository) {
        match worker_streams.list_all_by_statuses(&[WorkerStreamStatus::Running]) {
            Ok(running) => {
                for details in &running {
                    debug!(
                        stream_id = details.stream.version_id(),
                        worker_id = %details.worker.id,
                        worker_stream_id = details.worker_stream.id,
                        "restoring route"
                    );
                    self.routing.set_lineage(
                        &details.stream,
                        &details.worker.id,
                        details.worker_stream.id,
                    );
                }
                info!(routes = self.routing.len(), "routing table restored");
            }
            Err(e) => error!(error = %e, "failed to restore routing table"),
        }
    }
}
