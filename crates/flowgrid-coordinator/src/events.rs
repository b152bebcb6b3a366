//! Worker-originated events: registration, heartbeats, and status reports
//! pushed back by a worker for one of its assignments.

use std::sync::Arc;

use flowgrid_state::{
    STREAM_LEASE_SECS, StreamRepository, StreamStatus, Worker, WorkerRepository, WorkerStreamId,
    WorkerStreamRepository, WorkerStreamStatus, epoch_secs,
};
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::repositories::Repositories;
use crate::routing::RoutingTable;
use crate::worker_manager::WorkerManager;

pub struct WorkerEvents {
    workers: Arc<WorkerManager>,
    worker_repo: Arc<dyn WorkerRepository>,
    streams: Arc<dyn StreamRepository>,
    worker_streams: Arc<dyn WorkerStreamRepository>,
    routing: Arc<RoutingTable>,
}

impl WorkerEvents {
    pub fn new(workers: Arc<WorkerManager>, repos: &Repositories, routing: Arc<RoutingTable>) -> Self {
        Self {
            workers,
            worker_repo: Arc::clone(&repos.workers),
            streams: Arc::clone(&repos.streams),
            worker_streams: Arc::clone(&repos.worker_streams),
            routing,
        }
    }

    /// Add a worker or bring an inactive one back at `address`.
    ///
    /// A returning worker, or one whose address moved, gets a fresh client
    /// on its next use.
    pub fn register_worker(&self, worker_id: &str, address: &str) -> CoordinatorResult<Worker> {
        let previous = self.worker_repo.find_worker(worker_id)?;

        if let Some(existing) = &previous {
            if existing.is_active() && existing.address == address {
                debug!(%worker_id, "worker already registered");
            } else {
                self.workers.evict_client(worker_id);
            }
        }

        let stored = self
            .worker_repo
            .add_or_activate(&Worker::new(worker_id, address))?;

        info!(
            %worker_id,
            %address,
            returning = previous.is_some(),
            "worker registered"
        );
        Ok(stored)
    }

    /// Graceful leave. Same path as a failed health probe.
    pub fn deregister_worker(&self, worker_id: &str) -> CoordinatorResult<()> {
        self.workers.deactivate_worker(worker_id)?;
        info!(%worker_id, "worker deregistered");
        Ok(())
    }

    /// Refresh the worker's liveness and renew the leases of everything it
    /// has in flight.
    pub fn heartbeat(&self, worker_id: &str) -> CoordinatorResult<()> {
        let now = epoch_secs();
        if !self.worker_repo.touch_heartbeat(worker_id, now)? {
            return Err(CoordinatorError::WorkerNotFound(worker_id.to_string()));
        }
        let renewed = self
            .worker_streams
            .renew_leases_by_worker_id(worker_id, now + STREAM_LEASE_SECS)?;
        debug!(%worker_id, renewed, "heartbeat");
        Ok(())
    }

    /// Apply a status the worker reported for one of its assignments.
    ///
    /// `running` routes the stream to the reporting worker and renews its
    /// lease; `completed` also completes the stream.
    pub fn report_worker_stream_status(
        &self,
        worker_stream_id: WorkerStreamId,
        status: WorkerStreamStatus,
    ) -> CoordinatorResult<()> {
        let worker_stream = self
            .worker_streams
            .find_worker_stream(worker_stream_id)?
            .ok_or(CoordinatorError::WorkerStreamNotFound(worker_stream_id))?;

        self.worker_streams
            .update_worker_stream_status(worker_stream_id, status)?;

        match status {
            WorkerStreamStatus::Completed => {
                self.streams
                    .update_stream_status(worker_stream.stream_id, StreamStatus::Completed)?;
            }
            WorkerStreamStatus::Running => match self.streams.find_stream(worker_stream.stream_id)? {
                Some(stream) => {
                    self.worker_streams
                        .update_lease_expiry(worker_stream_id, epoch_secs() + STREAM_LEASE_SECS)?;
                    self.routing
                        .set_lineage(&stream, &worker_stream.worker_id, worker_stream_id);
                }
                None => warn!(
                    worker_stream_id,
                    stream_id = worker_stream.stream_id,
                    "running assignment references a missing stream"
                ),
            },
            _ => {}
        }

        info!(
            worker_stream_id,
            worker_id = %worker_stream.worker_id,
            status = %status,
            "worker stream status reported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_rpc::ClientRegistry;
    use flowgrid_rpc::testing::FakeCluster;
    use flowgrid_state::{Component, NewStream, StateError, StateStore};

    struct Fixture {
        store: StateStore,
        cluster: Arc<FakeCluster>,
        manager: Arc<WorkerManager>,
        routing: Arc<RoutingTable>,
        events: WorkerEvents,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let repos = Repositories::from_store(store.clone());
        let cluster = Arc::new(FakeCluster::new());
        let manager = Arc::new(WorkerManager::new(
            &repos,
            ClientRegistry::new(cluster.clone()),
        ));
        let routing = Arc::new(RoutingTable::new());
        let events = WorkerEvents::new(Arc::clone(&manager), &repos, Arc::clone(&routing));
        Fixture {
            store,
            cluster,
            manager,
            routing,
            events,
        }
    }

    fn create_stream(store: &StateStore) -> i64 {
        store
            .create(&NewStream::new(
                "a",
                Component::new("in", "generate", ""),
                Component::new("out", "drop", ""),
            ))
            .unwrap()
            .id
    }

    #[test]
    fn register_adds_active_worker() {
        let f = fixture();
        let worker = f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        assert!(worker.is_active());
        assert!(worker.last_heartbeat > 0);
        assert_eq!(
            f.store.find_worker("w-1").unwrap().unwrap().address,
            "10.0.0.1:50051"
        );
    }

    #[test]
    fn reregister_at_new_address_replaces_client() {
        let f = fixture();
        let worker = f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        f.manager.get_worker_client(&worker).unwrap();

        let moved = f.events.register_worker("w-1", "10.0.0.2:50051").unwrap();
        assert_eq!(moved.address, "10.0.0.2:50051");
        f.manager.get_worker_client(&moved).unwrap();
        assert_eq!(f.cluster.connect_count("w-1"), 2);
    }

    #[test]
    fn reregister_same_address_keeps_client() {
        let f = fixture();
        let worker = f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        f.manager.get_worker_client(&worker).unwrap();

        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        f.manager.get_worker_client(&worker).unwrap();
        assert_eq!(f.cluster.connect_count("w-1"), 1);
    }

    #[test]
    fn deregister_deactivates_and_stops_assignments() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        let stream_id = create_stream(&f.store);
        let ws = f.store.queue("w-1", stream_id).unwrap();

        f.events.deregister_worker("w-1").unwrap();

        assert!(!f.store.find_worker("w-1").unwrap().unwrap().is_active());
        assert_eq!(
            f.store.find_worker_stream(ws.id).unwrap().unwrap().status,
            WorkerStreamStatus::Stopped
        );
    }

    #[test]
    fn reregister_after_deregister_reactivates() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        f.events.deregister_worker("w-1").unwrap();
        let worker = f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        assert!(worker.is_active());
    }

    #[test]
    fn heartbeat_for_unknown_worker_is_not_found() {
        let f = fixture();
        let err = f.events.heartbeat("ghost").unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkerNotFound(id) if id == "ghost"));
    }

    #[test]
    fn heartbeat_for_known_worker_succeeds() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        f.events.heartbeat("w-1").unwrap();
    }

    #[test]
    fn heartbeat_renews_in_flight_leases() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        let stream_id = create_stream(&f.store);
        let ws = f.store.queue("w-1", stream_id).unwrap();
        f.store
            .update_worker_stream_status(ws.id, WorkerStreamStatus::Running)
            .unwrap();
        f.store.update_lease_expiry(ws.id, 1).unwrap();

        f.events.heartbeat("w-1").unwrap();

        let lease = f.store.find_worker_stream(ws.id).unwrap().unwrap().lease_expires_at;
        assert!(lease >= epoch_secs());
    }

    #[test]
    fn running_report_renews_lease() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        let stream_id = create_stream(&f.store);
        let ws = f.store.queue("w-1", stream_id).unwrap();
        f.store.update_lease_expiry(ws.id, 1).unwrap();

        f.events
            .report_worker_stream_status(ws.id, WorkerStreamStatus::Running)
            .unwrap();

        let lease = f.store.find_worker_stream(ws.id).unwrap().unwrap().lease_expires_at;
        assert!(lease >= epoch_secs());
    }

    #[test]
    fn running_report_routes_stream() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        let stream_id = create_stream(&f.store);
        let ws = f.store.queue("w-1", stream_id).unwrap();

        f.events
            .report_worker_stream_status(ws.id, WorkerStreamStatus::Running)
            .unwrap();

        assert_eq!(f.routing.get_stream_worker(stream_id).as_deref(), Some("w-1"));
        assert_eq!(f.routing.get_stream_worker_stream(stream_id), Some(ws.id));
    }

    #[test]
    fn completed_report_completes_stream() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        let stream_id = create_stream(&f.store);
        let ws = f.store.queue("w-1", stream_id).unwrap();

        f.events
            .report_worker_stream_status(ws.id, WorkerStreamStatus::Running)
            .unwrap();
        f.events
            .report_worker_stream_status(ws.id, WorkerStreamStatus::Completed)
            .unwrap();

        assert_eq!(
            f.store.find_stream(stream_id).unwrap().unwrap().status,
            StreamStatus::Completed
        );
    }

    #[test]
    fn report_for_unknown_assignment_is_not_found() {
        let f = fixture();
        let err = f
            .events
            .report_worker_stream_status(77, WorkerStreamStatus::Running)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkerStreamNotFound(77)));
    }

    #[test]
    fn report_out_of_terminal_state_is_rejected() {
        let f = fixture();
        f.events.register_worker("w-1", "10.0.0.1:50051").unwrap();
        let stream_id = create_stream(&f.store);
        let ws = f.store.queue("w-1", stream_id).unwrap();
        f.store
            .update_worker_stream_status(ws.id, WorkerStreamStatus::Stopped)
            .unwrap();

        let err = f
            .events
            .report_worker_stream_status(ws.id, WorkerStreamStatus::Running)
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::State(StateError::InvalidTransition { .. })
        ));
        assert!(f.routing.get_route(stream_id).is_none());
    }
}
