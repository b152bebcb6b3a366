//! Worker manager: health classification and deactivation.

use std::sync::{Arc, Mutex, PoisonError};

use flowgrid_rpc::{ClientRegistry, RpcResult, WorkerRpc};
use flowgrid_state::{Worker, WorkerRepository, WorkerStreamRepository};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::repositories::Repositories;

pub struct WorkerManager {
    workers: Arc<dyn WorkerRepository>,
    worker_streams: Arc<dyn WorkerStreamRepository>,
    clients: ClientRegistry,
    /// Serializes the deactivate → stop → evict sequence.
    deactivation: Mutex<()>,
}

impl WorkerManager {
    pub fn new(repos: &Repositories, clients: ClientRegistry) -> Self {
        Self {
            workers: Arc::clone(&repos.workers),
            worker_streams: Arc::clone(&repos.worker_streams),
            clients,
            deactivation: Mutex::new(()),
        }
    }

    /// Active workers that answer a health probe right now, with their
    /// running-stream counts, in repository order.
    ///
    /// Probes run concurrently. A worker whose client cannot be obtained or
    /// whose probe fails is deactivated and left out.
    pub async fn get_healthy_workers(&self) -> CoordinatorResult<Vec<Worker>> {
        let candidates = self.workers.find_all_active_with_running_stream_count()?;
        let mut probes = JoinSet::new();

        for (index, worker) in candidates.into_iter().enumerate() {
            match self.clients.get_client(&worker) {
                Ok(client) => {
                    probes.spawn(async move {
                        let result = client.health_check().await;
                        (index, worker, result)
                    });
                }
                Err(e) => {
                    warn!(worker_id = %worker.id, error = %e, "failed to obtain worker client");
                    self.deactivate_logged(&worker.id);
                }
            }
        }

        let mut healthy = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, worker, Ok(()))) => healthy.push((index, worker)),
                Ok((_, worker, Err(e))) => {
                    warn!(worker_id = %worker.id, error = %e, "worker failed health check");
                    self.deactivate_logged(&worker.id);
                }
                Err(e) => error!(error = %e, "health probe task failed"),
            }
        }

        healthy.sort_by_key(|(index, _)| *index);
        debug!(healthy = healthy.len(), "healthy workers collected");
        Ok(healthy.into_iter().map(|(_, worker)| worker).collect())
    }

    /// Mark the worker inactive, stop its waiting and running assignments,
    /// and evict its client.
    ///
    /// Every step is attempted even if an earlier one fails; the client is
    /// always evicted. Returns the first failure.
    pub fn deactivate_worker(&self, worker_id: &str) -> CoordinatorResult<()> {
        let _guard = self
            .deactivation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut first_error: Option<CoordinatorError> = None;

        if let Err(e) = self.workers.deactivate(worker_id) {
            error!(%worker_id, error = %e, "failed to mark worker inactive");
            first_error = Some(e.into());
        }

        match self
            .worker_streams
            .stop_all_running_and_waiting_by_worker_id(worker_id)
        {
            Ok(stopped) => info!(%worker_id, stopped, "worker deactivated"),
            Err(e) => {
                error!(%worker_id, error = %e, "failed to stop worker streams");
                if first_error.is_none() {
                    first_error = Some(e.into());
                }
            }
        }

        self.clients.remove_client(worker_id);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get_worker_client(&self, worker: &Worker) -> RpcResult<Arc<dyn WorkerRpc>> {
        self.clients.get_client(worker)
    }

    /// Drop a cached client without touching persistence.
    pub fn evict_client(&self, worker_id: &str) {
        self.clients.remove_client(worker_id);
    }

    /// Deactivate during a scheduling pass. Failures are already logged and
    /// never keep the worker in the healthy set.
    fn deactivate_logged(&self, worker_id: &str) {
        let _ = self.deactivate_worker(worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_rpc::testing::FakeCluster;
    use flowgrid_state::{Component, NewStream, StateStore, StreamRepository, WorkerStreamStatus};

    struct Fixture {
        store: Arc<StateStore>,
        cluster: Arc<FakeCluster>,
        manager: WorkerManager,
    }

    fn fixture(workers: &[&str]) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        for id in workers {
            store
                .add_or_activate(&Worker::new(*id, "127.0.0.1:50051"))
                .unwrap();
        }
        let repos = Repositories::from_store(store.clone());
        let cluster = Arc::new(FakeCluster::new());
        let manager = WorkerManager::new(&repos, ClientRegistry::new(cluster.clone()));
        Fixture {
            store: Arc::new(store),
            cluster,
            manager,
        }
    }

    fn new_stream(name: &str) -> NewStream {
        NewStream::new(
            name,
            Component::new("in", "generate", ""),
            Component::new("out", "drop", ""),
        )
    }

    #[tokio::test]
    async fn healthy_workers_keep_repository_order() {
        let f = fixture(&["w-1", "w-2", "w-3"]);
        let healthy = f.manager.get_healthy_workers().await.unwrap();
        let ids: Vec<_> = healthy.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["w-1", "w-2", "w-3"]);
    }

    #[tokio::test]
    async fn unhealthy_worker_is_deactivated_and_excluded() {
        let f = fixture(&["w-1", "w-2"]);
        f.cluster.worker("w-2").set_healthy(false);

        let healthy = f.manager.get_healthy_workers().await.unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, "w-1");
        assert!(!f.store.find_worker("w-2").unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn unreachable_worker_is_deactivated() {
        let f = fixture(&["w-1"]);
        f.cluster.refuse("w-1");

        assert!(f.manager.get_healthy_workers().await.unwrap().is_empty());
        assert!(!f.store.find_worker("w-1").unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn healthy_workers_carry_running_counts() {
        let f = fixture(&["w-1"]);
        let stream = f.store.create(&new_stream("a")).unwrap();
        f.store.queue("w-1", stream.id).unwrap();

        let healthy = f.manager.get_healthy_workers().await.unwrap();
        assert_eq!(healthy[0].running_stream_count, 1);
    }

    #[test]
    fn deactivate_stops_in_flight_streams_and_evicts_client() {
        let f = fixture(&["w-1"]);
        let stream = f.store.create(&new_stream("a")).unwrap();
        let ws = f.store.queue("w-1", stream.id).unwrap();
        f.manager
            .get_worker_client(&Worker::new("w-1", "127.0.0.1:50051"))
            .unwrap();

        f.manager.deactivate_worker("w-1").unwrap();

        assert!(!f.store.find_worker("w-1").unwrap().unwrap().is_active());
        assert_eq!(
            f.store.find_worker_stream(ws.id).unwrap().unwrap().status,
            WorkerStreamStatus::Stopped
        );
        f.manager
            .get_worker_client(&Worker::new("w-1", "127.0.0.1:50051"))
            .unwrap();
        assert_eq!(f.cluster.connect_count("w-1"), 2);
    }

    #[test]
    fn deactivate_unknown_worker_still_evicts() {
        let f = fixture(&[]);
        f.manager
            .get_worker_client(&Worker::new("ghost", "127.0.0.1:50051"))
            .unwrap();

        let err = f.manager.deactivate_worker("ghost").unwrap_err();
        assert!(matches!(err, CoordinatorError::State(ref e) if e.is_not_found()));

        f.manager
            .get_worker_client(&Worker::new("ghost", "127.0.0.1:50051"))
            .unwrap();
        assert_eq!(f.cluster.connect_count("ghost"), 2);
    }
}
