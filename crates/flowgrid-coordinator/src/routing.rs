//! Stream routing table: resolves a stream id to the worker running it.
//!
//! Pure cache state: rebuilt from persisted running assignments at start
//! and overwritten on every successful assignment. Never authoritative.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use flowgrid_state::{Lineage, StreamId, WorkerId, WorkerStreamId};
use tracing::debug;

/// Where traffic for one stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub worker_id: WorkerId,
    pub worker_stream_id: WorkerStreamId,
}

/// Concurrent stream → route map. Lookups take the read lock only.
#[derive(Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<StreamId, Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stream_worker(
        &self,
        stream_id: StreamId,
        worker_id: &str,
        worker_stream_id: WorkerStreamId,
    ) {
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        routes.insert(
            stream_id,
            Route {
                worker_id: worker_id.to_string(),
                worker_stream_id,
            },
        );
        debug!(stream_id, %worker_id, worker_stream_id, "route set");
    }

    /// Route `stream` and, for later versions, its lineage root to the same
    /// assignment so traffic addressed to any version reaches it.
    pub fn set_lineage<L: Lineage>(
        &self,
        stream: &L,
        worker_id: &str,
        worker_stream_id: WorkerStreamId,
    ) {
        self.set_stream_worker(stream.version_id(), worker_id, worker_stream_id);
        if let Some(parent_id) = stream.parent_id() {
            self.set_stream_worker(parent_id, worker_id, worker_stream_id);
        }
    }

    pub fn get_stream_worker(&self, stream_id: StreamId) -> Option<WorkerId> {
        self.get_route(stream_id).map(|route| route.worker_id)
    }

    pub fn get_stream_worker_stream(&self, stream_id: StreamId) -> Option<WorkerStreamId> {
        let routes = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        routes.get(&stream_id).map(|route| route.worker_stream_id)
    }

    /// Both halves of a route under one read lock.
    pub fn get_route(&self, stream_id: StreamId) -> Option<Route> {
        let routes = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        routes.get(&stream_id).cloned()
    }

    pub fn remove_stream(&self, stream_id: StreamId) {
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        routes.remove(&stream_id);
    }

    /// Drop every route that points at `worker_stream_id`. Returns how many
    /// were removed.
    pub fn remove_worker_stream(&self, worker_stream_id: WorkerStreamId) -> usize {
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = routes.len();
        routes.retain(|_, route| route.worker_stream_id != worker_stream_id);
        before - routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Version {
        id: i64,
        parent_id: Option<i64>,
    }

    impl Lineage for Version {
        fn version_id(&self) -> i64 {
            self.id
        }

        fn parent_id(&self) -> Option<i64> {
            self.parent_id
        }

        fn is_current(&self) -> bool {
            true
        }
    }

    #[test]
    fn set_and_get() {
        let table = RoutingTable::new();
        table.set_stream_worker(1, "w-1", 10);

        assert_eq!(table.get_stream_worker(1).as_deref(), Some("w-1"));
        assert_eq!(table.get_stream_worker_stream(1), Some(10));
        assert_eq!(table.get_stream_worker(2), None);
    }

    #[test]
    fn overwrite_replaces_route() {
        let table = RoutingTable::new();
        table.set_stream_worker(1, "w-1", 10);
        table.set_stream_worker(1, "w-2", 11);

        assert_eq!(
            table.get_route(1),
            Some(Route {
                worker_id: "w-2".to_string(),
                worker_stream_id: 11
            })
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_stream() {
        let table = RoutingTable::new();
        table.set_stream_worker(1, "w-1", 10);
        table.remove_stream(1);
        table.remove_stream(1);
        assert!(table.is_empty());
    }

    #[test]
    fn lineage_routes_parent_and_version() {
        let table = RoutingTable::new();
        table.set_lineage(&Version { id: 5, parent_id: Some(2) }, "w-1", 30);

        assert_eq!(table.get_stream_worker_stream(5), Some(30));
        assert_eq!(table.get_stream_worker_stream(2), Some(30));
    }

    #[test]
    fn first_version_routes_only_itself() {
        let table = RoutingTable::new();
        table.set_lineage(&Version { id: 2, parent_id: None }, "w-1", 30);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_worker_stream_clears_lineage() {
        let table = RoutingTable::new();
        table.set_lineage(&Version { id: 5, parent_id: Some(2) }, "w-1", 30);
        table.set_stream_worker(7, "w-1", 31);

        assert_eq!(table.remove_worker_stream(30), 2);
        assert_eq!(table.remove_worker_stream(30), 0);
        assert_eq!(table.get_stream_worker_stream(7), Some(31));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn concurrent_writers_read_back_their_own_routes() {
        let table = Arc::new(RoutingTable::new());
        let handles: Vec<_> = (0..8i64)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let worker = format!("w-{i}");
                    for j in 0..100 {
                        let stream_id = i * 1000 + j;
                        let worker_stream_id = stream_id + 50_000;
                        table.set_stream_worker(stream_id, &worker, worker_stream_id);

                        assert_eq!(table.get_stream_worker(stream_id), Some(worker.clone()));
                        assert_eq!(
                            table.get_stream_worker_stream(stream_id),
                            Some(worker_stream_id)
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len(), 800);
        assert_eq!(table.get_stream_worker(7_042).as_deref(), Some("w-7"));
    }
}
