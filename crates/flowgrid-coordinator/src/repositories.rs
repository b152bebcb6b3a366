//! Repository handles shared by the coordinator components.

use std::sync::Arc;

use flowgrid_state::{StateStore, StreamRepository, WorkerRepository, WorkerStreamRepository};

#[derive(Clone)]
pub struct Repositories {
    pub workers: Arc<dyn WorkerRepository>,
    pub streams: Arc<dyn StreamRepository>,
    pub worker_streams: Arc<dyn WorkerStreamRepository>,
}

impl Repositories {
    /// All three repositories backed by one redb store.
    pub fn from_store(store: StateStore) -> Self {
        let store = Arc::new(store);
        Self {
            workers: store.clone(),
            streams: store.clone(),
            worker_streams: store,
        }
    }
}
