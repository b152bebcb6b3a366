//! ClientRegistry: one cached RPC client per worker id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use flowgrid_state::{Worker, WorkerId};
use tracing::debug;

use crate::client::{WorkerConnector, WorkerRpc};
use crate::error::RpcResult;

/// Caches clients keyed by worker id. The lookup-or-connect step runs under
/// one lock, so two callers never open two clients for the same worker.
pub struct ClientRegistry {
    connector: Arc<dyn WorkerConnector>,
    clients: Mutex<HashMap<WorkerId, Arc<dyn WorkerRpc>>>,
}

impl ClientRegistry {
    pub fn new(connector: Arc<dyn WorkerConnector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached client for `worker.id`, connecting on first use.
    /// A connect failure is returned as-is and nothing is cached.
    pub fn get_client(&self, worker: &Worker) -> RpcResult<Arc<dyn WorkerRpc>> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&worker.id) {
            return Ok(Arc::clone(client));
        }

        debug!(worker_id = %worker.id, address = %worker.address, "creating worker client");
        let client = self.connector.connect(worker)?;
        clients.insert(worker.id.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Evict a cached client. No-op if absent.
    pub fn remove_client(&self, worker_id: &str) {
        let removed = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(worker_id)
            .is_some();
        if removed {
            debug!(%worker_id, "worker client removed");
        }
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(worker_id)
    }
}
