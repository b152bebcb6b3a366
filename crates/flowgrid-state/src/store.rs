//! StateStore: redb-backed persistence for the FlowGrid control plane.
//!
//! Implements [`WorkerRepository`], [`StreamRepository`] and
//! [`WorkerStreamRepository`] over four tables. Every repository call runs
//! in exactly one redb transaction, so multi-row operations (stream
//! versioning, stop-all) are atomic. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::repository::{StreamRepository, WorkerRepository, WorkerStreamRepository};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const STREAM_SEQUENCE: &str = "streams";
const WORKER_STREAM_SEQUENCE: &str = "worker_streams";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(STREAMS).map_err(map_err!(Table))?;
        txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Load a stream version by id, applying `apply` and writing it back if
    /// the closure reports a change. Shared by the status updaters.
    fn modify_stream<F>(&self, id: StreamId, apply: F) -> StateResult<()>
    where
        F: FnOnce(&mut Stream) -> StateResult<bool>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let changed = {
            let mut table = txn.open_table(STREAMS).map_err(map_err!(Table))?;
            let mut stream: Stream = read_row(&table, id)?
                .ok_or_else(|| StateError::NotFound(format!("stream {id}")))?;
            if apply(&mut stream)? {
                let value = encode(&stream)?;
                table
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
                true
            } else {
                false
            }
        };
        finish(txn, changed)
    }

    fn modify_worker_stream<F>(&self, id: WorkerStreamId, apply: F) -> StateResult<()>
    where
        F: FnOnce(&mut WorkerStream) -> StateResult<bool>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let changed = {
            let mut table = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
            let mut record: WorkerStream = read_row(&table, id)?
                .ok_or_else(|| StateError::NotFound(format!("worker stream {id}")))?;
            if apply(&mut record)? {
                let value = encode(&record)?;
                table
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
                true
            } else {
                false
            }
        };
        finish(txn, changed)
    }

    fn modify_worker<F>(&self, id: &str, apply: F) -> StateResult<bool>
    where
        F: FnOnce(&mut Worker),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found = {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let existing: Option<Worker> = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match existing {
                Some(mut worker) => {
                    apply(&mut worker);
                    let value = encode(&worker)?;
                    table
                        .insert(id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                None => false,
            }
        };
        finish(txn, found)?;
        Ok(found)
    }
}

// ── Workers ───────────────────────────────────────────────────────

impl WorkerRepository for StateStore {
    fn find_all_active_with_running_stream_count(&self) -> StateResult<Vec<Worker>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let assignments = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for ws in read_all::<WorkerStream, _>(&assignments)? {
            if WorkerStreamStatus::IN_FLIGHT.contains(&ws.status) {
                *counts.entry(ws.worker_id).or_default() += 1;
            }
        }

        let mut results = Vec::new();
        for entry in workers.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let mut worker: Worker = decode(value.value())?;
            if worker.is_active() {
                worker.running_stream_count = counts.get(&worker.id).copied().unwrap_or(0);
                results.push(worker);
            }
        }
        Ok(results)
    }

    fn find_worker(&self, id: &str) -> StateResult<Option<Worker>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    fn deactivate(&self, id: &str) -> StateResult<()> {
        let found = self.modify_worker(id, |worker| worker.status = WorkerStatus::Inactive)?;
        if !found {
            return Err(StateError::NotFound(format!("worker {id}")));
        }
        debug!(worker_id = %id, "worker deactivated");
        Ok(())
    }

    fn add_or_activate(&self, worker: &Worker) -> StateResult<Worker> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored = {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let existing: Option<Worker> =
                match table.get(worker.id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
            let mut record = existing.unwrap_or_else(|| worker.clone());
            record.address = worker.address.clone();
            record.status = WorkerStatus::Active;
            record.last_heartbeat = now;
            record.running_stream_count = 0;
            let value = encode(&record)?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(worker_id = %stored.id, address = %stored.address, "worker active");
        Ok(stored)
    }

    fn touch_heartbeat(&self, id: &str, at: u64) -> StateResult<bool> {
        self.modify_worker(id, |worker| worker.last_heartbeat = at)
    }

    fn find_active_with_stale_heartbeat(&self, older_than: u64) -> StateResult<Vec<Worker>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let worker: Worker = decode(value.value())?;
            if worker.is_active() && worker.last_heartbeat < older_than {
                results.push(worker);
            }
        }
        Ok(results)
    }
}

// ── Streams ───────────────────────────────────────────────────────

impl StreamRepository for StateStore {
    fn list_all_active_and_non_assigned(&self) -> StateResult<Vec<Stream>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let streams = txn.open_table(STREAMS).map_err(map_err!(Table))?;
        let assignments = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;

        let assigned: HashSet<StreamId> = read_all::<WorkerStream, _>(&assignments)?
            .into_iter()
            .filter(|ws| ws.status.is_live())
            .map(|ws| ws.stream_id)
            .collect();

        Ok(read_all::<Stream, _>(&streams)?
            .into_iter()
            .filter(|s| s.is_current && s.status == StreamStatus::Active)
            .filter(|s| !assigned.contains(&s.id))
            .collect())
    }

    fn find_stream(&self, id: StreamId) -> StateResult<Option<Stream>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STREAMS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    fn update_stream_status(&self, id: StreamId, status: StreamStatus) -> StateResult<()> {
        self.modify_stream(id, |stream| {
            if stream.status == status {
                return Ok(false);
            }
            if !stream.status.can_transition_to(status) {
                return Err(StateError::InvalidTransition {
                    entity: "stream",
                    id: id.to_string(),
                    from: stream.status.to_string(),
                    to: status.to_string(),
                });
            }
            stream.status = status;
            stream.updated_at = epoch_secs();
            Ok(true)
        })?;
        debug!(stream_id = id, %status, "stream status updated");
        Ok(())
    }

    fn create(&self, new: &NewStream) -> StateResult<Stream> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id = next_id(&txn, STREAM_SEQUENCE)?;
        let stream = build_stream(id, None, new, now);
        {
            let mut table = txn.open_table(STREAMS).map_err(map_err!(Table))?;
            let value = encode(&stream)?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(stream_id = id, name = %stream.name, "stream created");
        Ok(stream)
    }

    fn create_version(&self, previous_id: StreamId, new: &NewStream) -> StateResult<Stream> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id = next_id(&txn, STREAM_SEQUENCE)?;
        let stream = {
            let mut table = txn.open_table(STREAMS).map_err(map_err!(Table))?;
            let mut previous: Stream = read_row(&table, previous_id)?
                .ok_or_else(|| StateError::NotFound(format!("stream {previous_id}")))?;
            if !previous.is_current {
                return Err(StateError::InvalidTransition {
                    entity: "stream",
                    id: previous_id.to_string(),
                    from: "superseded".to_string(),
                    to: "new version".to_string(),
                });
            }

            let stream = build_stream(id, Some(previous.lineage_root()), new, now);
            previous.is_current = false;
            previous.updated_at = now;

            let old_value = encode(&previous)?;
            table
                .insert(previous_id, old_value.as_slice())
                .map_err(map_err!(Write))?;
            let new_value = encode(&stream)?;
            table
                .insert(id, new_value.as_slice())
                .map_err(map_err!(Write))?;
            stream
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            stream_id = id,
            previous_id,
            lineage_root = stream.lineage_root(),
            "stream version created"
        );
        Ok(stream)
    }
}

// ── Worker streams ────────────────────────────────────────────────

impl WorkerStreamRepository for StateStore {
    fn queue(&self, worker_id: &str, stream_id: StreamId) -> StateResult<WorkerStream> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            if workers.get(worker_id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(format!("worker {worker_id}")));
            }
            let streams = txn.open_table(STREAMS).map_err(map_err!(Table))?;
            if streams.get(stream_id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(format!("stream {stream_id}")));
            }
        }
        let id = next_id(&txn, WORKER_STREAM_SEQUENCE)?;
        let record = WorkerStream {
            id,
            worker_id: worker_id.to_string(),
            stream_id,
            status: WorkerStreamStatus::Waiting,
            lease_expires_at: now + STREAM_LEASE_SECS,
            created_at: now,
            updated_at: now,
        };
        {
            let mut table = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
            let value = encode(&record)?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(worker_stream_id = id, %worker_id, stream_id, "worker stream queued");
        Ok(record)
    }

    fn find_worker_stream(&self, id: WorkerStreamId) -> StateResult<Option<WorkerStream>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    fn update_worker_stream_status(
        &self,
        id: WorkerStreamId,
        status: WorkerStreamStatus,
    ) -> StateResult<()> {
        self.modify_worker_stream(id, |record| {
            if record.status == status {
                return Ok(false);
            }
            if !record.status.can_transition_to(status) {
                return Err(StateError::InvalidTransition {
                    entity: "worker stream",
                    id: id.to_string(),
                    from: record.status.to_string(),
                    to: status.to_string(),
                });
            }
            record.status = status;
            record.updated_at = epoch_secs();
            Ok(true)
        })?;
        debug!(worker_stream_id = id, %status, "worker stream status updated");
        Ok(())
    }

    fn list_all_by_statuses(
        &self,
        statuses: &[WorkerStreamStatus],
    ) -> StateResult<Vec<WorkerStreamDetails>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let assignments = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
        let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let streams = txn.open_table(STREAMS).map_err(map_err!(Table))?;

        let mut results = Vec::new();
        for worker_stream in read_all::<WorkerStream, _>(&assignments)? {
            if !statuses.contains(&worker_stream.status) {
                continue;
            }
            let worker: Option<Worker> =
                match workers.get(worker_stream.worker_id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
            let stream: Option<Stream> = read_row(&streams, worker_stream.stream_id)?;
            match (worker, stream) {
                (Some(worker), Some(stream)) => results.push(WorkerStreamDetails {
                    worker_stream,
                    worker,
                    stream,
                }),
                _ => debug!(
                    worker_stream_id = worker_stream.id,
                    "skipping worker stream with dangling references"
                ),
            }
        }
        Ok(results)
    }

    fn stop_all_running_and_waiting_by_worker_id(&self, worker_id: &str) -> StateResult<u32> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stopped = {
            let mut table = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
            let targets: Vec<WorkerStream> = read_all::<WorkerStream, _>(&table)?
                .into_iter()
                .filter(|ws| ws.worker_id == worker_id)
                .filter(|ws| WorkerStreamStatus::IN_FLIGHT.contains(&ws.status))
                .collect();
            for mut record in targets.iter().cloned() {
                record.status = WorkerStreamStatus::Stopped;
                record.updated_at = now;
                let value = encode(&record)?;
                table
                    .insert(record.id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            targets.len() as u32
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%worker_id, stopped, "worker streams stopped");
        Ok(stopped)
    }

    fn update_lease_expiry(&self, id: WorkerStreamId, expires_at: u64) -> StateResult<()> {
        self.modify_worker_stream(id, |record| {
            if record.lease_expires_at == expires_at {
                return Ok(false);
            }
            record.lease_expires_at = expires_at;
            Ok(true)
        })
    }

    fn renew_leases_by_worker_id(&self, worker_id: &str, expires_at: u64) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let renewed = {
            let mut table = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
            let targets: Vec<WorkerStream> = read_all::<WorkerStream, _>(&table)?
                .into_iter()
                .filter(|ws| ws.worker_id == worker_id)
                .filter(|ws| WorkerStreamStatus::IN_FLIGHT.contains(&ws.status))
                .filter(|ws| ws.lease_expires_at < expires_at)
                .collect();
            for mut record in targets.iter().cloned() {
                record.lease_expires_at = expires_at;
                let value = encode(&record)?;
                table
                    .insert(record.id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            targets.len() as u32
        };
        finish(txn, renewed > 0)?;
        Ok(renewed)
    }

    fn find_running_with_expired_leases(&self, now: u64) -> StateResult<Vec<WorkerStream>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKER_STREAMS).map_err(map_err!(Table))?;
        Ok(read_all::<WorkerStream, _>(&table)?
            .into_iter()
            .filter(|ws| ws.status == WorkerStreamStatus::Running)
            .filter(|ws| ws.lease_expires_at != 0 && ws.lease_expires_at < now)
            .collect())
    }
}

// ── Helpers ───────────────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn read_row<T, R>(table: &R, id: i64) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<i64, &'static [u8]>,
{
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn read_all<T, R>(table: &R) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<i64, &'static [u8]>,
{
    let mut rows = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        rows.push(decode(value.value())?);
    }
    Ok(rows)
}

/// Allocate the next id from a named sequence inside `txn`.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<i64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Commit when something changed, otherwise abort.
fn finish(txn: WriteTransaction, changed: bool) -> StateResult<()> {
    if changed {
        txn.commit().map_err(map_err!(Transaction))
    } else {
        txn.abort().map_err(map_err!(Transaction))
    }
}

fn build_stream(id: StreamId, parent_id: Option<StreamId>, new: &NewStream, now: u64) -> Stream {
    Stream {
        id,
        parent_id,
        name: new.name.clone(),
        input: new.input.clone(),
        processors: new.processors.clone(),
        output: new.output.clone(),
        cache_resources: new.cache_resources.clone(),
        rate_limit_resources: new.rate_limit_resources.clone(),
        status: new.status,
        is_current: true,
        created_at: now,
        updated_at: now,
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
