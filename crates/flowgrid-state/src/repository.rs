//! Repository traits the coordinator is written against.
//!
//! Each call is a single unit of work; no transaction spans two calls.
//! Method names are distinct across the three traits so one type can
//! implement all of them without call-site disambiguation.

use crate::error::StateResult;
use crate::types::*;

pub trait WorkerRepository: Send + Sync {
    /// Active workers, each with `running_stream_count` set to its number
    /// of waiting or running assignments.
    fn find_all_active_with_running_stream_count(&self) -> StateResult<Vec<Worker>>;

    fn find_worker(&self, id: &str) -> StateResult<Option<Worker>>;

    /// Mark a worker inactive. Fails with `NotFound` for an unknown id.
    fn deactivate(&self, id: &str) -> StateResult<()>;

    /// Insert a new worker or reactivate an existing one, refreshing its
    /// address and heartbeat. Returns the stored record.
    fn add_or_activate(&self, worker: &Worker) -> StateResult<Worker>;

    /// Refresh `last_heartbeat`. Returns false if the worker is unknown.
    fn touch_heartbeat(&self, id: &str, at: u64) -> StateResult<bool>;

    /// Active workers whose last heartbeat is strictly older than `older_than`.
    fn find_active_with_stale_heartbeat(&self, older_than: u64) -> StateResult<Vec<Worker>>;
}

pub trait StreamRepository: Send + Sync {
    /// Current, active streams with no live (waiting, running or completed)
    /// assignment, in ascending id order.
    fn list_all_active_and_non_assigned(&self) -> StateResult<Vec<Stream>>;

    fn find_stream(&self, id: StreamId) -> StateResult<Option<Stream>>;

    /// Validated status change. Writing the current status again is a no-op.
    fn update_stream_status(&self, id: StreamId, status: StreamStatus) -> StateResult<()>;

    /// Insert the first version of a new lineage.
    fn create(&self, stream: &NewStream) -> StateResult<Stream>;

    /// Insert a new version after `previous_id`, which must be current. The
    /// new row points at the lineage root and becomes the only current row.
    fn create_version(&self, previous_id: StreamId, stream: &NewStream) -> StateResult<Stream>;
}

pub trait WorkerStreamRepository: Send + Sync {
    /// Create a `waiting` assignment of `stream_id` to `worker_id`, leased
    /// for [`STREAM_LEASE_SECS`].
    fn queue(&self, worker_id: &str, stream_id: StreamId) -> StateResult<WorkerStream>;

    fn find_worker_stream(&self, id: WorkerStreamId) -> StateResult<Option<WorkerStream>>;

    /// Validated status change. Writing the current status again is a no-op.
    fn update_worker_stream_status(
        &self,
        id: WorkerStreamId,
        status: WorkerStreamStatus,
    ) -> StateResult<()>;

    /// Assignments in any of `statuses`, joined with their worker and stream,
    /// in ascending id order. Rows whose worker or stream is missing are skipped.
    fn list_all_by_statuses(
        &self,
        statuses: &[WorkerStreamStatus],
    ) -> StateResult<Vec<WorkerStreamDetails>>;

    /// Move every waiting or running assignment of `worker_id` to `stopped`.
    /// Returns how many rows changed.
    fn stop_all_running_and_waiting_by_worker_id(&self, worker_id: &str) -> StateResult<u32>;

    /// Set the lease deadline of one assignment. Fails with `NotFound` for
    /// an unknown id.
    fn update_lease_expiry(&self, id: WorkerStreamId, expires_at: u64) -> StateResult<()>;

    /// Push the lease deadline of every waiting or running assignment of
    /// `worker_id` to `expires_at`. Returns how many rows changed.
    fn renew_leases_by_worker_id(&self, worker_id: &str, expires_at: u64) -> StateResult<u32>;

    /// Running assignments whose lease is set and strictly older than `now`.
    fn find_running_with_expired_leases(&self, now: u64) -> StateResult<Vec<WorkerStream>>;
}
