//! Domain types for the FlowGrid control plane.
//!
//! Status fields are closed enums with explicit transition tables. The
//! store consults [`WorkerStreamStatus::can_transition_to`] and
//! [`StreamStatus::can_transition_to`] before every status write and
//! rejects anything else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier a worker registers with.
pub type WorkerId = String;

/// Identifier of one stream version.
pub type StreamId = i64;

/// Identifier of one assignment record.
pub type WorkerStreamId = i64;

// ── Worker ────────────────────────────────────────────────────────

/// A worker process known to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worker {
    pub id: WorkerId,
    /// RPC address (`host:port`).
    pub address: String,
    /// Unix timestamp (seconds) of the last heartbeat or registration.
    pub last_heartbeat: u64,
    pub status: WorkerStatus,
    /// Live (waiting or running) assignments at query time. Never persisted.
    #[serde(skip)]
    pub running_stream_count: u32,
}

impl Worker {
    /// A freshly registered, active worker.
    pub fn new(id: impl Into<WorkerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_heartbeat: 0,
            status: WorkerStatus::Active,
            running_stream_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkerStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Inactive,
}

// ── Stream ────────────────────────────────────────────────────────

/// One configurable component of a stream: input, processor, output or
/// shared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Component {
    pub label: String,
    /// Engine component name (`generate`, `mapping`, `kafka`, ...).
    pub component: String,
    /// Opaque configuration blob, interpreted by the config compiler.
    pub config: String,
}

impl Component {
    pub fn new(
        label: impl Into<String>,
        component: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            component: component.into(),
            config: config.into(),
        }
    }
}

/// One immutable version of a pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stream {
    pub id: StreamId,
    /// Lineage root this version descends from. `None` on the first version.
    pub parent_id: Option<StreamId>,
    pub name: String,
    pub input: Component,
    pub processors: Vec<Component>,
    pub output: Component,
    #[serde(default)]
    pub cache_resources: Vec<Component>,
    #[serde(default)]
    pub rate_limit_resources: Vec<Component>,
    pub status: StreamStatus,
    pub is_current: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

/// The caller-supplied part of a stream version; ids, lineage and
/// timestamps are assigned by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStream {
    pub name: String,
    pub input: Component,
    pub processors: Vec<Component>,
    pub output: Component,
    pub cache_resources: Vec<Component>,
    pub rate_limit_resources: Vec<Component>,
    pub status: StreamStatus,
}

impl NewStream {
    /// An active stream with no processors or shared resources.
    pub fn new(name: impl Into<String>, input: Component, output: Component) -> Self {
        Self {
            name: name.into(),
            input,
            processors: Vec::new(),
            output,
            cache_resources: Vec::new(),
            rate_limit_resources: Vec::new(),
            status: StreamStatus::Active,
        }
    }

    pub fn with_processor(mut self, processor: Component) -> Self {
        self.processors.push(processor);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Active,
    Completed,
    Paused,
    Failed,
}

impl StreamStatus {
    /// Transition table:
    ///
    /// ```text
    /// active -> paused | completed | failed
    /// paused -> active | completed | failed
    /// ```
    pub fn can_transition_to(self, next: StreamStatus) -> bool {
        use StreamStatus::*;
        matches!(
            (self, next),
            (Active, Paused | Completed | Failed) | (Paused, Active | Completed | Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Active => "active",
            StreamStatus::Completed => "completed",
            StreamStatus::Paused => "paused",
            StreamStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Lineage ───────────────────────────────────────────────────────

/// A record that belongs to a version chain linked by parent pointers,
/// with exactly one current version per chain.
pub trait Lineage {
    fn version_id(&self) -> i64;

    fn parent_id(&self) -> Option<i64>;

    fn is_current(&self) -> bool;

    /// The stable identifier of the whole chain: the first version's id.
    fn lineage_root(&self) -> i64 {
        self.parent_id().unwrap_or_else(|| self.version_id())
    }
}

impl Lineage for Stream {
    fn version_id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    fn is_current(&self) -> bool {
        self.is_current
    }
}

// ── WorkerStream ──────────────────────────────────────────────────

/// One worker's attempt at running one stream version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStream {
    pub id: WorkerStreamId,
    pub worker_id: WorkerId,
    pub stream_id: StreamId,
    pub status: WorkerStreamStatus,
    /// Unix timestamp (seconds) after which a running assignment that has
    /// not been renewed is stopped. Zero means no lease.
    #[serde(default)]
    pub lease_expires_at: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// How long a new or renewed assignment lease lasts.
pub const STREAM_LEASE_SECS: u64 = 20;

/// An assignment joined with its worker and stream, as the monitor needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStreamDetails {
    pub worker_stream: WorkerStream,
    pub worker: Worker,
    pub stream: Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStreamStatus {
    Waiting,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl WorkerStreamStatus {
    /// Statuses that block a stream from being assigned again.
    pub const LIVE: [WorkerStreamStatus; 3] = [
        WorkerStreamStatus::Waiting,
        WorkerStreamStatus::Running,
        WorkerStreamStatus::Completed,
    ];

    /// Statuses the monitor reconciles and deactivation stops.
    pub const IN_FLIGHT: [WorkerStreamStatus; 2] =
        [WorkerStreamStatus::Waiting, WorkerStreamStatus::Running];

    pub fn is_live(self) -> bool {
        Self::LIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkerStreamStatus::Stopped | WorkerStreamStatus::Completed | WorkerStreamStatus::Failed
        )
    }

    /// Transition table:
    ///
    /// ```text
    /// waiting -> running | stopped | completed | failed
    /// running -> stopped | completed | failed
    /// ```
    pub fn can_transition_to(self, next: WorkerStreamStatus) -> bool {
        use WorkerStreamStatus::*;
        match self {
            Waiting => matches!(next, Running | Stopped | Completed | Failed),
            Running => matches!(next, Stopped | Completed | Failed),
            Stopped | Completed | Failed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStreamStatus::Waiting => "waiting",
            WorkerStreamStatus::Running => "running",
            WorkerStreamStatus::Stopped => "stopped",
            WorkerStreamStatus::Completed => "completed",
            WorkerStreamStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerStreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: i64, parent_id: Option<i64>) -> Stream {
        Stream {
            id,
            parent_id,
            name: "orders".to_string(),
            input: Component::new("in", "generate", "{}"),
            processors: Vec::new(),
            output: Component::new("out", "drop", "{}"),
            cache_resources: Vec::new(),
            rate_limit_resources: Vec::new(),
            status: StreamStatus::Active,
            is_current: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn lineage_root_is_own_id_without_parent() {
        assert_eq!(stream(3, None).lineage_root(), 3);
    }

    #[test]
    fn lineage_root_is_parent_for_later_versions() {
        assert_eq!(stream(7, Some(3)).lineage_root(), 3);
    }

    #[test]
    fn worker_stream_happy_path_transitions() {
        use WorkerStreamStatus::*;
        assert!(Waiting.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Stopped));
        assert!(Waiting.can_transition_to(Stopped));
    }

    #[test]
    fn worker_stream_terminal_states_are_final() {
        use WorkerStreamStatus::*;
        for terminal in [Stopped, Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Waiting, Running, Stopped, Completed, Failed] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn worker_stream_cannot_go_back_to_waiting() {
        assert!(!WorkerStreamStatus::Running.can_transition_to(WorkerStreamStatus::Waiting));
        assert!(!WorkerStreamStatus::Waiting.can_transition_to(WorkerStreamStatus::Waiting));
    }

    #[test]
    fn live_statuses_include_completed() {
        assert!(WorkerStreamStatus::Completed.is_live());
        assert!(WorkerStreamStatus::Waiting.is_live());
        assert!(!WorkerStreamStatus::Stopped.is_live());
        assert!(!WorkerStreamStatus::Failed.is_live());
    }

    #[test]
    fn stream_status_transitions() {
        use StreamStatus::*;
        assert!(Active.can_transition_to(Completed));
        assert!(Paused.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn running_stream_count_is_not_serialized() {
        let mut worker = Worker::new("w-1", "10.0.0.1:50000");
        worker.running_stream_count = 4;
        let json = serde_json::to_string(&worker).unwrap();
        assert!(!json.contains("running_stream_count"));

        let back: Worker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.running_stream_count, 0);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkerStreamStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(serde_json::to_string(&StreamStatus::Paused).unwrap(), "\"paused\"");
    }
}
