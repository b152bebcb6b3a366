//! flowgrid-coordinator: stream scheduling, worker-stream monitoring, and
//! ingest forwarding.
//!
//! Places each active, unassigned stream on the least-loaded healthy
//! worker, keeps persisted assignment state in step with what workers
//! report, and proxies `/ingest/<stream-id>` traffic to whichever worker
//! runs that stream.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorExecutor
//!   ├── WorkerManager (health probes, deactivation)
//!   │     └── ClientRegistry (flowgrid-rpc)
//!   ├── StreamAssigner ── WorkerHeap + ConfigBuilder
//!   ├── StreamMonitor (FetchStream / CompleteStream reconciliation)
//!   ├── RequestForwarder ── RoutingTable
//!   ├── WorkerEvents (register, heartbeat, status reports, lease renewal)
//!   └── Repositories (flowgrid-state traits)
//! ```

pub mod assigner;
pub mod config_builder;
pub mod error;
pub mod events;
pub mod executor;
pub mod forwarder;
pub mod monitor;
pub mod repositories;
pub mod routing;
pub mod worker_heap;
pub mod worker_manager;

pub use assigner::{AssignSummary, StreamAssigner};
pub use config_builder::{ConfigBuilder, StreamConfig};
pub use error::{ConfigError, ConfigResult, CoordinatorError, CoordinatorResult, SectionError};
pub use events::WorkerEvents;
pub use executor::CoordinatorExecutor;
pub use forwarder::{ForwardedResponse, IngestTarget, RequestForwarder};
pub use monitor::{MonitorSummary, StreamMonitor};
pub use repositories::Repositories;
pub use routing::{Route, RoutingTable};
pub use worker_heap::WorkerHeap;
pub use worker_manager::WorkerManager;
