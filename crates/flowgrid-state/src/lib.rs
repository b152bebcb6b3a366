//! flowgrid-state: persisted control-plane state for FlowGrid.
//!
//! Holds the three record kinds the coordinator reasons about:
//!
//! - `Worker`: a registered worker process and its liveness
//! - `Stream`: one immutable version of a pipeline definition
//! - `WorkerStream`: one worker's attempt at running one stream version
//!
//! The coordinator only ever talks to the repository traits in
//! [`repository`]; [`StateStore`] is the redb-backed implementation of
//! all three.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb `&[u8]` value columns. Streams and
//! assignments are keyed by `i64` ids allocated from the `sequences` table,
//! workers by their stable string id.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use repository::{StreamRepository, WorkerRepository, WorkerStreamRepository};
pub use store::{StateStore, epoch_secs};
pub use types::*;
