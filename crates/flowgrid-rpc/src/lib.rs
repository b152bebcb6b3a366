//! flowgrid-rpc: the coordinator's view of worker processes.
//!
//! # Architecture
//!
//! ```text
//! ClientRegistry
//!   ├── cache: worker id → Arc<dyn WorkerRpc>
//!   └── WorkerConnector (seam)
//!       ├── GrpcConnector → GrpcWorkerClient (tonic, flowgrid.worker.Worker)
//!       └── testing::FakeCluster → FakeWorker (in-process, scriptable)
//! ```

pub mod client;
pub mod error;
pub mod proto;
pub mod registry;
pub mod testing;

pub use client::{
    GrpcConnector, GrpcWorkerClient, IngestCall, IngestReply, WorkerConnector, WorkerRpc,
};
pub use error::{RpcError, RpcResult};
pub use registry::ClientRegistry;
