//! Protobuf messages and client stub for the `flowgrid.worker.Worker`
//! service, generated from `proto/worker.proto` at build time.

tonic::include_proto!("flowgrid.worker");

impl From<WorkerStreamStatus> for flowgrid_state::WorkerStreamStatus {
    fn from(status: WorkerStreamStatus) -> Self {
        match status {
            WorkerStreamStatus::Waiting => flowgrid_state::WorkerStreamStatus::Waiting,
            WorkerStreamStatus::Running => flowgrid_state::WorkerStreamStatus::Running,
            WorkerStreamStatus::Stopped => flowgrid_state::WorkerStreamStatus::Stopped,
            WorkerStreamStatus::Completed => flowgrid_state::WorkerStreamStatus::Completed,
            WorkerStreamStatus::Failed => flowgrid_state::WorkerStreamStatus::Failed,
        }
    }
}
