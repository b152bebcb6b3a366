//! Coordinator error types.

use thiserror::Error;

/// A single stream section whose config blob could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {section} config: {reason}")]
pub struct SectionError {
    /// `input`, `output`, `processor[<index>:<label>]`,
    /// `cache_resources[<label>]` or `rate_limit_resources[<label>]`.
    pub section: String,
    pub reason: String,
}

/// Config compilation failures. Never retryable without editing the stream.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Section(#[from] SectionError),

    #[error("{}", join_sections(.0))]
    Sections(Vec<SectionError>),

    #[error("failed to render config: {0}")]
    Render(String),
}

impl ConfigError {
    /// Every malformed section this error reports.
    pub fn sections(&self) -> Vec<SectionError> {
        match self {
            ConfigError::Section(section) => vec![section.clone()],
            ConfigError::Sections(sections) => sections.clone(),
            ConfigError::Render(_) => Vec::new(),
        }
    }
}

fn join_sections(sections: &[SectionError]) -> String {
    sections
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("state store error: {0}")]
    State(#[from] flowgrid_state::StateError),

    #[error("worker rpc error: {0}")]
    Rpc(#[from] flowgrid_rpc::RpcError),

    #[error("stream config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid ingest path: {0}")]
    InvalidPath(String),

    #[error("malformed stream id: {0}")]
    MalformedStreamId(String),

    #[error("stream not found: {0}")]
    StreamNotFound(i64),

    #[error("stream {0} is not assigned to any worker yet")]
    StreamUnassigned(i64),

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("worker stream not found: {0}")]
    WorkerStreamNotFound(i64),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
