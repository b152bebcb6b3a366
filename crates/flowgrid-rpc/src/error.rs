//! Error types for worker RPC.

use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid worker endpoint {address}: {reason}")]
    InvalidEndpoint { address: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("worker call failed ({code:?}): {message}")]
    Call { code: tonic::Code, message: String },

    #[error("worker reported unknown stream status {0}")]
    UnknownStatus(i32),

    #[error("worker unavailable: {0}")]
    Unavailable(String),
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        RpcError::Call {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}
