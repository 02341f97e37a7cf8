//! Server error taxonomy and its transport-status mapping.

use thiserror::Error;
use tonic::Status;
use tracing::{error, warn};

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing required parameter, unparseable id, malformed input batch or
    /// wrong column type.
    #[error("{0}")]
    InvalidArgument(String),
    /// Referenced transaction, session, collection or snapshot is absent.
    #[error("{0}")]
    NotFound(String),
    /// Concurrent use of a transaction, or a duplicate begin.
    #[error("{0}")]
    Conflict(String),
    /// Session pool is full and no idle victim is old enough to evict.
    #[error("too many concurrent sessions")]
    CapacityExhausted,
    /// Any non-success status from the engine, message propagated verbatim.
    #[error("{0}")]
    Engine(String),
    /// Unknown verb.
    #[error("unknown command: {0}")]
    NotImplemented(String),
    /// Allocation failure or impossible state.
    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ServerError::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServerError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServerError::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServerError::Internal(message.into())
    }
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownCollection(_) | EngineError::UnknownSnapshot(_) => {
                ServerError::NotFound(err.to_string())
            }
            EngineError::Config(_) => ServerError::Engine(err.to_string()),
        }
    }
}

impl From<ServerError> for Status {
    fn from(err: ServerError) -> Status {
        match &err {
            ServerError::InvalidArgument(message) => {
                warn!(%message, "invalid argument");
                Status::invalid_argument(message.clone())
            }
            ServerError::NotFound(message) => {
                warn!(%message, "not found");
                Status::not_found(message.clone())
            }
            ServerError::Conflict(message) => {
                warn!(%message, "conflict");
                Status::aborted(message.clone())
            }
            ServerError::CapacityExhausted => {
                warn!("session pool exhausted");
                Status::resource_exhausted(err.to_string())
            }
            ServerError::Engine(message) => {
                error!(%message, "engine failure");
                Status::internal(message.clone())
            }
            ServerError::NotImplemented(command) => {
                warn!(%command, "unknown command");
                Status::unimplemented(err.to_string())
            }
            ServerError::Internal(message) => {
                error!(%message, "internal error");
                Status::internal(message.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let cases = [
            (ServerError::invalid_argument("x"), Code::InvalidArgument),
            (ServerError::not_found("x"), Code::NotFound),
            (ServerError::conflict("x"), Code::Aborted),
            (ServerError::CapacityExhausted, Code::ResourceExhausted),
            (ServerError::Engine("x".into()), Code::Internal),
            (ServerError::NotImplemented("x".into()), Code::Unimplemented),
            (ServerError::internal("x"), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn engine_lookup_failures_map_to_not_found() {
        let err: ServerError = EngineError::UnknownCollection(7).into();
        assert!(matches!(err, ServerError::NotFound(_)));
        let err: ServerError = EngineError::UnknownSnapshot(7).into();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
