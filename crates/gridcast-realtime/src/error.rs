use crate::transport::TransportError;
use gridcast_core::protocol::FrameError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a connection or of the connect operation itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("credentials rejected: {0}")]
    Unauthorized(String),
    #[error("no traffic for {0:?}")]
    KeepaliveTimeout(Duration),
    #[error("connection dropped: {0}")]
    Dropped(String),
    #[error("connect cancelled by disconnect")]
    Cancelled,
    #[error("connect superseded by different credentials")]
    Superseded,
    #[error("gave up after {0} reconnect attempts")]
    GaveUp(u32),
    #[error("realtime client has shut down")]
    ClientClosed,
}

impl ConnectError {
    /// Transport and timeout failures are retried; credential rejection and
    /// caller-driven outcomes are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectError::Unauthorized(_)
                | ConnectError::Cancelled
                | ConnectError::Superseded
                | ConnectError::GaveUp(_)
                | ConnectError::ClientClosed
        )
    }
}

/// Error delivered to a single subscription's handler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubscriptionError {
    #[error("server error: {message}")]
    Server { message: String, payload: Value },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}
