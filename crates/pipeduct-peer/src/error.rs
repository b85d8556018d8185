use std::time::Duration;

/// Errors that can occur in server/client endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Endpoint misconfiguration (no base path, zero buffer, ...).
    #[error("endpoint configuration error: {0}")]
    Config(String),

    /// The operation is not allowed in the endpoint's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] pipeduct_transport::TransportError),

    /// Channel/framing failure.
    #[error("channel error: {0}")]
    Channel(#[from] pipeduct_channel::ChannelError),

    /// Raw stream I/O failure.
    #[error("endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One message exceeds the endpoint's message buffer.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// No connection is currently established.
    #[error("not connected")]
    NotConnected,

    /// No such client is registered.
    #[error("unknown client {0}")]
    UnknownClient(u64),

    /// The operation did not complete before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Graceful shutdown did not drain in time.
    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
