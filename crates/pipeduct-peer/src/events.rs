use std::sync::Arc;

use crate::error::PeerError;

/// Registered client identifier, unique for the server's lifetime.
pub type ClientId = u64;

/// Handler invoked for each received message.
///
/// Runs synchronously on the connection's read loop, so a `Some` return
/// is written back before the next message is read — response ordering
/// is deterministic per connection.
pub type MessageHandler = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Lifecycle notifications from a [`PipeServer`](crate::PipeServer).
#[derive(Debug)]
pub enum ServerEvent {
    Started,
    Stopped,
    ClientConnected { client: ClientId },
    ClientDisconnected { client: ClientId },
    /// A read loop hit an error; the loop terminated its connection
    /// gracefully and the error did not propagate.
    MessageLoopError { client: ClientId, error: PeerError },
}

/// Lifecycle notifications from a [`ClientEndpoint`](crate::ClientEndpoint).
#[derive(Debug)]
pub enum ClientEvent {
    Started,
    Stopped,
    ServerConnected,
    ServerDisconnected,
    MessageLoopError(PeerError),
}
