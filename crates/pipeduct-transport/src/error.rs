use std::path::PathBuf;

/// Errors that can occur in pipe transport operations.
///
/// `Bind`, `PathTooLong`, `BadHandle`, and `Spawn` correspond to
/// OS-level handle/ACL failures and are fatal to the affected endpoint;
/// `Connect`, `Accept`, and `Io` may be recovered by a reconnect loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listening pipe at the given path.
    #[error("failed to bind pipe at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a pipe at the given path.
    #[error("failed to connect to pipe at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pipe path is too long for the platform's socket address.
    #[error("pipe path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The inherited handle string did not name a usable descriptor.
    #[error("invalid inherited pipe handle '{0}'")]
    BadHandle(String),

    /// Failed to launch the peer executable.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
