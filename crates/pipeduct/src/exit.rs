//! Process exit codes and the mapping from library errors onto them.
//!
//! Codes follow the usual conventions: sysexits' 64 for usage errors,
//! GNU timeout's 124, small positive codes for ordinary failures.

use std::io;

use pipeduct_channel::ChannelError;
use pipeduct_peer::PeerError;
use pipeduct_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

/// A failure carrying the exit code it maps to.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(&err), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(transport_code(&err), format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    CliError::new(channel_code(&err), format!("{context}: {err}"))
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    CliError::new(peer_code(&err), format!("{context}: {err}"))
}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => FAILURE,
        _ => INTERNAL,
    }
}

fn transport_code(err: &TransportError) -> i32 {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_code(source),
        TransportError::BadHandle(_) => USAGE,
        TransportError::PathTooLong { .. } => USAGE,
        TransportError::Spawn { .. } => FAILURE,
        TransportError::Shutdown => TRANSPORT_ERROR,
    }
}

fn channel_code(err: &ChannelError) -> i32 {
    match err {
        ChannelError::Transport(inner) => transport_code(inner),
        ChannelError::Io(source) => io_code(source),
        ChannelError::Timeout(_) => TIMEOUT,
        ChannelError::Codec(_)
        | ChannelError::BadFrame
        | ChannelError::MessageTooLarge { .. } => DATA_INVALID,
        ChannelError::Config(_) | ChannelError::MissingKey => USAGE,
        ChannelError::Disconnected | ChannelError::WriteCacheFull { .. } => FAILURE,
    }
}

fn peer_code(err: &PeerError) -> i32 {
    match err {
        PeerError::Transport(inner) => transport_code(inner),
        PeerError::Channel(inner) => channel_code(inner),
        PeerError::Io(source) => io_code(source),
        PeerError::Timeout(_) => TIMEOUT,
        PeerError::MessageTooLarge { .. } => DATA_INVALID,
        PeerError::Config(_) | PeerError::InvalidState { .. } => USAGE,
        PeerError::NotConnected | PeerError::UnknownClient(_) => FAILURE,
        PeerError::ShutdownFailed(_) => INTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn deadline_errors_map_to_the_timeout_code() {
        let from_io = io_error("read", io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(from_io.code, TIMEOUT);

        let from_channel =
            channel_error("request", ChannelError::Timeout(Duration::from_secs(5)));
        assert_eq!(from_channel.code, TIMEOUT);
    }

    #[test]
    fn nested_errors_classify_through_their_source() {
        let err = peer_error(
            "connect",
            PeerError::Transport(TransportError::Connect {
                path: "/tmp/pd".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            }),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn bad_handle_is_a_usage_error() {
        let err = transport_error("attach", TransportError::BadHandle("x".into()));
        assert_eq!(err.code, USAGE);
        assert!(err.to_string().starts_with("attach: "));
    }
}
