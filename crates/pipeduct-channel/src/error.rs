use std::time::Duration;

/// Errors that can occur on a duplex channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel was constructed or used inconsistently (missing base
    /// name, wrong direction for the operation, stream-mode invariant
    /// violated).
    #[error("channel configuration error: {0}")]
    Config(String),

    /// One logical message exceeds the channel's message buffer.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The pre-connect write cache is at capacity.
    #[error("write cache full ({limit} pending messages)")]
    WriteCacheFull { limit: usize },

    /// Decryption was requested but no key material is present.
    #[error("encryption enabled but no key material set")]
    MissingKey,

    /// A frame arrived without the expected magic prefix.
    #[error("malformed frame header")]
    BadFrame,

    /// Payload encode/decode failure.
    #[error("codec error: {0}")]
    Codec(#[from] pipeduct_codec::CodecError),

    /// Underlying pipe failure.
    #[error("transport error: {0}")]
    Transport(#[from] pipeduct_transport::TransportError),

    /// Raw stream I/O failure.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection mid-message.
    #[error("peer disconnected")]
    Disconnected,

    /// The operation did not complete before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ChannelError {
    /// True when the error is a read/write deadline expiry.
    pub fn is_timeout(&self) -> bool {
        match self {
            ChannelError::Timeout(_) => true,
            ChannelError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
