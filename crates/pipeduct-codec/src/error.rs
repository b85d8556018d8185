/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Empty input is undefined for every codec; an empty message on the
    /// wire means disconnect, never a payload.
    #[error("codec input must not be empty")]
    EmptyInput,

    /// The supplied key is not the required 32 bytes.
    #[error("invalid key length {len} (expected 32)")]
    KeyLength { len: usize },

    /// Ciphertext shorter than one IV plus one block cannot be valid.
    #[error("ciphertext too short ({len} bytes, need at least 17)")]
    CiphertextTooShort { len: usize },

    /// Block padding did not verify after decryption (wrong key, wrong
    /// IV, or corrupted ciphertext).
    #[error("AES padding mismatch")]
    Padding,

    /// The DEFLATE stream is malformed.
    #[error("DEFLATE error: {0}")]
    Deflate(#[source] std::io::Error),

    /// The key pack buffer is not exactly 48 bytes.
    #[error("invalid key pack length {len} (expected 48)")]
    KeyPackLength { len: usize },

    /// A pluggable serializer rejected the value or bytes.
    #[error("serialization error: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
