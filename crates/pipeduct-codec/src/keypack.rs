use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CodecError, Result};

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// IV length in bytes (AES block size).
pub const IV_LEN: usize = 16;
/// Packed wire length: key followed by IV.
pub const PACK_LEN: usize = KEY_LEN + IV_LEN;

/// The 48-byte key pack carried over the bootstrap pipe.
///
/// Wire form is `key(32) ‖ iv(16)`. The IV half only seeds the
/// receiver's initial codec state; every message on the main channel
/// carries its own IV inline.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPack {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl KeyPack {
    /// Generate fresh random key material.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Pack into the 48-byte wire form.
    pub fn to_bytes(&self) -> [u8; PACK_LEN] {
        let mut out = [0u8; PACK_LEN];
        out[..KEY_LEN].copy_from_slice(&self.key);
        out[KEY_LEN..].copy_from_slice(&self.iv);
        out
    }

    /// Unpack from the 48-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PACK_LEN {
            return Err(CodecError::KeyPackLength { len: bytes.len() });
        }
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        iv.copy_from_slice(&bytes[KEY_LEN..]);
        Ok(Self { key, iv })
    }
}

impl std::fmt::Debug for KeyPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPack")
            .field("key", &format_args!("<redacted:{KEY_LEN} bytes>"))
            .field("iv", &format_args!("<redacted:{IV_LEN} bytes>"))
            .finish()
    }
}
