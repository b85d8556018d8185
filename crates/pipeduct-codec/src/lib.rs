//! Composable payload codecs for pipeduct.
//!
//! A [`Codec`] transforms one whole message at a time: `encode` on the
//! send path, `decode` on the receive path, `decode(encode(x)) == x`
//! for every non-empty `x`. Codecs compose through [`CodecChain`],
//! which applies members in order on encode and in reverse on decode —
//! the channel's send path is compress-then-encrypt, so the receive
//! path decrypts first.
//!
//! Empty input is undefined for every codec and fails loudly: an empty
//! message on the wire is a disconnect marker, never data.

pub mod chain;
pub mod crypto;
pub mod deflate;
pub mod error;
pub mod keypack;

pub use crate::chain::CodecChain;
pub use crate::crypto::AesCbcCodec;
pub use crate::deflate::DeflateCodec;
pub use crate::error::{CodecError, Result};
pub use crate::keypack::KeyPack;

/// A whole-message byte transform.
pub trait Codec: Send {
    /// Transform a message for the wire.
    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Recover a message from the wire.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Dispatch to `decode` or `encode`.
    fn apply(&mut self, data: &[u8], decode: bool) -> Result<Vec<u8>> {
        if decode {
            self.decode(data)
        } else {
            self.encode(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorCodec(u8);

    impl Codec for XorCodec {
        fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            if data.is_empty() {
                return Err(CodecError::EmptyInput);
            }
            Ok(data.iter().map(|b| b ^ self.0).collect())
        }

        fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            self.encode(data)
        }
    }

    #[test]
    fn apply_dispatches_on_flag() {
        let mut codec = XorCodec(0xA5);
        let encoded = codec.apply(b"payload", false).unwrap();
        assert_ne!(encoded.as_slice(), b"payload");
        let decoded = codec.apply(&encoded, true).unwrap();
        assert_eq!(decoded.as_slice(), b"payload");
    }
}
