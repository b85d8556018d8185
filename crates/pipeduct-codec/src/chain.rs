use crate::error::{CodecError, Result};
use crate::Codec;

/// An ordered composition of codecs.
///
/// `encode` applies members front to back; `decode` applies them back
/// to front. The channel's standard chain is `[deflate, aes]`: compress
/// then encrypt on send, decrypt then decompress on receive.
#[derive(Default)]
pub struct CodecChain {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecChain {
    pub fn new() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Append a codec to the encode-side end of the chain.
    pub fn push(&mut self, codec: Box<dyn Codec>) {
        self.codecs.push(codec);
    }

    /// Builder-style `push`.
    pub fn with(mut self, codec: Box<dyn Codec>) -> Self {
        self.push(codec);
        self
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl Codec for CodecChain {
    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let mut current = data.to_vec();
        for codec in self.codecs.iter_mut() {
            current = codec.encode(&current)?;
        }
        Ok(current)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let mut current = data.to_vec();
        for codec in self.codecs.iter_mut().rev() {
            current = codec.decode(&current)?;
        }
        Ok(current)
    }
}

impl std::fmt::Debug for CodecChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecChain")
            .field("len", &self.codecs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesCbcCodec;
    use crate::deflate::DeflateCodec;

    const SAMPLE: &[u8] = &[4, 8, 15, 16, 23, 42];
    const SAMPLE_ALT: &[u8] = &[1, 2, 4, 8, 15, 26, 42];

    fn standard_chain() -> (CodecChain, [u8; 32]) {
        let aes = AesCbcCodec::new();
        let key = *aes.key();
        let chain = CodecChain::new()
            .with(Box::new(DeflateCodec::new()))
            .with(Box::new(aes));
        (chain, key)
    }

    #[test]
    fn empty_chain_is_identity() {
        let mut chain = CodecChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.encode(SAMPLE).unwrap().as_slice(), SAMPLE);
        assert_eq!(chain.decode(SAMPLE).unwrap().as_slice(), SAMPLE);
    }

    #[test]
    fn empty_input_still_fails_on_empty_chain() {
        let mut chain = CodecChain::new();
        assert!(matches!(chain.encode(&[]), Err(CodecError::EmptyInput)));
        assert!(matches!(chain.decode(&[]), Err(CodecError::EmptyInput)));
    }

    #[test]
    fn deflate_then_aes_roundtrip() {
        let (mut chain, _key) = standard_chain();
        for payload in [SAMPLE, SAMPLE_ALT] {
            let encoded = chain.apply(payload, false).unwrap();
            let decoded = chain.apply(&encoded, true).unwrap();
            assert_eq!(decoded.as_slice(), payload);
        }
    }

    #[test]
    fn chain_decodes_under_peer_with_same_key() {
        let (mut sender, key) = standard_chain();
        let encoded = sender.encode(SAMPLE).unwrap();

        let mut receiver = CodecChain::new()
            .with(Box::new(DeflateCodec::new()))
            .with(Box::new(AesCbcCodec::with_key(&key).unwrap()));
        assert_eq!(receiver.decode(&encoded).unwrap().as_slice(), SAMPLE);
    }

    #[test]
    fn decode_order_is_reversed() {
        // Encrypt-last means the outermost bytes must start with an IV;
        // decoding in forward order would feed ciphertext to DEFLATE.
        let (mut chain, _key) = standard_chain();
        let encoded = chain.encode(SAMPLE).unwrap();

        let mut wrong_order = CodecChain::new()
            .with(Box::new(AesCbcCodec::new()))
            .with(Box::new(DeflateCodec::new()));
        assert!(wrong_order.decode(&encoded).is_err());
    }

    #[test]
    fn single_member_chain_matches_inner_codec() {
        let mut chain = CodecChain::new().with(Box::new(DeflateCodec::new()));
        assert_eq!(chain.len(), 1);
        let encoded = chain.encode(SAMPLE).unwrap();

        let mut inner = DeflateCodec::new();
        assert_eq!(inner.decode(&encoded).unwrap().as_slice(), SAMPLE);
    }
}
