use std::io::Write;

use flate2::write::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;

use crate::error::{CodecError, Result};
use crate::Codec;

/// Stateless raw-DEFLATE codec, tuned for speed over ratio.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeflateCodec;

impl DeflateCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for DeflateCodec {
    fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).map_err(CodecError::Deflate)?;
        encoder.finish().map_err(CodecError::Deflate)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(CodecError::EmptyInput);
        }

        let mut decoder = DeflateDecoder::new(Vec::new());
        decoder.write_all(data).map_err(CodecError::Deflate)?;
        decoder.finish().map_err(CodecError::Deflate)
    }
}
