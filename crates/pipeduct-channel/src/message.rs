//! Length-prefixed message framing.
//!
//! One frame is one logical message. A pipe is a byte stream, so the
//! message boundary has to travel on the wire:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────┐
//! │ Magic (2B) │ Length     │ Payload          │
//! │ 0x50 0x44  │ (4B LE)    │ (Length bytes)   │
//! │ "PD"       │            │                  │
//! └────────────┴────────────┴──────────────────┘
//! ```
//!
//! Zero-length frames are never produced: an empty message is the
//! disconnect marker, so the writer rejects empty payloads and the
//! reader reports clean EOF as `Ok(None)`.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChannelError, Result};

/// Frame header: magic (2) + length (4).
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "PD" (0x50 0x44).
pub const MAGIC: [u8; 2] = [0x50, 0x44];

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Encode one message into the wire format.
pub fn encode_message(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.is_empty() {
        return Err(pipeduct_codec::CodecError::EmptyInput.into());
    }
    if payload.len() > u32::MAX as usize {
        return Err(ChannelError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_size: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(ChannelError::BadFrame);
    }

    let payload_len = u32::from_le_bytes(src[2..6].try_into().expect("slice is 4 bytes")) as usize;
    if payload_len > max_size {
        return Err(ChannelError::MessageTooLarge {
            size: payload_len,
            max: max_size,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Reads complete messages from any `Read` stream.
///
/// Partial reads are handled internally; callers always get whole
/// messages.
pub struct MessageReader<R> {
    inner: R,
    buf: BytesMut,
    max_size: usize,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R, max_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_size,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// `Ok(None)` means the peer closed the stream cleanly between
    /// messages — a disconnect, not an empty message. EOF inside a
    /// partially received frame is `ChannelError::Disconnected`.
    pub fn read_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.max_size)? {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ChannelError::Disconnected);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes complete messages to any `Write` stream.
pub struct MessageWriter<W> {
    inner: W,
    buf: BytesMut,
    max_size: usize,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(inner: W, max_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_size,
        }
    }

    /// Frame and write one message (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_size {
            return Err(ChannelError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        self.buf.clear();
        encode_message(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(ChannelError::Disconnected),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
