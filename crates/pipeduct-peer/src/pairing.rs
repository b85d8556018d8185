//! Duplex-pair pairing preamble.
//!
//! The `-IN` and `-OUT` sockets accept independently, so with several
//! clients connecting at once the two accept queues can interleave.
//! Each client therefore opens both halves with the same 8-byte token
//! as the very first bytes on each connection; the server pairs the
//! halves by token. The token is `pid << 32 | sequence`, unique across
//! local processes without any extra negotiation.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use pipeduct_transport::IpcStream;

/// Pairing token length on the wire.
pub(crate) const TOKEN_LEN: usize = 8;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Produce a token unique to this process and attempt.
pub(crate) fn next_token() -> u64 {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFFF_FFFF;
    ((std::process::id() as u64) << 32) | seq
}

/// Write the pairing preamble on a freshly connected half.
pub(crate) fn write_token(stream: &mut IpcStream, token: u64) -> std::io::Result<()> {
    stream.write_all(&token.to_le_bytes())
}

/// Read the pairing preamble from a freshly accepted half.
pub(crate) fn read_token(stream: &mut IpcStream) -> std::io::Result<u64> {
    let mut buf = [0u8; TOKEN_LEN];
    stream.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn tokens_are_unique_and_carry_pid() {
        let a = next_token();
        let b = next_token();
        assert_ne!(a, b);
        assert_eq!((a >> 32) as u32, std::process::id());
    }

    #[test]
    fn token_roundtrip_over_stream() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut writer = IpcStream::from_std(left);
        let mut reader = IpcStream::from_std(right);

        let token = next_token();
        write_token(&mut writer, token).unwrap();
        assert_eq!(read_token(&mut reader).unwrap(), token);
    }
}
