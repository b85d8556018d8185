//! Message-framed duplex channels over local pipes.
//!
//! This is the core value-add layer of pipeduct. A [`DuplexChannel`]
//! turns a byte pipe into a stream of whole messages, each optionally
//! run through the codec pipeline (DEFLATE, then AES-256-CBC with a
//! per-message IV). A [`CombinedChannel`] adds the bootstrap handshake
//! that hands a fresh key to a spawned peer over a short-lived
//! anonymous pipe before switching to the named channel.

pub mod combined;
pub mod duplex;
pub mod error;
pub mod message;
pub mod serializer;

pub use combined::{BootstrapConfig, CombinedChannel};
pub use duplex::{
    ChannelConfig, ChannelEvent, ChannelMode, DuplexChannel, PipeDirection, PipeKind,
    RequestHandler, ServeHandle,
};
pub use error::{ChannelError, Result};
pub use message::{MessageReader, MessageWriter, HEADER_SIZE, MAGIC};
pub use serializer::{JsonSerializer, Serializer};
