//! Multi-client pipe server and reconnecting client endpoint.
//!
//! This is the "just works" layer. A [`PipeServer`] accepts up to
//! `max_clients` concurrent clients over `-IN`/`-OUT` duplex pairs and
//! runs one message loop per connection; a [`ClientEndpoint`] connects
//! the mirrored pair, optionally retrying forever. Both surface
//! lifecycle notifications on a typed event channel and hand received
//! messages to a handler whose return value, if any, is written back.

pub mod client;
pub mod error;
pub mod events;
mod pairing;
mod registry;
pub mod server;

pub use client::{ClientConfig, ClientEndpoint, ClientState};
pub use error::{PeerError, Result};
pub use events::{ClientEvent, ClientId, MessageHandler, ServerEvent};
pub use registry::BroadcastOutcome;
pub use server::{PipeServer, ServerConfig, ServerState};
