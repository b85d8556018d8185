//! Local IPC over duplex pipe pairs.
//!
//! pipeduct provides message-oriented, optionally compressed, optionally
//! encrypted request/response channels between two processes on the same
//! host, plus a multi-client server multiplexer and a key-bootstrap
//! handshake for spawned peers.
//!
//! # Crate Structure
//!
//! - [`transport`] — named pipe sockets, inheritable anonymous pairs,
//!   peer process launch
//! - [`codec`] — composable payload codecs (AES-256-CBC, DEFLATE)
//! - [`channel`] — framed duplex channels and the bootstrap handshake
//! - [`peer`] — server multiplexer and reconnecting client endpoint

/// Re-export transport types.
pub mod transport {
    pub use pipeduct_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use pipeduct_codec::*;
}

/// Re-export channel types.
pub mod channel {
    pub use pipeduct_channel::*;
}

/// Re-export peer endpoint types.
pub mod peer {
    pub use pipeduct_peer::*;
}
