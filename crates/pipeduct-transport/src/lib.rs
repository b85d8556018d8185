//! Local pipe transports for pipeduct.
//!
//! A logical connection is a *duplex pair*: two unidirectional byte
//! streams named `<base>-IN` (server reads, client writes) and
//! `<base>-OUT` (server writes, client reads). On Unix the named halves
//! are Unix domain sockets; the short-lived bootstrap pipe is an
//! inheritable socketpair whose child-side descriptor number doubles as
//! the handle string handed to a spawned process.

pub mod anon;
pub mod error;
pub mod named;
pub mod spawn;
pub mod stream;

pub use anon::{anonymous_pair, attach_inherited, InheritableHandle};
pub use error::{Result, TransportError};
pub use named::{duplex_paths, PipeListener, DEFAULT_SOCKET_MODE};
pub use spawn::{launch, ChildProcess, PIPE_ID_TOKEN};
pub use stream::IpcStream;
