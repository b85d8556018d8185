//! Key bootstrap over an anonymous pipe, then an encrypted named channel.
//!
//! The process that spawns its peer hosts the bootstrap: it creates an
//! inheritable anonymous pipe, writes the 48-byte key pack to it, and
//! serves the main named channel under that key. The spawned process
//! attaches to the inherited handle, reads exactly the pack, and
//! connects the named channel with the received key — no prior shared
//! secret, no key on the command line.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use pipeduct_codec::keypack::PACK_LEN;
use pipeduct_codec::KeyPack;
use pipeduct_transport::{attach_inherited, launch, ChildProcess, InheritableHandle, IpcStream};

use crate::duplex::{ChannelConfig, ChannelMode, DuplexChannel};
use crate::error::{ChannelError, Result};

/// Bootstrap tunables.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Deadline for one `request`/`notify` exchange.
    pub request_timeout: Duration,
    /// Watchdog for the spawned side's key-pack read.
    pub key_read_timeout: Duration,
    /// Main channel configuration.
    pub channel: ChannelConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(5000),
            key_read_timeout: Duration::from_millis(5000),
            channel: ChannelConfig::default(),
        }
    }
}

/// A named duplex channel bootstrapped by an out-of-band key handshake.
pub struct CombinedChannel {
    channel: DuplexChannel,
    bootstrap: Option<IpcStream>,
    handle: Option<InheritableHandle>,
    initial_pipe_id: String,
    config: BootstrapConfig,
}

impl CombinedChannel {
    /// Host the bootstrap (the spawner's role).
    ///
    /// Creates the anonymous pipe, generates fresh key material on the
    /// named server channel at `base`, writes the key pack to the
    /// anonymous pipe, and starts the named channel.
    pub fn host(base: impl AsRef<Path>, config: BootstrapConfig) -> Result<Self> {
        let (mut bootstrap, handle) = pipeduct_transport::anonymous_pair()?;
        let initial_pipe_id = handle.pipe_id();

        let mut channel = DuplexChannel::named_server(base.as_ref(), config.channel.clone());
        let pack = channel.key_data();
        bootstrap.write_all(&pack.to_bytes())?;
        channel.start(None)?;

        info!(pipe_id = %initial_pipe_id, "hosting bootstrapped channel");
        Ok(Self {
            channel,
            bootstrap: Some(bootstrap),
            handle: Some(handle),
            initial_pipe_id,
            config,
        })
    }

    /// Attach as the spawned peer.
    ///
    /// Reads exactly the 48-byte key pack from the inherited handle
    /// under the watchdog deadline, then connects the named channel at
    /// `base` with the received key.
    pub fn attach(
        pipe_id: &str,
        base: impl AsRef<Path>,
        config: BootstrapConfig,
    ) -> Result<Self> {
        let mut bootstrap = attach_inherited(pipe_id)?;
        bootstrap.set_read_timeout(Some(config.key_read_timeout))?;

        let mut pack_bytes = [0u8; PACK_LEN];
        bootstrap.read_exact(&mut pack_bytes).map_err(|err| {
            if matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                ChannelError::Timeout(config.key_read_timeout)
            } else {
                ChannelError::Io(err)
            }
        })?;
        let pack = KeyPack::from_bytes(&pack_bytes)?;
        debug!(pipe_id, "received bootstrap key pack");

        let mut channel =
            DuplexChannel::named_client(base.as_ref(), config.channel.clone()).with_pack(&pack);
        channel.start(Some(config.channel.connect_timeout))?;

        Ok(Self {
            channel,
            bootstrap: Some(bootstrap),
            handle: None,
            initial_pipe_id: pipe_id.to_string(),
            config,
        })
    }

    /// The handle string the spawned peer must attach with.
    pub fn initial_pipe_id(&self) -> &str {
        &self.initial_pipe_id
    }

    /// Spawn the peer executable, substituting the `PIPE_ID` token in
    /// its arguments with the bootstrap handle string.
    ///
    /// The inheritable handle stays open so a replacement child can be
    /// launched after [`reinitialize`](Self::reinitialize); it closes on
    /// dispose.
    pub fn launch_peer(&mut self, program: &str, args: &[String]) -> Result<ChildProcess> {
        if self.handle.is_none() {
            return Err(ChannelError::Config(
                "bootstrap handle already released".to_string(),
            ));
        }
        let child = launch(program, args, &self.initial_pipe_id)?;
        Ok(child)
    }

    /// Re-send the key pack on the anonymous pipe, for a replaced peer
    /// process.
    pub fn reinitialize(&mut self) -> Result<()> {
        let pack = self.channel.key_data();
        match self.bootstrap.as_mut() {
            Some(bootstrap) => {
                bootstrap.write_all(&pack.to_bytes())?;
                debug!("re-sent bootstrap key pack");
                Ok(())
            }
            None => Err(ChannelError::Config(
                "bootstrap pipe already disposed".to_string(),
            )),
        }
    }

    /// Give up ownership of the inheritable handle, returning its
    /// handle string.
    ///
    /// For same-process peers (tests, in-process workers) that will
    /// attach the descriptor directly; `attach` then owns it.
    pub fn release_handle(&mut self) -> Option<String> {
        self.handle.take().map(InheritableHandle::into_pipe_id)
    }

    /// Write `data` and wait for one response message.
    pub fn request(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<Vec<u8>> {
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let outcome = self.exchange(data, timeout, true);
        let _ = self.channel.set_io_timeout(None);
        match outcome {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(ChannelError::Disconnected),
            Err(err) if err.is_timeout() => Err(ChannelError::Timeout(timeout)),
            Err(err) => Err(err),
        }
    }

    /// Write `data` without waiting for a response.
    pub fn notify(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let outcome = self.exchange(data, timeout, false);
        let _ = self.channel.set_io_timeout(None);
        match outcome {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() => Err(ChannelError::Timeout(timeout)),
            Err(err) => Err(err),
        }
    }

    /// The main named channel.
    pub fn channel(&self) -> &DuplexChannel {
        &self.channel
    }

    /// Mutable access to the main named channel (serving, events).
    pub fn channel_mut(&mut self) -> &mut DuplexChannel {
        &mut self.channel
    }

    /// Consume into the main channel, dropping the bootstrap pipe.
    pub fn into_channel(self) -> DuplexChannel {
        self.channel
    }

    /// Release the channel, the bootstrap pipe, and the inheritable
    /// handle.
    pub fn dispose(&mut self) {
        self.channel.dispose();
        self.bootstrap = None;
        self.handle = None;
    }

    fn exchange(
        &mut self,
        data: &[u8],
        timeout: Duration,
        read_back: bool,
    ) -> Result<Option<Vec<u8>>> {
        // A hosting side may still be pre-accept; wait for the peer
        // under the same deadline that governs the exchange.
        if self.channel.mode() == ChannelMode::Server && !self.channel.ready() {
            if !self.channel.accept(Some(timeout))? {
                return Err(ChannelError::Timeout(timeout));
            }
        }
        self.channel.set_io_timeout(Some(timeout))?;

        self.channel.write_bytes(data)?;
        if !read_back {
            return Ok(None);
        }
        self.channel.read_bytes()
    }
}

impl std::fmt::Debug for CombinedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedChannel")
            .field("initial_pipe_id", &self.initial_pipe_id)
            .field("channel", &self.channel)
            .finish()
    }
}
