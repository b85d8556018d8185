use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use pipeduct_codec::{AesCbcCodec, Codec, CodecError, DeflateCodec, KeyPack};
use pipeduct_transport::{anonymous_pair, attach_inherited, InheritableHandle, IpcStream, PipeListener};

use crate::error::{ChannelError, Result};
use crate::message::{MessageReader, MessageWriter};
use crate::serializer::Serializer;

/// Which side of the conversation this channel plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Client,
    Server,
    /// Wraps an externally supplied, already-connected byte stream.
    Stream,
}

/// Allowed data direction for the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    In,
    Out,
    InOut,
}

/// The pipe flavor underneath a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeKind {
    /// Inherited-descriptor bootstrap pipe; `pipe_id` is the handle string.
    Anonymous { pipe_id: String },
    /// Filesystem-named pipe.
    Named { base: PathBuf },
    /// Caller-provided stream; establishment already happened elsewhere.
    RawStream,
}

/// Channel tunables.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound for one logical message's payload.
    pub message_buffer_size: usize,
    /// DEFLATE the payload before encrypting.
    pub use_compression: bool,
    /// AES-256-CBC the payload, fresh IV per message.
    pub use_encryption: bool,
    /// Client-side connection timeout.
    pub connect_timeout: Duration,
    /// Maximum messages parked in the pre-accept write cache.
    pub write_cache_limit: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            message_buffer_size: 64 * 1024,
            use_compression: true,
            use_encryption: true,
            connect_timeout: Duration::from_millis(500),
            write_cache_limit: 256,
        }
    }
}

/// Lifecycle notifications from a serve loop.
#[derive(Debug)]
pub enum ChannelEvent {
    ClientConnected,
    ClientDisconnected,
    LoopError(ChannelError),
}

/// Handler invoked for each received message; a `Some` return is
/// written back as the response.
pub type RequestHandler = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Room for codec expansion on top of the payload bound: IV + block
/// padding for AES, stored-block framing for incompressible DEFLATE.
const CODEC_SLACK: usize = 256;

/// Poll interval used by serve loops to observe cancellation.
const SERVE_POLL: Duration = Duration::from_millis(100);

/// One logical bidirectional channel over a local pipe.
///
/// Send path: payload → deflate → aes (IV prepended) → frame → pipe.
/// Receive path mirrors it. A named server that has not yet accepted a
/// client parks outgoing messages in a bounded write cache and flushes
/// it on accept.
pub struct DuplexChannel {
    mode: ChannelMode,
    kind: PipeKind,
    direction: PipeDirection,
    config: ChannelConfig,
    listener: Option<PipeListener>,
    stream: Option<IpcStream>,
    reader: Option<MessageReader<IpcStream>>,
    writer: Option<MessageWriter<IpcStream>>,
    compression: Option<DeflateCodec>,
    encryption: Option<AesCbcCodec>,
    write_cache: VecDeque<Vec<u8>>,
    disposed: bool,
}

impl DuplexChannel {
    fn new(mode: ChannelMode, kind: PipeKind, config: ChannelConfig) -> Self {
        Self {
            mode,
            kind,
            direction: PipeDirection::InOut,
            config,
            listener: None,
            stream: None,
            reader: None,
            writer: None,
            compression: None,
            encryption: None,
            write_cache: VecDeque::new(),
            disposed: false,
        }
    }

    /// A server channel listening at a named pipe path.
    pub fn named_server(base: impl AsRef<Path>, config: ChannelConfig) -> Self {
        Self::new(
            ChannelMode::Server,
            PipeKind::Named {
                base: base.as_ref().to_path_buf(),
            },
            config,
        )
    }

    /// A client channel connecting to a named pipe path.
    pub fn named_client(base: impl AsRef<Path>, config: ChannelConfig) -> Self {
        Self::new(
            ChannelMode::Client,
            PipeKind::Named {
                base: base.as_ref().to_path_buf(),
            },
            config,
        )
    }

    /// A server channel over a fresh anonymous pipe.
    ///
    /// Returns the channel and the inheritable child-side handle; the
    /// handle string is also available as [`pipe_id`](Self::pipe_id).
    pub fn anonymous_server(config: ChannelConfig) -> Result<(Self, InheritableHandle)> {
        let (stream, handle) = anonymous_pair()?;
        let mut channel = Self::new(
            ChannelMode::Server,
            PipeKind::Anonymous {
                pipe_id: handle.pipe_id(),
            },
            config,
        );
        channel.install_stream(stream)?;
        Ok((channel, handle))
    }

    /// A client channel attached to an inherited anonymous pipe handle.
    pub fn anonymous_client(pipe_id: &str, config: ChannelConfig) -> Result<Self> {
        let stream = attach_inherited(pipe_id)?;
        let mut channel = Self::new(
            ChannelMode::Client,
            PipeKind::Anonymous {
                pipe_id: pipe_id.to_string(),
            },
            config,
        );
        channel.install_stream(stream)?;
        Ok(channel)
    }

    /// A channel wrapping an externally supplied connected stream.
    pub fn from_stream(stream: IpcStream, config: ChannelConfig) -> Result<Self> {
        let mut channel = Self::new(ChannelMode::Stream, PipeKind::RawStream, config);
        channel.install_stream(stream)?;
        Ok(channel)
    }

    /// Restrict the channel to one data direction.
    ///
    /// Stream mode is full-duplex by construction and rejects anything
    /// but `InOut`.
    pub fn with_direction(mut self, direction: PipeDirection) -> Result<Self> {
        if matches!(self.mode, ChannelMode::Stream) && direction != PipeDirection::InOut {
            return Err(ChannelError::Config(
                "stream-mode channel must be bidirectional".to_string(),
            ));
        }
        self.direction = direction;
        Ok(self)
    }

    /// Adopt an explicit 32-byte encryption key (fresh IV).
    pub fn with_key(mut self, key: &[u8]) -> Result<Self> {
        self.encryption = Some(AesCbcCodec::with_key(key)?);
        Ok(self)
    }

    /// Adopt a bootstrap key pack as the full initial codec state.
    pub fn with_pack(mut self, pack: &KeyPack) -> Self {
        self.encryption = Some(AesCbcCodec::from_pack(pack));
        self
    }

    /// The anonymous pipe handle string, if this channel has one.
    pub fn pipe_id(&self) -> Option<&str> {
        match &self.kind {
            PipeKind::Anonymous { pipe_id } => Some(pipe_id),
            _ => None,
        }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn direction(&self) -> PipeDirection {
        self.direction
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Key and current IV as the 48-byte bootstrap pack, creating the
    /// encryption codec on first use.
    pub fn key_data(&mut self) -> KeyPack {
        self.encryption
            .get_or_insert_with(AesCbcCodec::new)
            .key_pack()
    }

    /// Establish the channel.
    ///
    /// Clients connect (with `timeout`, falling back to the configured
    /// connection timeout); named servers bind and accept lazily.
    /// Anonymous and stream channels are connected at construction, so
    /// this is a no-op for them.
    pub fn start(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.disposed {
            return Ok(());
        }

        match (&self.mode, self.kind.clone()) {
            (ChannelMode::Client, PipeKind::Named { base }) => {
                let timeout = timeout.unwrap_or(self.config.connect_timeout);
                let stream = pipeduct_transport::named::connect_timeout(&base, timeout)?;
                self.install_stream(stream)?;
                Ok(())
            }
            (ChannelMode::Server, PipeKind::Named { base }) => {
                if self.listener.is_none() {
                    self.listener = Some(PipeListener::bind(&base)?);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// True iff the underlying stream is currently connected.
    pub fn ready(&self) -> bool {
        !self.disposed && self.stream.is_some()
    }

    /// Accept one client on a listening named server.
    ///
    /// With a deadline, returns `Ok(false)` when nothing arrived in
    /// time. If a previous connection is still installed it is
    /// disconnected first, then the fresh one takes its place. Pending
    /// cached writes flush to the new client.
    pub fn accept(&mut self, deadline: Option<Duration>) -> Result<bool> {
        if self.disposed {
            return Ok(false);
        }
        let listener = self.listener.as_ref().ok_or_else(|| {
            ChannelError::Config("accept requires a started named server".to_string())
        })?;

        let stream = match deadline {
            Some(deadline) => match listener.accept_deadline(deadline)? {
                Some(stream) => stream,
                None => return Ok(false),
            },
            None => listener.accept()?,
        };

        if self.stream.is_some() {
            self.disconnect();
        }
        self.install_stream(stream)?;
        self.flush_write_cache()?;
        Ok(true)
    }

    /// Drop the current connection, keeping the listener (if any) so a
    /// new client can be accepted.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
        self.reader = None;
        self.writer = None;
    }

    /// Apply a read/write deadline to the connected stream.
    pub fn set_io_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        Ok(())
    }

    /// Encode and write one message.
    ///
    /// On a named server with no accepted client yet, the encoded
    /// message is parked in the write cache (bounded by
    /// `write_cache_limit`) and flushed on accept. After dispose this is
    /// a silent no-op.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        if self.direction == PipeDirection::In {
            return Err(ChannelError::Config(
                "write on an inbound-only channel".to_string(),
            ));
        }
        if data.is_empty() {
            return Err(CodecError::EmptyInput.into());
        }
        if data.len() > self.config.message_buffer_size {
            return Err(ChannelError::MessageTooLarge {
                size: data.len(),
                max: self.config.message_buffer_size,
            });
        }

        let encoded = self.encode_payload(data)?;

        if let Some(writer) = self.writer.as_mut() {
            return writer.send(&encoded);
        }

        if matches!(self.mode, ChannelMode::Server) && self.listener.is_some() {
            if self.write_cache.len() >= self.config.write_cache_limit {
                return Err(ChannelError::WriteCacheFull {
                    limit: self.config.write_cache_limit,
                });
            }
            debug!(pending = self.write_cache.len() + 1, "caching pre-accept write");
            self.write_cache.push_back(encoded);
            return Ok(());
        }

        Err(ChannelError::Config("channel not started".to_string()))
    }

    /// Write a UTF-8 string as one message.
    pub fn write_utf8(&mut self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes())
    }

    /// Serialize and write a typed value as one message.
    pub fn write_with<T, S: Serializer<T>>(&mut self, serializer: &S, value: &T) -> Result<()> {
        let bytes = serializer.to_bytes(value)?;
        self.write_bytes(&bytes)
    }

    /// Read and decode one message.
    ///
    /// `Ok(None)` means the peer disconnected (or the channel is
    /// disposed). A named server with no connection yet blocks in
    /// accept first.
    pub fn read_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        if self.disposed {
            return Ok(None);
        }
        if self.direction == PipeDirection::Out {
            return Err(ChannelError::Config(
                "read on an outbound-only channel".to_string(),
            ));
        }

        if self.reader.is_none() {
            if matches!(self.mode, ChannelMode::Server) && self.listener.is_some() {
                self.accept(None)?;
            } else {
                return Err(ChannelError::Config("channel not started".to_string()));
            }
        }

        let frame = match self.reader.as_mut() {
            Some(reader) => reader.read_message()?,
            None => return Err(ChannelError::Config("channel not started".to_string())),
        };

        match frame {
            Some(frame) => Ok(Some(self.decode_payload(&frame)?)),
            None => Ok(None),
        }
    }

    /// Read one message as a UTF-8 string.
    pub fn read_utf8(&mut self) -> Result<Option<String>> {
        match self.read_bytes()? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|err| CodecError::Serialize(err.to_string()))?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Read and deserialize one typed message.
    pub fn read_with<T, S: Serializer<T>>(&mut self, serializer: &S) -> Result<Option<T>> {
        match self.read_bytes()? {
            Some(bytes) => Ok(Some(serializer.from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Release the pipes and the write cache. Further reads return
    /// `None`, further writes are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disconnect();
        self.listener = None;
        self.write_cache.clear();
        self.disposed = true;
    }

    /// Run the named-server accept/read loop on a background thread.
    ///
    /// Each received message invokes `handler`; a `Some` return is
    /// written back before the next read. Disconnects re-enter accept.
    /// Lifecycle and loop errors surface on the returned event channel;
    /// the loop itself never panics out.
    pub fn serve(
        mut self,
        mut handler: RequestHandler,
    ) -> Result<(ServeHandle, mpsc::Receiver<ChannelEvent>)> {
        let (events, event_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancel);

        let thread = std::thread::Builder::new()
            .name("pipeduct-serve".to_string())
            .spawn(move || {
                // Connected channels poll reads; pending servers poll accept.
                let _ = self.set_io_timeout(Some(SERVE_POLL));

                while !cancel_flag.load(Ordering::Relaxed) {
                    if self.reader.is_none() {
                        if self.listener.is_none() {
                            break;
                        }
                        match self.accept(Some(SERVE_POLL)) {
                            Ok(true) => {
                                let _ = self.set_io_timeout(Some(SERVE_POLL));
                                let _ = events.send(ChannelEvent::ClientConnected);
                            }
                            Ok(false) => {}
                            Err(err) => {
                                let _ = events.send(ChannelEvent::LoopError(err));
                            }
                        }
                        continue;
                    }

                    match self.read_bytes() {
                        Ok(Some(request)) => {
                            if let Some(response) = handler(&request) {
                                if cancel_flag.load(Ordering::Relaxed) {
                                    break;
                                }
                                if let Err(err) = self.write_bytes(&response) {
                                    let _ = events.send(ChannelEvent::LoopError(err));
                                    self.disconnect();
                                }
                            }
                        }
                        Ok(None) => {
                            let _ = events.send(ChannelEvent::ClientDisconnected);
                            self.disconnect();
                            if self.listener.is_none() {
                                break;
                            }
                        }
                        Err(err) if err.is_timeout() => {}
                        Err(err) => {
                            let _ = events.send(ChannelEvent::LoopError(err));
                            let _ = events.send(ChannelEvent::ClientDisconnected);
                            self.disconnect();
                            if self.listener.is_none() {
                                break;
                            }
                        }
                    }
                }

                self
            })
            .map_err(ChannelError::Io)?;

        Ok((ServeHandle { cancel, thread }, event_rx))
    }

    fn install_stream(&mut self, stream: IpcStream) -> Result<()> {
        let frame_max = self.config.message_buffer_size + CODEC_SLACK;
        self.reader = Some(MessageReader::new(stream.try_clone()?, frame_max));
        self.writer = Some(MessageWriter::new(stream.try_clone()?, frame_max));
        self.stream = Some(stream);
        Ok(())
    }

    fn flush_write_cache(&mut self) -> Result<()> {
        if self.write_cache.is_empty() {
            return Ok(());
        }
        debug!(pending = self.write_cache.len(), "flushing write cache");
        while let Some(encoded) = self.write_cache.pop_front() {
            match self.writer.as_mut() {
                Some(writer) => writer.send(&encoded)?,
                None => {
                    warn!("write cache flush without a connected writer");
                    return Err(ChannelError::Config("channel not started".to_string()));
                }
            }
        }
        Ok(())
    }

    fn encode_payload(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut current: Option<Vec<u8>> = None;

        if self.config.use_compression {
            let codec = self.compression.get_or_insert_with(DeflateCodec::new);
            current = Some(codec.encode(data)?);
        }

        if self.config.use_encryption {
            if self.encryption.is_none() {
                // Servers own the key; a client without one cannot
                // guess it, so auto-generating would just corrupt the
                // conversation.
                if self.mode == ChannelMode::Client {
                    return Err(ChannelError::MissingKey);
                }
                self.encryption = Some(AesCbcCodec::new());
            }
            if let Some(codec) = self.encryption.as_mut() {
                let input = current.as_deref().unwrap_or(data);
                current = Some(codec.encode(input)?);
            }
        }

        Ok(current.unwrap_or_else(|| data.to_vec()))
    }

    fn decode_payload(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut current: Option<Vec<u8>> = None;

        if self.config.use_encryption {
            let codec = self.encryption.as_mut().ok_or(ChannelError::MissingKey)?;
            current = Some(codec.decode(data)?);
        }

        if self.config.use_compression {
            let codec = self.compression.get_or_insert_with(DeflateCodec::new);
            let input = current.as_deref().unwrap_or(data);
            current = Some(codec.decode(input)?);
        }

        Ok(current.unwrap_or_else(|| data.to_vec()))
    }
}

impl std::fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexChannel")
            .field("mode", &self.mode)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("ready", &self.ready())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Control handle for a running serve loop.
pub struct ServeHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<DuplexChannel>,
}

impl ServeHandle {
    /// Signal the loop to stop and wait for it, returning the channel.
    ///
    /// `None` means a handler panicked; the loop itself catches its own
    /// errors, so there is no channel left to recover in that case.
    pub fn stop(self) -> Option<DuplexChannel> {
        self.cancel.store(true, Ordering::Relaxed);
        self.thread.join().ok()
    }
}
