use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use pipeduct_channel::{ChannelError, MessageReader, MessageWriter};
use pipeduct_transport::named::connect_timeout;
use pipeduct_transport::{duplex_paths, IpcStream};

use crate::error::{PeerError, Result};
use crate::events::{ClientEvent, MessageHandler};
use crate::pairing;

/// Poll interval for the read loop to observe cancellation.
const LOOP_POLL: Duration = Duration::from_millis(50);

/// Granularity of the reconnect sleep, so stop is never held up by a
/// long polling interval.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Client endpoint tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base pipe name; the duplex pair lives at `<base>-IN`/`<base>-OUT`.
    pub base_path: PathBuf,
    /// Upper bound for one logical message.
    pub message_buffer_size: usize,
    /// Deadline for one connection attempt.
    pub connection_timeout: Duration,
    /// Sleep between reconnect attempts. Zero selects one-shot mode:
    /// a single attempt whose failure leaves the endpoint stopped.
    pub reconnect_polling_interval: Duration,
    /// How long `stop` waits for the worker to wind down.
    pub stop_drain_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            message_buffer_size: 4096,
            connection_timeout: Duration::from_millis(500),
            reconnect_polling_interval: Duration::from_millis(500),
            stop_drain_timeout: Duration::from_millis(2500),
        }
    }

    /// One-shot mode: a single connect attempt, no reconnect loop.
    pub fn one_shot(mut self) -> Self {
        self.reconnect_polling_interval = Duration::ZERO;
        self
    }
}

/// Client lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Starting,
    Connected,
    Reconnecting,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientState::Idle => "idle",
            ClientState::Starting => "starting",
            ClientState::Connected => "connected",
            ClientState::Reconnecting => "reconnecting",
            ClientState::Stopping => "stopping",
            ClientState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Client side of a duplex pipe pair.
///
/// Connects the client's outbound half to the server's `-IN` pipe and
/// its inbound half to the server's `-OUT` pipe, runs one message loop,
/// and (in polling mode) keeps reconnecting whenever the server goes
/// away.
pub struct ClientEndpoint {
    config: ClientConfig,
    handler: MessageHandler,
    state: Arc<Mutex<ClientState>>,
    cancel: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<MessageWriter<IpcStream>>>>,
    ctrl: Arc<Mutex<Option<(IpcStream, IpcStream)>>>,
    events_tx: mpsc::Sender<ClientEvent>,
    latch_tx: mpsc::SyncSender<()>,
    latch_rx: mpsc::Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl ClientEndpoint {
    /// Create an endpoint and the receiver for its lifecycle events.
    pub fn new(config: ClientConfig, handler: MessageHandler) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel();
        let (latch_tx, latch_rx) = mpsc::sync_channel(1);
        let endpoint = Self {
            config,
            handler,
            state: Arc::new(Mutex::new(ClientState::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            writer: Arc::new(Mutex::new(None)),
            ctrl: Arc::new(Mutex::new(None)),
            events_tx,
            latch_tx,
            latch_rx,
            worker: None,
        };
        (endpoint, events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// True while a duplex pair is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Begin connecting (and, in polling mode, reconnecting).
    pub fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ClientState::Idle | ClientState::Stopped => *state = ClientState::Starting,
                other => {
                    return Err(PeerError::InvalidState {
                        operation: "start",
                        state: other.to_string(),
                    })
                }
            }
        }

        if self.config.base_path.as_os_str().is_empty() {
            *self.state.lock().expect("state lock poisoned") = ClientState::Idle;
            return Err(PeerError::Config("base pipe name not set".to_string()));
        }

        self.cancel.store(false, Ordering::SeqCst);
        let ctx = WorkerContext {
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            state: Arc::clone(&self.state),
            cancel: Arc::clone(&self.cancel),
            connected: Arc::clone(&self.connected),
            writer: Arc::clone(&self.writer),
            ctrl: Arc::clone(&self.ctrl),
            events: self.events_tx.clone(),
            latch: self.latch_tx.clone(),
        };
        let worker = std::thread::Builder::new()
            .name("pipeduct-client".to_string())
            .spawn(move || worker_loop(ctx))
            .map_err(|err| PeerError::Transport(pipeduct_transport::TransportError::Io(err)))?;
        self.worker = Some(worker);

        let _ = self.events_tx.send(ClientEvent::Started);
        info!(base = ?self.config.base_path, "client started");
        Ok(())
    }

    /// Write one message to the server.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(PeerError::InvalidState {
                operation: "send",
                state: self.state().to_string(),
            });
        }
        if message.len() > self.config.message_buffer_size {
            return Err(PeerError::MessageTooLarge {
                size: message.len(),
                max: self.config.message_buffer_size,
            });
        }

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        match writer.as_mut() {
            Some(writer) => writer.send(message).map_err(PeerError::Channel),
            None => Err(PeerError::NotConnected),
        }
    }

    /// Cancel, dispose the duplex, and wait for the worker to drain.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ClientState::Starting
                | ClientState::Connected
                | ClientState::Reconnecting => *state = ClientState::Stopping,
                ClientState::Idle | ClientState::Stopped | ClientState::Stopping => {
                    return Ok(())
                }
            }
        }

        while self.latch_rx.try_recv().is_ok() {}
        self.cancel.store(true, Ordering::SeqCst);

        // Unblock a parked read by tearing the streams down.
        if let Some((in_ctrl, out_ctrl)) = self.ctrl.lock().expect("ctrl lock poisoned").take() {
            let _ = in_ctrl.shutdown();
            let _ = out_ctrl.shutdown();
        }

        if self.worker.is_some()
            && self
                .latch_rx
                .recv_timeout(self.config.stop_drain_timeout)
                .is_err()
        {
            warn!("client worker did not drain before the stop deadline");
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        *self.state.lock().expect("state lock poisoned") = ClientState::Stopped;
        let _ = self.events_tx.send(ClientEvent::Stopped);
        info!(base = ?self.config.base_path, "client stopped");
        Ok(())
    }
}

impl Drop for ClientEndpoint {
    fn drop(&mut self) {
        // Wake the worker; it holds its own Arc clones and exits on the
        // next poll.
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ClientEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEndpoint")
            .field("base", &self.config.base_path)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct WorkerContext {
    config: ClientConfig,
    handler: MessageHandler,
    state: Arc<Mutex<ClientState>>,
    cancel: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<MessageWriter<IpcStream>>>>,
    ctrl: Arc<Mutex<Option<(IpcStream, IpcStream)>>>,
    events: mpsc::Sender<ClientEvent>,
    latch: mpsc::SyncSender<()>,
}

fn worker_loop(ctx: WorkerContext) {
    let one_shot = ctx.config.reconnect_polling_interval.is_zero();

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            break;
        }

        match establish(&ctx) {
            Ok(reader_stream) => {
                ctx.connected.store(true, Ordering::SeqCst);
                *ctx.state.lock().expect("state lock poisoned") = ClientState::Connected;
                let _ = ctx.events.send(ClientEvent::ServerConnected);
                debug!("duplex pair connected");

                message_loop(reader_stream, &ctx);

                ctx.connected.store(false, Ordering::SeqCst);
                *ctx.writer.lock().expect("writer lock poisoned") = None;
                if let Some((in_ctrl, out_ctrl)) =
                    ctx.ctrl.lock().expect("ctrl lock poisoned").take()
                {
                    let _ = in_ctrl.shutdown();
                    let _ = out_ctrl.shutdown();
                }

                if ctx.cancel.load(Ordering::SeqCst) {
                    break;
                }
                let _ = ctx.events.send(ClientEvent::ServerDisconnected);
                if one_shot {
                    break;
                }
                *ctx.state.lock().expect("state lock poisoned") = ClientState::Reconnecting;
            }
            Err(err) => {
                debug!(%err, "connect attempt failed");
                if one_shot {
                    break;
                }
                *ctx.state.lock().expect("state lock poisoned") = ClientState::Reconnecting;
                sleep_sliced(ctx.config.reconnect_polling_interval, &ctx.cancel);
            }
        }
    }

    if ctx.cancel.load(Ordering::SeqCst) {
        // Stopping: hand control back to stop().
        let _ = ctx.latch.try_send(());
    } else {
        // One-shot wind-down: the endpoint stops itself.
        *ctx.state.lock().expect("state lock poisoned") = ClientState::Stopped;
        let _ = ctx.events.send(ClientEvent::Stopped);
    }
}

/// Open both halves with the pairing preamble. Returns the stream the
/// message loop reads from (the server's `-OUT` pipe).
fn establish(ctx: &WorkerContext) -> Result<IpcStream> {
    let (in_path, out_path) = duplex_paths(&ctx.config.base_path);
    let token = pairing::next_token();

    // Client's outbound half is the server's -IN pipe.
    let mut out_half = connect_timeout(&in_path, ctx.config.connection_timeout)?;
    pairing::write_token(&mut out_half, token)?;

    // Client's inbound half is the server's -OUT pipe.
    let mut in_half = connect_timeout(&out_path, ctx.config.connection_timeout)?;
    pairing::write_token(&mut in_half, token)?;

    let reader_stream = in_half.try_clone()?;
    reader_stream.set_read_timeout(Some(LOOP_POLL))?;

    *ctx.writer.lock().expect("writer lock poisoned") = Some(MessageWriter::new(
        out_half.try_clone()?,
        ctx.config.message_buffer_size,
    ));
    *ctx.ctrl.lock().expect("ctrl lock poisoned") = Some((out_half, in_half));

    Ok(reader_stream)
}

fn message_loop(stream: IpcStream, ctx: &WorkerContext) {
    let mut reader = MessageReader::new(stream, ctx.config.message_buffer_size);

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            return;
        }
        match reader.read_message() {
            Ok(Some(message)) => {
                if let Some(response) = (ctx.handler)(&message) {
                    if ctx.cancel.load(Ordering::SeqCst) {
                        return;
                    }
                    let mut writer = ctx.writer.lock().expect("writer lock poisoned");
                    if let Some(writer) = writer.as_mut() {
                        if let Err(err) = writer.send(&response) {
                            let _ = ctx
                                .events
                                .send(ClientEvent::MessageLoopError(err.into()));
                            return;
                        }
                    }
                }
            }
            Ok(None) => return,
            Err(ref err) if err.is_timeout() => continue,
            Err(ChannelError::Disconnected) => return,
            Err(err) => {
                let _ = ctx.events.send(ClientEvent::MessageLoopError(err.into()));
                return;
            }
        }
    }
}

fn sleep_sliced(total: Duration, cancel: &AtomicBool) {
    let mut slept = Duration::ZERO;
    while slept < total && !cancel.load(Ordering::SeqCst) {
        let step = SLEEP_SLICE.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
}
