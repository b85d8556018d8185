use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use pipeduct_channel::{ChannelError, MessageReader, MessageWriter};
use pipeduct_transport::{duplex_paths, IpcStream, PipeListener};

use crate::error::{PeerError, Result};
use crate::events::{ClientId, MessageHandler, ServerEvent};
use crate::pairing;
use crate::registry::{BroadcastOutcome, ConnectionRecord, RegistryHandle};

/// Poll interval for accept and read loops to observe cancellation.
const LOOP_POLL: Duration = Duration::from_millis(50);

/// Deadline for reading the pairing token off a freshly accepted half.
const TOKEN_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Server multiplexer tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base pipe name; the duplex pair lives at `<base>-IN`/`<base>-OUT`.
    pub base_path: PathBuf,
    /// Maximum concurrently connected clients.
    pub max_clients: usize,
    /// Upper bound for one logical message.
    pub message_buffer_size: usize,
    /// Permission mode for the pipe sockets; the default lets other
    /// local users connect.
    pub socket_mode: u32,
    /// How long `stop` waits for in-flight read loops to drain.
    pub stop_drain_timeout: Duration,
    /// How long an accepted half may wait for its partner before the
    /// connection attempt is torn down.
    pub pair_timeout: Duration,
}

impl ServerConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            max_clients: 16,
            message_buffer_size: 4096,
            socket_mode: pipeduct_transport::DEFAULT_SOCKET_MODE,
            stop_drain_timeout: Duration::from_millis(1000),
            pair_timeout: Duration::from_secs(5),
        }
    }
}

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
    Disposed,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Started => "started",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Multi-client pipe server.
///
/// Listens on a `-IN`/`-OUT` duplex pair, runs one read loop per
/// connected client, and hands every received message to the
/// registered handler; a `Some` return is written back on that client's
/// outbound half. Connection membership lives in a registry actor, so
/// broadcast and targeted sends never race membership changes.
pub struct PipeServer {
    config: ServerConfig,
    handler: MessageHandler,
    state: Arc<Mutex<ServerState>>,
    cancel: Arc<AtomicBool>,
    registry: Option<RegistryHandle>,
    accept_thread: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<ServerEvent>,
    active_loops: Arc<AtomicUsize>,
    next_client: Arc<AtomicU64>,
    latch_tx: mpsc::SyncSender<()>,
    latch_rx: mpsc::Receiver<()>,
}

impl PipeServer {
    /// Create a server and the receiver for its lifecycle events.
    pub fn new(config: ServerConfig, handler: MessageHandler) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::channel();
        let (latch_tx, latch_rx) = mpsc::sync_channel(1);
        let server = Self {
            config,
            handler,
            state: Arc::new(Mutex::new(ServerState::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
            registry: None,
            accept_thread: None,
            events_tx,
            active_loops: Arc::new(AtomicUsize::new(0)),
            next_client: Arc::new(AtomicU64::new(1)),
            latch_tx,
            latch_rx,
        };
        (server, events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Currently connected client count.
    pub fn clients_connected(&self) -> usize {
        self.registry
            .as_ref()
            .and_then(|registry| registry.count().ok())
            .unwrap_or(0)
    }

    /// Bind the duplex pair and begin accepting clients.
    ///
    /// Idempotent while already started; rejected while starting,
    /// stopping, or disposed.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ServerState::Idle | ServerState::Stopped => *state = ServerState::Starting,
                ServerState::Started => return Ok(()),
                other => {
                    return Err(PeerError::InvalidState {
                        operation: "start",
                        state: other.to_string(),
                    })
                }
            }
        }

        match self.bind_and_spawn() {
            Ok(()) => {
                *self.state.lock().expect("state lock poisoned") = ServerState::Started;
                let _ = self.events_tx.send(ServerEvent::Started);
                info!(base = ?self.config.base_path, "server started");
                Ok(())
            }
            Err(err) => {
                *self.state.lock().expect("state lock poisoned") = ServerState::Idle;
                Err(err)
            }
        }
    }

    fn bind_and_spawn(&mut self) -> Result<()> {
        if self.config.max_clients == 0 {
            return Err(PeerError::Config("max_clients must be at least 1".to_string()));
        }
        if self.config.base_path.as_os_str().is_empty() {
            return Err(PeerError::Config("base pipe name not set".to_string()));
        }

        let (in_path, out_path) = duplex_paths(&self.config.base_path);
        let in_listener = PipeListener::bind_with_mode(&in_path, self.config.socket_mode)?;
        let out_listener = PipeListener::bind_with_mode(&out_path, self.config.socket_mode)?;

        let registry = RegistryHandle::spawn()
            .map_err(|err| PeerError::Transport(pipeduct_transport::TransportError::Io(err)))?;
        self.registry = Some(registry.clone());

        self.cancel.store(false, Ordering::SeqCst);
        let ctx = AcceptContext {
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            cancel: Arc::clone(&self.cancel),
            registry,
            events: self.events_tx.clone(),
            active_loops: Arc::clone(&self.active_loops),
            next_client: Arc::clone(&self.next_client),
            latch: self.latch_tx.clone(),
        };
        let accept_thread = std::thread::Builder::new()
            .name("pipeduct-accept".to_string())
            .spawn(move || accept_loop(in_listener, out_listener, ctx))
            .map_err(|err| PeerError::Transport(pipeduct_transport::TransportError::Io(err)))?;
        self.accept_thread = Some(accept_thread);

        Ok(())
    }

    /// Write one message to every connected client.
    ///
    /// Not atomic across clients: the snapshot is whatever the registry
    /// holds when the command arrives, and a slow client can observe an
    /// older message after a newer one reached its neighbor. Returns
    /// the number of clients reached.
    pub fn broadcast(&self, message: &[u8]) -> Result<usize> {
        self.check_send(message)?;
        let registry = self.registry.as_ref().ok_or(PeerError::NotConnected)?;
        let BroadcastOutcome { delivered, failed } = registry.broadcast(message.to_vec())?;
        if !failed.is_empty() {
            warn!(?failed, "broadcast skipped broken connections");
        }
        Ok(delivered)
    }

    /// Write one message to one specific client.
    pub fn send_to(&self, client: ClientId, message: &[u8]) -> Result<()> {
        self.check_send(message)?;
        let registry = self.registry.as_ref().ok_or(PeerError::NotConnected)?;
        registry.send_to(client, message.to_vec())
    }

    fn check_send(&self, message: &[u8]) -> Result<()> {
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
        Ok(())
    }

    /// Stop accepting, tear every connection down, and drain read loops.
    ///
    /// Waits up to `stop_drain_timeout` for in-flight loops to exit,
    /// then releases the pipe paths.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ServerState::Started | ServerState::Starting => *state = ServerState::Stopping,
                ServerState::Idle | ServerState::Stopped | ServerState::Stopping => return Ok(()),
                ServerState::Disposed => {
                    return Err(PeerError::InvalidState {
                        operation: "stop",
                        state: ServerState::Disposed.to_string(),
                    })
                }
            }
        }

        // Clear any stale drain release from a previous cycle.
        while self.latch_rx.try_recv().is_ok() {}

        self.cancel.store(true, Ordering::SeqCst);

        if let Some(registry) = &self.registry {
            let drained = registry.drain_all().unwrap_or(0);
            debug!(drained, "tore down connections for shutdown");
        }

        if self.active_loops.load(Ordering::SeqCst) > 0 {
            if self
                .latch_rx
                .recv_timeout(self.config.stop_drain_timeout)
                .is_err()
            {
                warn!("read loops did not drain before the stop deadline");
            }
        }

        if let Some(accept_thread) = self.accept_thread.take() {
            let _ = accept_thread.join();
        }
        self.registry = None;

        *self.state.lock().expect("state lock poisoned") = ServerState::Stopped;
        let _ = self.events_tx.send(ServerEvent::Stopped);
        info!(base = ?self.config.base_path, "server stopped");
        Ok(())
    }

    /// Stop if running and retire the server permanently.
    pub fn dispose(&mut self) {
        let _ = self.stop();
        *self.state.lock().expect("state lock poisoned") = ServerState::Disposed;
    }
}

struct AcceptContext {
    config: ServerConfig,
    handler: MessageHandler,
    cancel: Arc<AtomicBool>,
    registry: RegistryHandle,
    events: mpsc::Sender<ServerEvent>,
    active_loops: Arc<AtomicUsize>,
    next_client: Arc<AtomicU64>,
    latch: mpsc::SyncSender<()>,
}

fn accept_loop(in_listener: PipeListener, out_listener: PipeListener, ctx: AcceptContext) {
    let mut pending_in: HashMap<u64, (IpcStream, Instant)> = HashMap::new();
    let mut pending_out: HashMap<u64, (IpcStream, Instant)> = HashMap::new();

    while !ctx.cancel.load(Ordering::SeqCst) {
        poll_half(&in_listener, &mut pending_in, &ctx);
        poll_half(&out_listener, &mut pending_out, &ctx);

        let ready: Vec<u64> = pending_in
            .keys()
            .filter(|token| pending_out.contains_key(token))
            .copied()
            .collect();
        for token in ready {
            let (in_stream, _) = pending_in.remove(&token).expect("token present");
            let (out_stream, _) = pending_out.remove(&token).expect("token present");
            register_pair(in_stream, out_stream, &ctx);
        }

        expire_pending(&mut pending_in, &ctx, "inbound");
        expire_pending(&mut pending_out, &ctx, "outbound");
    }

    debug!("accept loop exiting");
}

fn poll_half(
    listener: &PipeListener,
    pending: &mut HashMap<u64, (IpcStream, Instant)>,
    ctx: &AcceptContext,
) {
    match listener.accept_deadline(LOOP_POLL) {
        Ok(Some(mut stream)) => {
            if stream.set_read_timeout(Some(TOKEN_READ_TIMEOUT)).is_err() {
                return;
            }
            match pairing::read_token(&mut stream) {
                Ok(token) => {
                    if let Some((uid, _gid, pid)) = stream.peer_credentials() {
                        debug!(token, uid, pid, "accepted pipe half");
                    }
                    let _ = stream.set_read_timeout(None);
                    pending.insert(token, (stream, Instant::now()));
                }
                Err(err) => {
                    warn!(%err, "dropping half without pairing token");
                }
            }
        }
        Ok(None) => {}
        Err(err) => {
            if !ctx.cancel.load(Ordering::SeqCst) {
                warn!(%err, "accept failed");
            }
        }
    }
}

fn expire_pending(
    pending: &mut HashMap<u64, (IpcStream, Instant)>,
    ctx: &AcceptContext,
    half: &str,
) {
    let deadline = ctx.config.pair_timeout;
    let before = pending.len();
    pending.retain(|_, (_, since)| since.elapsed() < deadline);
    if pending.len() != before {
        // The partner half never connected: a transport-level failure
        // of the connection attempt, not of the server.
        warn!(half, dropped = before - pending.len(), "unpaired half timed out");
    }
}

fn register_pair(in_stream: IpcStream, out_stream: IpcStream, ctx: &AcceptContext) {
    let connected = ctx.registry.count().unwrap_or(usize::MAX);
    if connected >= ctx.config.max_clients {
        warn!(
            connected,
            max = ctx.config.max_clients,
            "refusing client beyond capacity"
        );
        let _ = in_stream.shutdown();
        let _ = out_stream.shutdown();
        return;
    }

    let id = ctx.next_client.fetch_add(1, Ordering::Relaxed);

    let record = match build_record(&in_stream, out_stream, ctx.config.message_buffer_size) {
        Ok(record) => record,
        Err(err) => {
            warn!(%err, "failed to register connection");
            let _ = in_stream.shutdown();
            return;
        }
    };

    if ctx.registry.add(id, record).is_err() {
        return;
    }
    let _ = ctx.events.send(ServerEvent::ClientConnected { client: id });
    debug!(client = id, "client connected");

    let loop_ctx = ReadLoopContext {
        id,
        handler: Arc::clone(&ctx.handler),
        cancel: Arc::clone(&ctx.cancel),
        registry: ctx.registry.clone(),
        events: ctx.events.clone(),
        active_loops: Arc::clone(&ctx.active_loops),
        latch: ctx.latch.clone(),
        message_buffer_size: ctx.config.message_buffer_size,
    };
    ctx.active_loops.fetch_add(1, Ordering::SeqCst);
    let spawned = std::thread::Builder::new()
        .name(format!("pipeduct-conn-{id}"))
        .spawn(move || read_loop(in_stream, loop_ctx));
    if spawned.is_err() {
        ctx.active_loops.fetch_sub(1, Ordering::SeqCst);
        let _ = ctx.registry.remove(id);
    }
}

fn build_record(
    in_stream: &IpcStream,
    out_stream: IpcStream,
    message_buffer_size: usize,
) -> std::result::Result<ConnectionRecord, pipeduct_transport::TransportError> {
    Ok(ConnectionRecord {
        writer: MessageWriter::new(out_stream.try_clone()?, message_buffer_size),
        in_ctrl: in_stream.try_clone()?,
        out_ctrl: out_stream,
    })
}

struct ReadLoopContext {
    id: ClientId,
    handler: MessageHandler,
    cancel: Arc<AtomicBool>,
    registry: RegistryHandle,
    events: mpsc::Sender<ServerEvent>,
    active_loops: Arc<AtomicUsize>,
    latch: mpsc::SyncSender<()>,
    message_buffer_size: usize,
}

fn read_loop(stream: IpcStream, ctx: ReadLoopContext) {
    let _ = stream.set_read_timeout(Some(LOOP_POLL));
    let mut reader = MessageReader::new(stream, ctx.message_buffer_size);

    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            break;
        }
        match reader.read_message() {
            Ok(Some(message)) => {
                if let Some(response) = (ctx.handler)(&message) {
                    if ctx.cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(err) = ctx.registry.send_to(ctx.id, response) {
                        let _ = ctx.events.send(ServerEvent::MessageLoopError {
                            client: ctx.id,
                            error: err,
                        });
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(ref err) if err.is_timeout() => continue,
            Err(ChannelError::Disconnected) => break,
            Err(err) => {
                let _ = ctx.events.send(ServerEvent::MessageLoopError {
                    client: ctx.id,
                    error: err.into(),
                });
                break;
            }
        }
    }

    // Disconnect bookkeeping: deregister, notify, and if this was the
    // last loop out during shutdown, release the drain latch.
    let _ = ctx.registry.remove(ctx.id);
    let _ = ctx
        .events
        .send(ServerEvent::ClientDisconnected { client: ctx.id });
    debug!(client = ctx.id, "client disconnected");

    let remaining = ctx.active_loops.fetch_sub(1, Ordering::SeqCst) - 1;
    if ctx.cancel.load(Ordering::SeqCst) && remaining == 0 {
        let _ = ctx.latch.try_send(());
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        // Wake any remaining loops; they hold their own Arc clones and
        // exit on the next poll.
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PipeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeServer")
            .field("base", &self.config.base_path)
            .field("state", &self.state())
            .field("max_clients", &self.config.max_clients)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Instant;

    use pipeduct_transport::named::connect_timeout;

    use super::*;

    fn temp_base(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pipeduct-server-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("server")
    }

    fn echo_handler() -> MessageHandler {
        Arc::new(|message: &[u8]| Some(message.to_vec()))
    }

    /// A raw duplex client speaking the pairing protocol directly.
    struct RawClient {
        writer: MessageWriter<IpcStream>,
        reader: MessageReader<IpcStream>,
    }

    impl RawClient {
        fn connect(base: &PathBuf, buffer: usize) -> RawClient {
            let (in_path, out_path) = duplex_paths(base);
            let token = crate::pairing::next_token();

            let mut in_conn = connect_timeout(&in_path, Duration::from_secs(2)).unwrap();
            crate::pairing::write_token(&mut in_conn, token).unwrap();
            let mut out_conn = connect_timeout(&out_path, Duration::from_secs(2)).unwrap();
            crate::pairing::write_token(&mut out_conn, token).unwrap();

            RawClient {
                writer: MessageWriter::new(in_conn, buffer),
                reader: MessageReader::new(out_conn, buffer),
            }
        }
    }

    #[test]
    fn start_stop_without_clients_is_prompt_and_clean() {
        let base = temp_base("clean");
        let (mut server, events) = PipeServer::new(ServerConfig::new(&base), echo_handler());

        server.start().unwrap();
        assert_eq!(server.state(), ServerState::Started);
        assert!(matches!(events.try_recv(), Ok(ServerEvent::Started)));

        let (in_path, out_path) = duplex_paths(&base);
        assert!(in_path.exists() && out_path.exists());

        let begin = Instant::now();
        server.stop().unwrap();
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(
            !in_path.exists() && !out_path.exists(),
            "pipe paths must be released on stop"
        );
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(ServerEvent::Stopped)
        ));
    }

    #[test]
    fn start_is_idempotent_when_started_and_rejected_after_dispose() {
        let base = temp_base("states");
        let (mut server, _events) = PipeServer::new(ServerConfig::new(&base), echo_handler());

        server.start().unwrap();
        server.start().unwrap();
        server.stop().unwrap();
        // Stopped servers may start again.
        server.start().unwrap();

        server.dispose();
        assert!(matches!(
            server.start(),
            Err(PeerError::InvalidState { operation: "start", .. })
        ));
        assert!(matches!(
            server.stop(),
            Err(PeerError::InvalidState { operation: "stop", .. })
        ));
    }

    #[test]
    fn echo_roundtrip_through_handler() {
        let base = temp_base("echo");
        let (mut server, events) = PipeServer::new(ServerConfig::new(&base), echo_handler());
        server.start().unwrap();

        let mut client = RawClient::connect(&base, 4096);
        client.writer.send(b"marco").unwrap();
        let reply = client.reader.read_message().unwrap().unwrap();
        assert_eq!(reply.as_ref(), b"marco");

        // The connect event surfaced.
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, ServerEvent::Started));
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, ServerEvent::ClientConnected { .. }));

        server.stop().unwrap();
    }

    #[test]
    fn per_connection_order_is_preserved() {
        let base = temp_base("order");
        let (mut server, _events) = PipeServer::new(ServerConfig::new(&base), echo_handler());
        server.start().unwrap();

        let mut first = RawClient::connect(&base, 4096);
        let mut second = RawClient::connect(&base, 4096);

        for round in 0u32..100 {
            first.writer.send(format!("a-{round}").as_bytes()).unwrap();
            second.writer.send(format!("b-{round}").as_bytes()).unwrap();
        }
        for round in 0u32..100 {
            let from_first = first.reader.read_message().unwrap().unwrap();
            assert_eq!(from_first.as_ref(), format!("a-{round}").as_bytes());
            let from_second = second.reader.read_message().unwrap().unwrap();
            assert_eq!(from_second.as_ref(), format!("b-{round}").as_bytes());
        }

        assert_eq!(server.clients_connected(), 2);
        server.stop().unwrap();
    }

    #[test]
    fn capacity_limit_refuses_surplus_clients() {
        let base = temp_base("capacity");
        let config = ServerConfig {
            max_clients: 1,
            ..ServerConfig::new(&base)
        };
        let (mut server, _events) = PipeServer::new(config, echo_handler());
        server.start().unwrap();

        let mut keeper = RawClient::connect(&base, 4096);
        keeper.writer.send(b"hold").unwrap();
        assert_eq!(
            keeper.reader.read_message().unwrap().unwrap().as_ref(),
            b"hold"
        );

        // The surplus client is torn down instead of registered.
        let mut refused = RawClient::connect(&base, 4096);
        let outcome = refused.reader.read_message();
        assert!(matches!(outcome, Ok(None) | Err(_)));
        assert_eq!(server.clients_connected(), 1);

        server.stop().unwrap();
    }

    #[test]
    fn broadcast_reaches_connected_clients() {
        let base = temp_base("broadcast");
        let (mut server, events) = PipeServer::new(ServerConfig::new(&base), echo_handler());
        server.start().unwrap();

        let mut first = RawClient::connect(&base, 4096);
        let mut second = RawClient::connect(&base, 4096);

        // Wait for both registrations before snapshotting.
        let mut connected = 0;
        while connected < 2 {
            match events.recv_timeout(Duration::from_secs(2)).unwrap() {
                ServerEvent::ClientConnected { .. } => connected += 1,
                _ => {}
            }
        }

        assert_eq!(server.broadcast(b"to-everyone").unwrap(), 2);
        assert_eq!(
            first.reader.read_message().unwrap().unwrap().as_ref(),
            b"to-everyone"
        );
        assert_eq!(
            second.reader.read_message().unwrap().unwrap().as_ref(),
            b"to-everyone"
        );

        server.stop().unwrap();
    }

    #[test]
    fn send_to_targets_one_client() {
        let base = temp_base("sendto");
        let (mut server, events) = PipeServer::new(ServerConfig::new(&base), echo_handler());
        server.start().unwrap();

        let mut client = RawClient::connect(&base, 4096);
        let id = loop {
            match events.recv_timeout(Duration::from_secs(2)).unwrap() {
                ServerEvent::ClientConnected { client } => break client,
                _ => {}
            }
        };

        server.send_to(id, b"direct").unwrap();
        assert_eq!(
            client.reader.read_message().unwrap().unwrap().as_ref(),
            b"direct"
        );

        assert!(matches!(
            server.send_to(id + 1000, b"nobody"),
            Err(PeerError::UnknownClient(_))
        ));

        server.stop().unwrap();
    }

    #[test]
    fn oversized_sends_are_rejected() {
        let base = temp_base("oversize");
        let config = ServerConfig {
            message_buffer_size: 64,
            ..ServerConfig::new(&base)
        };
        let (mut server, _events) = PipeServer::new(config, echo_handler());
        server.start().unwrap();

        let too_big = vec![0u8; 65];
        assert!(matches!(
            server.broadcast(&too_big),
            Err(PeerError::MessageTooLarge { size: 65, max: 64 })
        ));

        server.stop().unwrap();
    }

    #[test]
    fn client_disconnect_runs_bookkeeping() {
        let base = temp_base("bye");
        let (mut server, events) = PipeServer::new(ServerConfig::new(&base), echo_handler());
        server.start().unwrap();

        {
            let _client = RawClient::connect(&base, 4096);
            loop {
                if let ServerEvent::ClientConnected { .. } =
                    events.recv_timeout(Duration::from_secs(2)).unwrap()
                {
                    break;
                }
            }
        } // Dropping the client closes both halves.

        loop {
            if let ServerEvent::ClientDisconnected { .. } =
                events.recv_timeout(Duration::from_secs(2)).unwrap()
            {
                break;
            }
        }
        assert_eq!(server.clients_connected(), 0);

        server.stop().unwrap();
    }

    #[test]
    fn stop_drains_connected_clients() {
        let base = temp_base("drain");
        let (mut server, _events) = PipeServer::new(ServerConfig::new(&base), echo_handler());
        server.start().unwrap();

        let _first = RawClient::connect(&base, 4096);
        let _second = RawClient::connect(&base, 4096);
        while server.clients_connected() < 2 {
            std::thread::sleep(Duration::from_millis(10));
        }

        let begin = Instant::now();
        server.stop().unwrap();
        assert!(begin.elapsed() < Duration::from_secs(2));
        assert_eq!(server.clients_connected(), 0);
    }

    #[test]
    fn unpaired_half_never_registers() {
        let base = temp_base("unpaired");
        let config = ServerConfig {
            pair_timeout: Duration::from_millis(150),
            ..ServerConfig::new(&base)
        };
        let (mut server, _events) = PipeServer::new(config, echo_handler());
        server.start().unwrap();

        // Connect only the inbound half and let the pairing expire.
        let (in_path, _out_path) = duplex_paths(&base);
        let mut lonely = connect_timeout(&in_path, Duration::from_secs(2)).unwrap();
        lonely
            .write_all(&crate::pairing::next_token().to_le_bytes())
            .unwrap();

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(server.clients_connected(), 0);

        server.stop().unwrap();
    }
}
