//! Connection registry actor.
//!
//! One background thread owns the connection map and processes
//! commands over a channel; callers hold a cloneable handle. This
//! replaces a shared lock plus synchronized collection: writes to a
//! client's outbound half and membership changes are serialized by the
//! actor, and a broadcast snapshot is just the actor walking its own
//! map.

use std::collections::HashMap;
use std::sync::mpsc;

use tracing::{debug, warn};

use pipeduct_channel::MessageWriter;
use pipeduct_transport::IpcStream;

use crate::error::{PeerError, Result};
use crate::events::ClientId;

/// One registered duplex connection: the framed writer for the
/// outbound half plus control clones of both streams for teardown.
pub(crate) struct ConnectionRecord {
    pub(crate) writer: MessageWriter<IpcStream>,
    pub(crate) in_ctrl: IpcStream,
    pub(crate) out_ctrl: IpcStream,
}

impl ConnectionRecord {
    /// Shut the inbound half down first so the read loop wakes, then
    /// the outbound half.
    fn teardown(&self) {
        let _ = self.in_ctrl.shutdown();
        let _ = self.out_ctrl.shutdown();
    }
}

enum Command {
    Add {
        id: ClientId,
        record: Box<ConnectionRecord>,
        reply: mpsc::Sender<usize>,
    },
    Remove {
        id: ClientId,
        reply: mpsc::Sender<usize>,
    },
    SendTo {
        id: ClientId,
        message: Vec<u8>,
        reply: mpsc::Sender<Result<()>>,
    },
    Broadcast {
        message: Vec<u8>,
        reply: mpsc::Sender<BroadcastOutcome>,
    },
    Count {
        reply: mpsc::Sender<usize>,
    },
    DrainAll {
        reply: mpsc::Sender<usize>,
    },
}

/// Result of a broadcast pass over the connection snapshot.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Clients the message reached.
    pub delivered: usize,
    /// Clients whose write failed; their read loops will observe the
    /// broken pipe and run disconnect bookkeeping.
    pub failed: Vec<ClientId>,
}

/// Cloneable handle to the registry actor.
#[derive(Clone)]
pub(crate) struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Spawn the actor thread and return a handle to it.
    ///
    /// The thread exits when the last handle is dropped.
    pub(crate) fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("pipeduct-registry".to_string())
            .spawn(move || run(rx))?;
        Ok(Self { tx })
    }

    pub(crate) fn add(&self, id: ClientId, record: ConnectionRecord) -> Result<usize> {
        self.call(|reply| Command::Add {
            id,
            record: Box::new(record),
            reply,
        })
    }

    /// Remove and tear down one connection; returns how many remain.
    pub(crate) fn remove(&self, id: ClientId) -> Result<usize> {
        self.call(|reply| Command::Remove { id, reply })
    }

    pub(crate) fn send_to(&self, id: ClientId, message: Vec<u8>) -> Result<()> {
        self.call(|reply| Command::SendTo { id, message, reply })?
    }

    pub(crate) fn broadcast(&self, message: Vec<u8>) -> Result<BroadcastOutcome> {
        self.call(|reply| Command::Broadcast { message, reply })
    }

    pub(crate) fn count(&self) -> Result<usize> {
        self.call(|reply| Command::Count { reply })
    }

    /// Tear down every connection; returns how many were drained.
    pub(crate) fn drain_all(&self) -> Result<usize> {
        self.call(|reply| Command::DrainAll { reply })
    }

    fn call<T>(&self, build: impl FnOnce(mpsc::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| PeerError::ShutdownFailed("connection registry gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| PeerError::ShutdownFailed("connection registry gone".to_string()))
    }
}

fn run(rx: mpsc::Receiver<Command>) {
    let mut connections: HashMap<ClientId, ConnectionRecord> = HashMap::new();

    while let Ok(command) = rx.recv() {
        match command {
            Command::Add { id, record, reply } => {
                connections.insert(id, *record);
                debug!(client = id, total = connections.len(), "connection registered");
                let _ = reply.send(connections.len());
            }
            Command::Remove { id, reply } => {
                if let Some(record) = connections.remove(&id) {
                    record.teardown();
                    debug!(client = id, remaining = connections.len(), "connection removed");
                }
                let _ = reply.send(connections.len());
            }
            Command::SendTo { id, message, reply } => {
                let outcome = match connections.get_mut(&id) {
                    Some(record) => record
                        .writer
                        .send(&message)
                        .map_err(PeerError::Channel),
                    None => Err(PeerError::UnknownClient(id)),
                };
                let _ = reply.send(outcome);
            }
            Command::Broadcast { message, reply } => {
                let mut outcome = BroadcastOutcome::default();
                for (id, record) in connections.iter_mut() {
                    match record.writer.send(&message) {
                        Ok(()) => outcome.delivered += 1,
                        Err(err) => {
                            warn!(client = id, %err, "broadcast write failed");
                            outcome.failed.push(*id);
                        }
                    }
                }
                let _ = reply.send(outcome);
            }
            Command::Count { reply } => {
                let _ = reply.send(connections.len());
            }
            Command::DrainAll { reply } => {
                let drained = connections.len();
                for (_, record) in connections.drain() {
                    record.teardown();
                }
                let _ = reply.send(drained);
            }
        }
    }

    // Handles all dropped: tear down whatever is left.
    for (_, record) in connections.drain() {
        record.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    use pipeduct_channel::MessageReader;

    use super::*;

    const MAX: usize = 4096;

    fn record_pair() -> (ConnectionRecord, MessageReader<IpcStream>) {
        let (in_srv, _in_cli) = UnixStream::pair().unwrap();
        let (out_srv, out_cli) = UnixStream::pair().unwrap();

        let in_ctrl = IpcStream::from_std(in_srv);
        let out_stream = IpcStream::from_std(out_srv);
        let record = ConnectionRecord {
            writer: MessageWriter::new(out_stream.try_clone().unwrap(), MAX),
            in_ctrl,
            out_ctrl: out_stream,
        };
        let client_reader = MessageReader::new(IpcStream::from_std(out_cli), MAX);
        (record, client_reader)
    }

    #[test]
    fn add_count_remove() {
        let registry = RegistryHandle::spawn().unwrap();
        let (record, _reader) = record_pair();

        assert_eq!(registry.add(1, record).unwrap(), 1);
        assert_eq!(registry.count().unwrap(), 1);
        assert_eq!(registry.remove(1).unwrap(), 0);
        assert_eq!(registry.count().unwrap(), 0);
        // Removing twice is harmless.
        assert_eq!(registry.remove(1).unwrap(), 0);
    }

    #[test]
    fn send_to_reaches_the_right_client() {
        let registry = RegistryHandle::spawn().unwrap();
        let (record_a, mut reader_a) = record_pair();
        let (record_b, mut reader_b) = record_pair();
        registry.add(1, record_a).unwrap();
        registry.add(2, record_b).unwrap();

        registry.send_to(2, b"for-b".to_vec()).unwrap();
        assert_eq!(reader_b.read_message().unwrap().unwrap().as_ref(), b"for-b");

        registry.send_to(1, b"for-a".to_vec()).unwrap();
        assert_eq!(reader_a.read_message().unwrap().unwrap().as_ref(), b"for-a");
    }

    #[test]
    fn send_to_unknown_client_fails() {
        let registry = RegistryHandle::spawn().unwrap();
        assert!(matches!(
            registry.send_to(9, b"void".to_vec()),
            Err(PeerError::UnknownClient(9))
        ));
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let registry = RegistryHandle::spawn().unwrap();
        let (record_a, mut reader_a) = record_pair();
        let (record_b, mut reader_b) = record_pair();
        registry.add(1, record_a).unwrap();
        registry.add(2, record_b).unwrap();

        let outcome = registry.broadcast(b"all-hands".to_vec()).unwrap();
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.failed.is_empty());
        assert_eq!(
            reader_a.read_message().unwrap().unwrap().as_ref(),
            b"all-hands"
        );
        assert_eq!(
            reader_b.read_message().unwrap().unwrap().as_ref(),
            b"all-hands"
        );
    }

    #[test]
    fn drain_tears_every_connection_down() {
        let registry = RegistryHandle::spawn().unwrap();
        let (record, reader) = record_pair();
        registry.add(1, record).unwrap();

        assert_eq!(registry.drain_all().unwrap(), 1);
        assert_eq!(registry.count().unwrap(), 0);

        // The client side of the outbound half observes EOF.
        let mut stream = reader.into_inner();
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
