//! Minimal echo server — serves the duplex pair and echoes messages.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run -- send /tmp/pipeduct-echo-example/mux --data hello --wait

use std::sync::Arc;
use std::time::Duration;

use pipeduct::peer::{MessageHandler, PipeServer, ServerConfig, ServerEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::path::PathBuf::from("/tmp/pipeduct-echo-example");
    std::fs::create_dir_all(&dir)?;
    let base = dir.join("mux");

    let handler: MessageHandler = Arc::new(|message: &[u8]| {
        eprintln!("received {} bytes", message.len());
        Some(message.to_vec())
    });

    let (mut server, events) = PipeServer::new(ServerConfig::new(&base), handler);
    server.start()?;
    eprintln!("listening at {}-IN / {}-OUT", base.display(), base.display());

    loop {
        match events.recv_timeout(Duration::from_secs(60)) {
            Ok(ServerEvent::ClientConnected { client }) => eprintln!("client {client} connected"),
            Ok(ServerEvent::ClientDisconnected { client }) => {
                eprintln!("client {client} disconnected")
            }
            Ok(event) => eprintln!("{event:?}"),
            Err(_) => break,
        }
    }

    server.stop()?;
    Ok(())
}
