//! Bootstrap handshake demo, both roles in one process.
//!
//! The host side generates key material and writes the 48-byte pack to
//! an anonymous pipe; the "spawned" side attaches by handle string,
//! reads the pack, and connects the encrypted named channel.
//!
//! Run with:
//!   cargo run --example bootstrap-pair

use pipeduct::channel::{BootstrapConfig, CombinedChannel};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::path::PathBuf::from(format!(
        "/tmp/pipeduct-bootstrap-example-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir)?;
    let base = dir.join("combined");

    let mut host = CombinedChannel::host(&base, BootstrapConfig::default())?;
    let pipe_id = host
        .release_handle()
        .expect("freshly hosted channel holds the handle");
    eprintln!("bootstrap pipe id: {pipe_id}");

    let peer_base = base.clone();
    let peer = std::thread::spawn(move || -> Result<Vec<u8>, pipeduct::channel::ChannelError> {
        let mut peer = CombinedChannel::attach(&pipe_id, &peer_base, BootstrapConfig::default())?;
        peer.request(b"HELLO", None)
    });

    let request = host
        .channel_mut()
        .read_bytes()?
        .expect("peer should send a request");
    eprintln!("host received: {}", String::from_utf8_lossy(&request));
    host.channel_mut().write_bytes(b"OK")?;

    let reply = peer.join().expect("peer thread should finish")?;
    eprintln!("peer received: {}", String::from_utf8_lossy(&reply));

    host.dispose();
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
