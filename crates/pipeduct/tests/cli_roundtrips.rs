#![cfg(unix)]

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use pipeduct::channel::{BootstrapConfig, ChannelConfig, CombinedChannel};
use pipeduct::peer::{ClientConfig, ClientEndpoint, MessageHandler, PipeServer, ServerConfig};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/pdcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let begin = std::time::Instant::now();
    while begin.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn spawned_peer_bootstraps_and_exchanges_hello_ok() {
    let dir = unique_temp_dir("bootstrap");
    let base = dir.join("combined");

    let mut host = CombinedChannel::host(&base, BootstrapConfig::default())
        .expect("host side should come up");

    let mut child = host
        .launch_peer(
            env!("CARGO_BIN_EXE_pipeduct"),
            &[
                "--log-level".to_string(),
                "error".to_string(),
                "--format".to_string(),
                "raw".to_string(),
                "attach".to_string(),
                "PIPE_ID".to_string(),
                base.display().to_string(),
                "--data".to_string(),
                "HELLO".to_string(),
            ],
        )
        .expect("peer should launch");

    // Serve the one request the peer makes, bounded so a broken child
    // cannot hang the test.
    assert!(
        host.channel_mut()
            .accept(Some(Duration::from_secs(10)))
            .expect("accept should succeed"),
        "peer should connect before the deadline"
    );
    let request = host
        .channel_mut()
        .read_bytes()
        .expect("host read should succeed")
        .expect("peer should send a request");
    assert_eq!(request, b"HELLO");
    host.channel_mut()
        .write_bytes(b"OK")
        .expect("host reply should succeed");

    let code = child.wait().expect("child wait should succeed");
    assert_eq!(code, Some(0), "attach command should exit cleanly");

    host.dispose();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_command_reaches_a_library_server() {
    let dir = unique_temp_dir("send");
    let base = dir.join("mux");

    let handler: MessageHandler = Arc::new(|message: &[u8]| Some(message.to_vec()));
    let (mut server, _events) = PipeServer::new(ServerConfig::new(&base), handler);
    server.start().expect("server should start");

    let status = Command::new(env!("CARGO_BIN_EXE_pipeduct"))
        .args([
            "--log-level",
            "error",
            "--format",
            "raw",
            "send",
            base.to_str().expect("path is utf-8"),
            "--data",
            "from-cli",
            "--wait",
            "--wait-timeout",
            "5s",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("send command should run");
    assert!(status.success());

    server.stop().expect("server should stop");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn serve_mux_echoes_for_a_library_client() {
    let dir = unique_temp_dir("serve");
    let base = dir.join("mux");

    let mut child = Command::new(env!("CARGO_BIN_EXE_pipeduct"))
        .args([
            "--log-level",
            "error",
            "serve",
            base.to_str().expect("path is utf-8"),
            "--echo",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let (response_tx, response_rx) = std::sync::mpsc::channel::<Vec<u8>>();
    let handler: MessageHandler = Arc::new(move |message: &[u8]| {
        let _ = response_tx.send(message.to_vec());
        None
    });
    let config = ClientConfig {
        reconnect_polling_interval: Duration::from_millis(100),
        ..ClientConfig::new(&base)
    };
    let (mut client, _events) = ClientEndpoint::new(config, handler);
    client.start().expect("client should start");
    assert!(
        wait_until(Duration::from_secs(5), || client.is_connected()),
        "client should connect to the served mux"
    );

    client.send(b"echo-me").expect("send should succeed");
    let response = response_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("echo response should arrive");
    assert_eq!(response, b"echo-me");

    client.stop().expect("client should stop");
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ping_command_roundtrips_through_served_channel() {
    let dir = unique_temp_dir("ping");
    let base = dir.join("chan");
    let key_file = dir.join("chan.key");

    // Library-side channel server with encryption, key pack on disk the
    // way `serve --mode channel` writes it.
    let config = ChannelConfig::default();
    let mut channel = pipeduct::channel::DuplexChannel::named_server(&base, config);
    let pack = channel.key_data();
    std::fs::write(&key_file, pack.to_bytes()).expect("key file should be writable");
    channel.start(None).expect("channel should bind");
    let (handle, _events) = channel
        .serve(Box::new(|request: &[u8]| Some(request.to_vec())))
        .expect("serve should start");

    let status = Command::new(env!("CARGO_BIN_EXE_pipeduct"))
        .args([
            "--log-level",
            "error",
            "--format",
            "raw",
            "ping",
            base.to_str().expect("path is utf-8"),
            "--count",
            "3",
            "--key-file",
            key_file.to_str().expect("path is utf-8"),
            "--timeout",
            "5s",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("ping command should run");
    assert!(status.success());

    if let Some(mut channel) = handle.stop() {
        channel.dispose();
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_command_prints_and_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipeduct"))
        .args(["version", "--extended"])
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pipeduct"));
    assert!(stdout.contains("target:"));
}
