use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipeduct_channel::{ChannelConfig, ChannelEvent, DuplexChannel};
use pipeduct_peer::{MessageHandler, PipeServer, ServerConfig, ServerEvent};
use tracing::{info, warn};

use crate::cmd::{ServeArgs, ServeMode};
use crate::exit::{channel_error, io_error, peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    match args.mode {
        ServeMode::Mux => run_mux(args, format, running),
        ServeMode::Channel => run_channel(args, format, running),
    }
}

fn run_mux(args: ServeArgs, format: OutputFormat, running: Arc<AtomicBool>) -> CliResult<i32> {
    let mut config = ServerConfig::new(&args.path);
    config.max_clients = args.max_clients;
    if let Some(buffer) = args.buffer {
        config.message_buffer_size = buffer;
    }

    let echo = args.echo;
    let handler: MessageHandler = Arc::new(move |message: &[u8]| {
        print_message(message, "client", format);
        echo.then(|| message.to_vec())
    });

    let (mut server, events) = PipeServer::new(config, handler);
    server.start().map_err(|err| peer_error("start failed", err))?;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ServerEvent::ClientConnected { client }) => info!(client, "client connected"),
            Ok(ServerEvent::ClientDisconnected { client }) => {
                info!(client, "client disconnected")
            }
            Ok(ServerEvent::MessageLoopError { client, error }) => {
                warn!(client, %error, "message loop error")
            }
            Ok(_) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    server.stop().map_err(|err| peer_error("stop failed", err))?;
    Ok(SUCCESS)
}

fn run_channel(args: ServeArgs, format: OutputFormat, running: Arc<AtomicBool>) -> CliResult<i32> {
    let mut config = ChannelConfig {
        use_compression: !args.no_compression,
        use_encryption: !args.no_encryption,
        ..ChannelConfig::default()
    };
    if let Some(buffer) = args.buffer {
        config.message_buffer_size = buffer;
    }

    let mut channel = DuplexChannel::named_server(&args.path, config.clone());

    if config.use_encryption {
        let pack = channel.key_data();
        match &args.key_file {
            Some(key_file) => {
                std::fs::write(key_file, pack.to_bytes())
                    .map_err(|err| io_error("writing key file", err))?;
                std::fs::set_permissions(key_file, std::fs::Permissions::from_mode(0o600))
                    .map_err(|err| io_error("restricting key file", err))?;
                info!(key_file = %key_file.display(), "wrote channel key pack");
            }
            None => {
                return Err(CliError::new(
                    crate::exit::USAGE,
                    "--key-file is required when encryption is enabled",
                ))
            }
        }
    }

    channel
        .start(None)
        .map_err(|err| channel_error("bind failed", err))?;

    let echo = args.echo;
    let (handle, events) = channel
        .serve(Box::new(move |request: &[u8]| {
            print_message(request, "peer", format);
            echo.then(|| request.to_vec())
        }))
        .map_err(|err| channel_error("serve failed", err))?;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ChannelEvent::ClientConnected) => info!("peer connected"),
            Ok(ChannelEvent::ClientDisconnected) => info!("peer disconnected"),
            Ok(ChannelEvent::LoopError(error)) => warn!(%error, "channel loop error"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(mut channel) = handle.stop() {
        channel.dispose();
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
