use std::time::Duration;

use pipeduct_channel::{BootstrapConfig, CombinedChannel};
use tracing::info;

use crate::cmd::HostArgs;
use crate::exit::{channel_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

/// Host the bootstrap, launch the peer, and echo its messages until it
/// exits.
pub fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    let mut combined = CombinedChannel::host(&args.path, BootstrapConfig::default())
        .map_err(|err| channel_error("host failed", err))?;
    info!(pipe_id = combined.initial_pipe_id(), "bootstrap pipe ready");

    let mut child = combined
        .launch_peer(&args.program, &args.args)
        .map_err(|err| channel_error("launch failed", err))?;
    info!(pid = child.id(), program = %args.program, "peer launched");

    loop {
        if child
            .has_exited()
            .map_err(|err| transport_error("waiting for peer", err))?
        {
            info!("peer exited");
            break;
        }

        if !combined.channel().ready() {
            match combined.channel_mut().accept(Some(POLL)) {
                Ok(true) => {
                    let _ = combined.channel_mut().set_io_timeout(Some(POLL));
                    info!("peer connected");
                }
                Ok(false) => continue,
                Err(err) => return Err(channel_error("accept failed", err)),
            }
            continue;
        }

        match combined.channel_mut().read_bytes() {
            Ok(Some(message)) => {
                print_message(&message, "peer", format);
                combined
                    .channel_mut()
                    .write_bytes(b"OK")
                    .map_err(|err| channel_error("reply failed", err))?;
            }
            Ok(None) => {
                info!("peer disconnected");
                break;
            }
            Err(ref err) if err.is_timeout() => continue,
            Err(err) => return Err(channel_error("read failed", err)),
        }
    }

    combined.dispose();
    Ok(SUCCESS)
}
