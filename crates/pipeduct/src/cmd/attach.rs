use pipeduct_channel::{BootstrapConfig, CombinedChannel};

use crate::cmd::{parse_duration, AttachArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

/// Attach to the inherited bootstrap pipe, read the key pack, connect
/// the main channel, and perform one request.
pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = BootstrapConfig {
        request_timeout: timeout,
        key_read_timeout: timeout,
        ..BootstrapConfig::default()
    };

    let mut combined = CombinedChannel::attach(&args.pipe_id, &args.path, config)
        .map_err(|err| channel_error("attach failed", err))?;

    let reply = combined
        .request(args.data.as_bytes(), Some(timeout))
        .map_err(|err| channel_error("request failed", err))?;
    print_message(&reply, "host", format);

    combined.dispose();
    Ok(SUCCESS)
}
