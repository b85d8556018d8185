use std::time::Instant;

use pipeduct_channel::{ChannelConfig, DuplexChannel};
use pipeduct_codec::KeyPack;

use crate::cmd::{parse_duration, PingArgs};
use crate::exit::{channel_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = ChannelConfig {
        use_compression: !args.no_compression,
        use_encryption: !args.no_encryption,
        connect_timeout: timeout,
        ..ChannelConfig::default()
    };

    let mut channel = DuplexChannel::named_client(&args.path, config.clone());
    if config.use_encryption {
        let key_file = args.key_file.as_ref().ok_or_else(|| {
            CliError::new(
                crate::exit::USAGE,
                "--key-file is required when encryption is enabled",
            )
        })?;
        let bytes =
            std::fs::read(key_file).map_err(|err| io_error("reading key file", err))?;
        let pack = KeyPack::from_bytes(&bytes)
            .map_err(|err| CliError::new(DATA_INVALID, format!("bad key file: {err}")))?;
        channel = channel.with_pack(&pack);
    }

    channel
        .start(Some(timeout))
        .map_err(|err| channel_error("connect failed", err))?;
    channel
        .set_io_timeout(Some(timeout))
        .map_err(|err| channel_error("configuring deadline", err))?;

    for round in 0..args.count {
        let payload = format!("ping-{round}");
        let begin = Instant::now();
        channel
            .write_utf8(&payload)
            .map_err(|err| channel_error("write failed", err))?;
        let reply = channel
            .read_bytes()
            .map_err(|err| channel_error("read failed", err))?
            .ok_or_else(|| CliError::new(FAILURE, "server disconnected"))?;
        let elapsed = begin.elapsed();

        print_message(&reply, &format!("rtt={elapsed:?}"), format);
        if reply != payload.as_bytes() {
            return Err(CliError::new(DATA_INVALID, "reply does not match request"));
        }
    }

    channel.dispose();
    Ok(SUCCESS)
}
