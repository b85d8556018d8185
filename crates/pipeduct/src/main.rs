mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{LogFormat, LogLevel};
use crate::output::OutputFormat;

/// Message channels over local pipes: serve, send, ping, and the
/// spawned-peer bootstrap roles.
#[derive(Parser, Debug)]
#[command(name = "pipeduct", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Stdout rendering for received messages and results.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Stderr verbosity (off silences logging entirely).
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    /// Stderr log rendering.
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);

    match cmd::run(cli.command, format) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_flags_parse() {
        let cli = Cli::try_parse_from([
            "pipeduct",
            "ping",
            "/tmp/pd/chan",
            "--count",
            "3",
            "--no-compression",
            "--key-file",
            "/tmp/pd/chan.key",
        ])
        .expect("ping args should parse");

        match cli.command {
            Command::Ping(args) => {
                assert_eq!(args.count, 3);
                assert!(args.no_compression);
                assert!(!args.no_encryption);
                assert!(args.key_file.is_some());
            }
            other => panic!("expected ping, parsed {other:?}"),
        }
    }

    #[test]
    fn host_collects_peer_args_verbatim() {
        let cli = Cli::try_parse_from([
            "pipeduct",
            "host",
            "/tmp/pd/chan",
            "/usr/bin/peer",
            "--worker",
            "PIPE_ID",
        ])
        .expect("host args should parse");

        match cli.command {
            Command::Host(args) => {
                assert_eq!(args.program, "/usr/bin/peer");
                assert_eq!(args.args, vec!["--worker", "PIPE_ID"]);
            }
            other => panic!("expected host, parsed {other:?}"),
        }
    }

    #[test]
    fn send_payload_sources_are_mutually_exclusive() {
        let err = Cli::try_parse_from([
            "pipeduct",
            "send",
            "/tmp/pd/mux",
            "--data",
            "x",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("two payload sources must conflict");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn global_flags_apply_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "pipeduct",
            "serve",
            "/tmp/pd/mux",
            "--mode",
            "channel",
            "--log-level",
            "off",
            "--format",
            "raw",
        ])
        .expect("global flags should parse in trailing position");

        assert!(matches!(cli.command, Command::Serve(_)));
        assert!(matches!(cli.log_level, LogLevel::Off));
        assert!(matches!(cli.format, Some(OutputFormat::Raw)));
    }
}
