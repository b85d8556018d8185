use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod attach;
pub mod host;
pub mod ping;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a pipe server (multiplexer or single duplex channel).
    Serve(ServeArgs),
    /// Send one message to a running multiplexer.
    Send(SendArgs),
    /// Round-trip messages through a served duplex channel.
    Ping(PingArgs),
    /// Host a bootstrapped channel and launch the peer executable.
    Host(HostArgs),
    /// Attach to a bootstrapped channel as the spawned peer.
    Attach(AttachArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Host(args) => host::run(args, format),
        Command::Attach(args) => attach::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ServeMode {
    /// Multi-client server over the `-IN`/`-OUT` duplex pair.
    Mux,
    /// Single duplex channel with the codec pipeline.
    Channel,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Base pipe path to bind.
    pub path: PathBuf,
    /// Server flavor.
    #[arg(long, value_enum, default_value = "mux")]
    pub mode: ServeMode,
    /// Echo each received message back to its sender.
    #[arg(long)]
    pub echo: bool,
    /// Maximum concurrent clients (mux mode).
    #[arg(long, default_value = "16")]
    pub max_clients: usize,
    /// Message buffer size in bytes.
    #[arg(long)]
    pub buffer: Option<usize>,
    /// Disable DEFLATE compression (channel mode).
    #[arg(long)]
    pub no_compression: bool,
    /// Disable AES encryption (channel mode).
    #[arg(long)]
    pub no_encryption: bool,
    /// Write the 48-byte key pack here so clients can connect
    /// (channel mode with encryption).
    #[arg(long, value_name = "FILE")]
    pub key_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Base pipe path to connect to.
    pub path: PathBuf,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one response and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Base pipe path of the served channel.
    pub path: PathBuf,
    /// Number of round trips.
    #[arg(long, short = 'c', default_value = "1")]
    pub count: u32,
    /// Disable DEFLATE compression.
    #[arg(long)]
    pub no_compression: bool,
    /// Disable AES encryption.
    #[arg(long)]
    pub no_encryption: bool,
    /// Read the 48-byte key pack from this file.
    #[arg(long, value_name = "FILE")]
    pub key_file: Option<PathBuf>,
    /// Per-round-trip deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Base pipe path for the main channel.
    pub path: PathBuf,
    /// Peer executable to launch.
    pub program: String,
    /// Arguments for the peer; every `PIPE_ID` token is replaced with
    /// the bootstrap handle string.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Inherited bootstrap handle string.
    pub pipe_id: String,
    /// Base pipe path of the main channel.
    pub path: PathBuf,
    /// Request payload to send once connected.
    #[arg(long, default_value = "HELLO")]
    pub data: String,
    /// Request deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a human duration: bare seconds (`5`), or `500ms`, `5s`, `2m`.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let text = input.trim();
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(digits_end);

    let value: u64 = digits
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("'{input}' is not a duration")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be positive"));
    }

    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(CliError::new(
            USAGE,
            format!("unknown duration unit '{unit}'"),
        )),
    }
}
