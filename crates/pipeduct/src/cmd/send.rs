use std::fs;
use std::sync::mpsc;
use std::sync::Arc;

use pipeduct_peer::{ClientConfig, ClientEndpoint, MessageHandler};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    if payload.is_empty() {
        return Err(CliError::new(USAGE, "payload must not be empty"));
    }

    let (response_tx, response_rx) = mpsc::channel::<Vec<u8>>();
    let handler: MessageHandler = Arc::new(move |message: &[u8]| {
        let _ = response_tx.send(message.to_vec());
        None
    });

    let config = ClientConfig::new(&args.path).one_shot();
    let (mut client, _events) = ClientEndpoint::new(config, handler);
    client.start().map_err(|err| peer_error("start failed", err))?;

    // One-shot: either it connects promptly or it stops itself.
    let connect_deadline = std::time::Instant::now() + wait_timeout;
    while !client.is_connected() {
        if client.state() == pipeduct_peer::ClientState::Stopped {
            return Err(CliError::new(FAILURE, "connect failed"));
        }
        if std::time::Instant::now() >= connect_deadline {
            return Err(CliError::new(TIMEOUT, "connect timed out"));
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    client
        .send(&payload)
        .map_err(|err| peer_error("send failed", err))?;

    if args.wait {
        match response_rx.recv_timeout(wait_timeout) {
            Ok(response) => print_message(&response, "server", format),
            Err(_) => {
                let _ = client.stop();
                return Err(CliError::new(TIMEOUT, "no response before deadline"));
            }
        }
    }

    client.stop().map_err(|err| peer_error("stop failed", err))?;
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> SendArgs {
        SendArgs {
            path: "/tmp/unused".into(),
            data: None,
            json: None,
            file: None,
            wait: false,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn resolve_payload_prefers_json() {
        let args = SendArgs {
            json: Some("{\"ok\":true}".to_string()),
            ..base_args()
        };
        assert_eq!(resolve_payload(&args).unwrap(), b"{\"ok\":true}");
    }

    #[test]
    fn resolve_payload_rejects_bad_json() {
        let args = SendArgs {
            json: Some("{nope".to_string()),
            ..base_args()
        };
        assert!(resolve_payload(&args).is_err());
    }

    #[test]
    fn resolve_payload_uses_raw_data() {
        let args = SendArgs {
            data: Some("hello".to_string()),
            ..base_args()
        };
        assert_eq!(resolve_payload(&args).unwrap(), b"hello");
    }

    #[test]
    fn empty_payload_is_usage_error() {
        let result = run(base_args(), OutputFormat::Json);
        assert_eq!(result.unwrap_err().code, USAGE);
    }
}
