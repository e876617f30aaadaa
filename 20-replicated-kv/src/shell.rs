//! Command scripts for the client binary.
//!
//! A script is one command per line, read from a file or stdin:
//!
//! - `get <key> [replica]` (alias: `g`): read, optionally from a given replica index
//! - `set <key> <value>` (alias: `s`): write through the primary
//! - `wait <seconds>` (alias: `w`): pause before the next command
//! - `exit` (alias: `e`): stop reading
//!
//! Blank lines and lines starting with `#` are skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::client::ClientSession;
use crate::error::{KvError, Result};
use crate::message::{Message, NULL_VALUE};
use crate::node::NodeContext;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Get { key: String, replica: Option<usize> },
    Set { key: String, value: String },
    Wait(Duration),
    Exit,
}

impl ClientCommand {
    /// Parses one script line. Returns `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();
        let normalized = match cmd.as_str() {
            "g" => "get",
            "s" => "set",
            "w" => "wait",
            "e" => "exit",
            other => other,
        };

        let command = match (normalized, parts.len()) {
            ("exit", 1) => ClientCommand::Exit,
            ("get", 2) => ClientCommand::Get {
                key: parts[1].to_string(),
                replica: None,
            },
            ("get", 3) => ClientCommand::Get {
                key: parts[1].to_string(),
                replica: Some(parts[2].parse().map_err(|_| {
                    KvError::InvalidArgument(format!("replica index must be a number, got {}", parts[2]))
                })?),
            },
            ("set", 3) => ClientCommand::Set {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            },
            ("wait", 2) => {
                let pause = parts[1]
                    .parse::<f64>()
                    .ok()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or_else(|| {
                        KvError::InvalidArgument(format!("wait needs a duration in seconds, got {}", parts[1]))
                    })?;
                ClientCommand::Wait(pause)
            }
            ("exit", _) => return Err(KvError::InvalidArgument("exit takes no arguments".into())),
            ("get", _) => {
                return Err(KvError::InvalidArgument("usage: get <key> [replica]".into()))
            }
            ("set", _) => return Err(KvError::InvalidArgument("usage: set <key> <value>".into())),
            ("wait", _) => return Err(KvError::InvalidArgument("usage: wait <seconds>".into())),
            _ => {
                return Err(KvError::InvalidArgument(format!(
                    "unknown command {:?}. Try: get/g <key> [replica], set/s <key> <value>, wait/w <seconds>, exit/e",
                    parts[0]
                )))
            }
        };
        Ok(Some(command))
    }
}

/// Executes commands from `input` until `exit` or end of input, writing one
/// line per completed command to `output`.
///
/// A failed command is reported and the script continues.
pub async fn run_script<T, R, W>(session: &ClientSession<T>, input: R, output: &mut W) -> Result<()>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ClientCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                warn!(line = %line, error = %err, "skipping command");
                output.write_all(format!("error: {err}\n").as_bytes()).await?;
                continue;
            }
        };

        let report = match command {
            ClientCommand::Exit => break,
            ClientCommand::Wait(pause) => {
                tokio::time::sleep(pause).await;
                continue;
            }
            ClientCommand::Get { key, replica } => match session.get(&key, replica).await {
                Ok(value) => format!("{key} = {}", value.as_deref().unwrap_or(NULL_VALUE)),
                Err(err) => format!("error: get {key}: {err}"),
            },
            ClientCommand::Set { key, value } => match session.set(&key, &value).await {
                Ok(()) => format!("{key} <- {value}"),
                Err(err) => format!("error: set {key}: {err}"),
            },
        };
        output.write_all(report.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await?;
    Ok(())
}

/// Client process body: waits for `initialize`, runs the script, then sends
/// `done <self>` to the coordinator if the topology is in test mode.
pub async fn run_client<T, R, W>(context: Arc<NodeContext<T>>, input: R, output: &mut W) -> Result<()>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let topology = context.wait_initialized().await;
    let session = ClientSession::new(Arc::clone(&context));
    run_script(&session, input, output).await?;

    if topology.test_mode {
        let done = Message::Done {
            client: topology.self_addr.clone(),
        };
        context.send(&done, &topology.coordinator).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Consistency, Role, Settings};
    use crate::node::tests::{topology, RecordingTransport};

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(
            ClientCommand::parse("set x 1").unwrap(),
            Some(ClientCommand::Set {
                key: "x".into(),
                value: "1".into()
            })
        );
        assert_eq!(
            ClientCommand::parse("GET x").unwrap(),
            Some(ClientCommand::Get {
                key: "x".into(),
                replica: None
            })
        );
        assert_eq!(
            ClientCommand::parse("g x 1").unwrap(),
            Some(ClientCommand::Get {
                key: "x".into(),
                replica: Some(1)
            })
        );
        assert_eq!(
            ClientCommand::parse("wait 2").unwrap(),
            Some(ClientCommand::Wait(Duration::from_secs(2)))
        );
        assert_eq!(
            ClientCommand::parse("w 0.5").unwrap(),
            Some(ClientCommand::Wait(Duration::from_millis(500)))
        );
        assert_eq!(ClientCommand::parse("Exit").unwrap(), Some(ClientCommand::Exit));
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        assert_eq!(ClientCommand::parse("").unwrap(), None);
        assert_eq!(ClientCommand::parse("   ").unwrap(), None);
        assert_eq!(ClientCommand::parse("# set x 1").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_commands() {
        for line in ["get", "set x", "set x 1 2", "wait", "wait soon", "wait -1", "wait 1e300", "wait NaN", "get x first", "put x 1", "exit now"] {
            assert!(
                matches!(ClientCommand::parse(line), Err(KvError::InvalidArgument(_))),
                "{line}"
            );
        }
    }

    #[tokio::test]
    async fn script_reports_errors_and_stops_at_exit() {
        let context = NodeContext::new(RecordingTransport::default(), Settings::default());
        context
            .initialize(topology(Role::Client, Consistency::Eventual, "client:5"))
            .unwrap();
        let session = ClientSession::new(Arc::new(context));

        let script: &[u8] = b"bogus\nset bad\nwait 0\nexit\nset x 1\n";
        let mut output = Vec::new();
        run_script(&session, script, &mut output).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.lines().count(), 2, "{output}");
        assert!(output.lines().all(|line| line.starts_with("error: ")));
        assert!(session.context().transport().sent().is_empty());
    }

    #[tokio::test]
    async fn script_prints_get_results() {
        let context = Arc::new(NodeContext::new(RecordingTransport::default(), Settings::default()));
        context
            .initialize(topology(Role::Client, Consistency::Linearizable, "client:5"))
            .unwrap();
        let session = ClientSession::new(Arc::clone(&context));

        let responder = {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                loop {
                    if let Some((_, Message::Get { request_id, .. })) = context.transport().sent().pop() {
                        context
                            .handle_result(Message::GetResult {
                                key: "x".into(),
                                value: None,
                                request_id,
                            })
                            .unwrap();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let mut output = Vec::new();
        run_script(&session, &b"get x\n"[..], &mut output).await.unwrap();
        responder.await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "x = NULL\n");
    }

    async fn run_initialized_client(test_mode: bool) -> Arc<NodeContext<RecordingTransport>> {
        let context = Arc::new(NodeContext::new(RecordingTransport::default(), Settings::default()));
        let client = {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                let mut output = Vec::new();
                run_client(context, &b"wait 0\nexit\n"[..], &mut output).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.is_finished(), "script must wait for initialize");

        let mut topology = topology(Role::Client, Consistency::Eventual, "client:5");
        topology.test_mode = test_mode;
        context.initialize(topology).unwrap();

        tokio::time::timeout(Duration::from_secs(1), client)
            .await
            .expect("client should finish")
            .unwrap()
            .unwrap();
        context
    }

    #[tokio::test]
    async fn test_mode_client_reports_done_to_coordinator() {
        let context = run_initialized_client(true).await;
        assert_eq!(
            context.transport().sent(),
            vec![(
                "coord:0".to_string(),
                Message::Done {
                    client: "client:5".into()
                }
            )]
        );
    }

    #[tokio::test]
    async fn client_outside_test_mode_stays_quiet() {
        let context = run_initialized_client(false).await;
        assert!(context.transport().sent().is_empty());
    }
}
