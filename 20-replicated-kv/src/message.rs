//! Plaintext message protocol spoken between coordinator, primary, replicas, and clients.
//!
//! Every message is a line of space-separated tokens whose first token names
//! its kind. `initialize` is the exception: it spans several lines, one per
//! topology field. Messages travel inside length-prefixed frames (see
//! [`crate::framing`]), so embedded newlines are safe.

use std::fmt;

use crate::config::{Consistency, Role, Topology};
use crate::error::{KvError, Result};
use crate::request_id::RequestId;

/// Sentinel sent in place of a value for keys that were never written.
pub const NULL_VALUE: &str = "NULL";

const TRAILING_NOISE: &[char] = &['\0', '\r', '\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Initialize,
    Get,
    GetResult,
    PrimarySet,
    ReplicaSet,
    ReplicaSetResult,
    PrimarySetResult,
    PrimarySetError,
    Exit,
    Done,
}

impl MessageKind {
    pub fn token(&self) -> &'static str {
        match self {
            MessageKind::Initialize => "initialize",
            MessageKind::Get => "get",
            MessageKind::GetResult => "get-result",
            MessageKind::PrimarySet => "primary-set",
            MessageKind::ReplicaSet => "replica-set",
            MessageKind::ReplicaSetResult => "replica-set-result",
            MessageKind::PrimarySetResult => "primary-set-result",
            MessageKind::PrimarySetError => "primary-set-error",
            MessageKind::Exit => "exit",
            MessageKind::Done => "done",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let kind = match token {
            "initialize" => MessageKind::Initialize,
            "get" => MessageKind::Get,
            "get-result" => MessageKind::GetResult,
            "primary-set" => MessageKind::PrimarySet,
            "replica-set" => MessageKind::ReplicaSet,
            "replica-set-result" => MessageKind::ReplicaSetResult,
            "primary-set-result" => MessageKind::PrimarySetResult,
            "primary-set-error" => MessageKind::PrimarySetError,
            "exit" => MessageKind::Exit,
            "done" => MessageKind::Done,
            _ => return None,
        };
        Some(kind)
    }

    /// Classifies a raw frame by its leading token without parsing the rest.
    pub fn of_raw(raw: &str) -> Option<Self> {
        raw.trim_start()
            .split_whitespace()
            .next()
            .and_then(Self::from_token)
    }

    /// Results and acknowledgements. Someone may be blocked waiting on
    /// these, so they jump ahead of ordinary traffic in the inbound queue.
    pub fn is_result(&self) -> bool {
        matches!(
            self,
            MessageKind::GetResult
                | MessageKind::ReplicaSetResult
                | MessageKind::PrimarySetResult
                | MessageKind::PrimarySetError
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Initialize(Topology),
    Get {
        key: String,
        requester: String,
        request_id: RequestId,
    },
    GetResult {
        key: String,
        value: Option<String>,
        request_id: RequestId,
    },
    PrimarySet {
        key: String,
        value: String,
        client: String,
        request_id: RequestId,
    },
    ReplicaSet {
        key: String,
        value: String,
        replication_id: RequestId,
    },
    ReplicaSetResult {
        key: String,
        value: String,
        replication_id: RequestId,
    },
    PrimarySetResult {
        key: String,
        value: String,
        request_id: RequestId,
    },
    PrimarySetError {
        key: String,
        request_id: RequestId,
        reason: String,
    },
    Exit {
        coordinator: String,
    },
    Done {
        client: String,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Initialize(_) => MessageKind::Initialize,
            Message::Get { .. } => MessageKind::Get,
            Message::GetResult { .. } => MessageKind::GetResult,
            Message::PrimarySet { .. } => MessageKind::PrimarySet,
            Message::ReplicaSet { .. } => MessageKind::ReplicaSet,
            Message::ReplicaSetResult { .. } => MessageKind::ReplicaSetResult,
            Message::PrimarySetResult { .. } => MessageKind::PrimarySetResult,
            Message::PrimarySetError { .. } => MessageKind::PrimarySetError,
            Message::Exit { .. } => MessageKind::Exit,
            Message::Done { .. } => MessageKind::Done,
        }
    }

    /// Parses one message from the text of a frame.
    pub fn parse(raw: &str) -> Result<Self> {
        let text = raw.trim_matches(TRAILING_NOISE).trim_start();
        let head = text
            .split_whitespace()
            .next()
            .ok_or_else(|| KvError::MalformedMessage("empty message".to_string()))?;
        let kind = MessageKind::from_token(head)
            .ok_or_else(|| KvError::UnknownMessageKind(head.to_string()))?;

        let fields: Vec<&str> = text.split_whitespace().skip(1).collect();
        let message = match kind {
            MessageKind::Initialize => Message::Initialize(parse_initialize(text)?),
            MessageKind::Get => {
                let [key, requester, id] = exact::<3>(kind, &fields)?;
                Message::Get {
                    key: key.to_string(),
                    requester: requester.to_string(),
                    request_id: RequestId::from(id),
                }
            }
            MessageKind::GetResult => {
                let [key, value, id] = exact::<3>(kind, &fields)?;
                Message::GetResult {
                    key: key.to_string(),
                    value: (value != NULL_VALUE).then(|| value.to_string()),
                    request_id: RequestId::from(id),
                }
            }
            MessageKind::PrimarySet => {
                let [key, value, client, id] = exact::<4>(kind, &fields)?;
                Message::PrimarySet {
                    key: key.to_string(),
                    value: value.to_string(),
                    client: client.to_string(),
                    request_id: RequestId::from(id),
                }
            }
            MessageKind::ReplicaSet => {
                let [key, value, id] = exact::<3>(kind, &fields)?;
                Message::ReplicaSet {
                    key: key.to_string(),
                    value: value.to_string(),
                    replication_id: RequestId::from(id),
                }
            }
            MessageKind::ReplicaSetResult => {
                let [key, value, id] = exact::<3>(kind, &fields)?;
                Message::ReplicaSetResult {
                    key: key.to_string(),
                    value: value.to_string(),
                    replication_id: RequestId::from(id),
                }
            }
            MessageKind::PrimarySetResult => {
                let [key, value, id] = exact::<3>(kind, &fields)?;
                Message::PrimarySetResult {
                    key: key.to_string(),
                    value: value.to_string(),
                    request_id: RequestId::from(id),
                }
            }
            MessageKind::PrimarySetError => {
                if fields.len() < 3 {
                    return Err(arity(kind, 3, fields.len()));
                }
                Message::PrimarySetError {
                    key: fields[0].to_string(),
                    request_id: RequestId::from(fields[1]),
                    reason: fields[2..].join(" "),
                }
            }
            MessageKind::Exit => {
                let [coordinator] = exact::<1>(kind, &fields)?;
                Message::Exit {
                    coordinator: coordinator.to_string(),
                }
            }
            MessageKind::Done => {
                let [client] = exact::<1>(kind, &fields)?;
                Message::Done {
                    client: client.to_string(),
                }
            }
        };
        Ok(message)
    }

    /// The identifier a result-class message is correlated under, if any.
    pub fn correlation_id(&self) -> Option<&RequestId> {
        match self {
            Message::GetResult { request_id, .. }
            | Message::PrimarySetResult { request_id, .. }
            | Message::PrimarySetError { request_id, .. } => Some(request_id),
            Message::ReplicaSetResult { replication_id, .. } => Some(replication_id),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Message::Initialize(topology) => write!(
                f,
                "{kind} {}\n{}\n{}\n{}\n{}\n{}\n{}",
                topology.role,
                topology.consistency,
                topology.replicas.join(" "),
                topology.self_addr,
                topology.coordinator,
                topology.primary,
                u8::from(topology.test_mode),
            ),
            Message::Get {
                key,
                requester,
                request_id,
            } => write!(f, "{kind} {key} {requester} {request_id}"),
            Message::GetResult {
                key,
                value,
                request_id,
            } => write!(
                f,
                "{kind} {key} {} {request_id}",
                value.as_deref().unwrap_or(NULL_VALUE)
            ),
            Message::PrimarySet {
                key,
                value,
                client,
                request_id,
            } => write!(f, "{kind} {key} {value} {client} {request_id}"),
            Message::ReplicaSet {
                key,
                value,
                replication_id,
            }
            | Message::ReplicaSetResult {
                key,
                value,
                replication_id,
            } => write!(f, "{kind} {key} {value} {replication_id}"),
            Message::PrimarySetResult {
                key,
                value,
                request_id,
            } => write!(f, "{kind} {key} {value} {request_id}"),
            Message::PrimarySetError {
                key,
                request_id,
                reason,
            } => write!(f, "{kind} {key} {request_id} {reason}"),
            Message::Exit { coordinator } => write!(f, "{kind} {coordinator}"),
            Message::Done { client } => write!(f, "{kind} {client}"),
        }
    }
}

fn exact<'a, const N: usize>(kind: MessageKind, fields: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(fields).map_err(|_| arity(kind, N, fields.len()))
}

fn arity(kind: MessageKind, expected: usize, got: usize) -> KvError {
    KvError::MalformedMessage(format!(
        "{kind} expects {expected} fields, got {got}"
    ))
}

fn parse_initialize(text: &str) -> Result<Topology> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    if lines.len() < 6 {
        return Err(KvError::MalformedMessage(format!(
            "initialize expects at least 6 lines, got {}",
            lines.len()
        )));
    }

    let role = lines[0]
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| KvError::MalformedMessage("initialize is missing a role".to_string()))?
        .parse::<Role>()?;
    let consistency = lines[1].parse::<Consistency>()?;
    let replicas = lines[2].split_whitespace().map(str::to_string).collect();

    let mut addrs = [lines[3], lines[4], lines[5]].into_iter();
    let mut next_addr = |field: &str| match addrs.next() {
        Some(addr) if !addr.is_empty() => Ok(addr.to_string()),
        _ => Err(KvError::MalformedMessage(format!(
            "initialize is missing the {field} address"
        ))),
    };
    let self_addr = next_addr("self")?;
    let coordinator = next_addr("coordinator")?;
    let primary = next_addr("primary")?;

    let test_mode = match lines.get(6).copied() {
        None | Some("") | Some("0") => false,
        Some("1") => true,
        Some(other) => {
            return Err(KvError::MalformedMessage(format!(
                "invalid test mode flag '{other}'"
            )))
        }
    };

    Ok(Topology {
        role,
        consistency,
        replicas,
        self_addr,
        coordinator,
        primary,
        test_mode,
    })
}
