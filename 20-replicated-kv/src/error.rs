use std::io;

use thiserror::Error;

use crate::config::Role;
use crate::message::MessageKind;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message kind '{0}'")]
    UnknownMessageKind(String),

    #[error("failed to send to {addr}: {source}")]
    SendFailure {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("replication {replication_id} timed out with {acked}/{expected} acknowledgements")]
    QuorumTimeout {
        replication_id: String,
        acked: usize,
        expected: usize,
    },

    #[error("request {request_id} timed out waiting for a result")]
    RequestTimeout { request_id: String },

    #[error("set of '{key}' was rejected by the primary: {reason}")]
    SetRejected { key: String, reason: String },

    #[error("node has not been initialized")]
    NotInitialized,

    #[error("node was already initialized")]
    AlreadyInitialized,

    #[error("{kind} is not handled by a {role} node")]
    WrongRole { kind: MessageKind, role: Role },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{0}' is not a valid port")]
    InvalidPort(String),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, KvError>;
