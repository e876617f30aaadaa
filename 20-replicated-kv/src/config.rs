//! Roles, consistency levels, and the topology a node learns from `initialize`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::KvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Replica => "replica",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "primary" => Ok(Role::Primary),
            "replica" => Ok(Role::Replica),
            "client" => Ok(Role::Client),
            other => Err(KvError::MalformedMessage(format!("unknown role '{other}'"))),
        }
    }
}

/// Guarantee the cluster offers to clients.
///
/// Sequential and linearizable writes both wait for every replica to
/// acknowledge; linearizable additionally routes every read to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Eventual,
    Sequential,
    Linearizable,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Eventual => "eventual",
            Consistency::Sequential => "sequential",
            Consistency::Linearizable => "linearizable",
        }
    }

    /// Whether a primary must hear back from every replica before it
    /// reports a write as complete.
    pub fn waits_for_replicas(&self) -> bool {
        !matches!(self, Consistency::Eventual)
    }

    /// Whether reads must be served by the primary.
    pub fn reads_from_primary(&self) -> bool {
        matches!(self, Consistency::Linearizable)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consistency {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "eventual" => Ok(Consistency::Eventual),
            "sequential" => Ok(Consistency::Sequential),
            "linearizable" => Ok(Consistency::Linearizable),
            other => Err(KvError::MalformedMessage(format!(
                "unknown consistency level '{other}'"
            ))),
        }
    }
}

/// Everything a process learns from its `initialize` message.
///
/// Set exactly once per process and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub role: Role,
    pub consistency: Consistency,
    pub replicas: Vec<String>,
    pub self_addr: String,
    pub coordinator: String,
    pub primary: String,
    pub test_mode: bool,
}

/// Runtime tunables that are not part of the cluster topology.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Upper bound on the primary's wait for replica acknowledgements.
    /// `None` waits forever.
    pub quorum_timeout: Option<Duration>,
    /// Upper bound on a client session's wait for a result.
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Pause before each `replica-set` the primary sends.
    pub replication_delay: Duration,
}
