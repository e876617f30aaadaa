//! Primary/replica key-value store with per-deployment consistency levels.
//!
//! One primary accepts every write and fans it out to a fixed set of
//! replicas. The consistency level chosen at initialization decides when the
//! client hears back and where reads go:
//!
//! - **eventual**: the client hears back before any replica is contacted;
//!   reads go to any replica
//! - **sequential**: the client hears back after every replica acknowledged;
//!   reads go to any replica
//! - **linearizable**: same write path as sequential; reads go to the primary
//!
//! # Architecture
//!
//! Every process (primary, replica, or client) runs the same runtime: an
//! accept loop, one reader task per connection, a two-lane inbound queue, and
//! a single consumer that dispatches parsed messages. Results and
//! acknowledgements take the front lane so a handler blocked on the
//! replication barrier is always released, however much ordinary traffic is
//! queued behind it. Blocking waits go through a [`correlator`] keyed by
//! request or replication identifier.
//!
//! # Modules
//!
//! - [`runtime`]: listener, reader tasks, consumer, node handle
//! - [`node`]: per-process context and message handlers
//! - [`client`]: client session (get / set with blocking waits)
//! - [`correlator`]: identifier-keyed results and acknowledgement counters
//! - [`queue`]: two-lane inbound message queue
//! - [`store`]: thread-safe in-memory map
//! - [`message`]: wire messages and their text form
//! - [`framing`]: length-prefixed frames over a byte stream
//! - [`transport`]: the outbound `send(message, address)` primitive
//! - [`shell`]: client command scripts
//! - [`cli`]: command-line arguments and tracing setup for the binaries

pub mod cli;
pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod framing;
pub mod message;
pub mod node;
pub mod queue;
pub mod request_id;
pub mod runtime;
pub mod shell;
pub mod store;
pub mod transport;

pub use config::{Consistency, Role, Settings, Topology};
pub use error::{KvError, Result};
pub use message::Message;
pub use runtime::{Node, NodeHandle};
