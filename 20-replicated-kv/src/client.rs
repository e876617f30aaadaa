//! Client session: issues gets and sets and waits for their results.
//!
//! A client is a process like any other node, with role `client`. Its
//! consumer files incoming results into the context's result correlator;
//! the session sends a request and then waits on that correlator under a
//! fresh request identifier.

use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::config::{Consistency, Topology};
use crate::error::{KvError, Result};
use crate::message::Message;
use crate::node::NodeContext;
use crate::request_id::RequestId;
use crate::transport::{TcpTransport, Transport};

pub struct ClientSession<T: Transport = TcpTransport> {
    context: Arc<NodeContext<T>>,
}

impl<T: Transport> ClientSession<T> {
    pub fn new(context: Arc<NodeContext<T>>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<NodeContext<T>> {
        &self.context
    }

    /// Reads `key` at the consistency level this client was initialized with.
    pub async fn get(&self, key: &str, replica: Option<usize>) -> Result<Option<String>> {
        let consistency = self.context.topology()?.consistency;
        self.get_at(key, consistency, replica).await
    }

    /// Reads `key`. Linearizable reads always go to the primary; otherwise
    /// the read goes to replica `replica`, or to a random replica when the
    /// index is absent or out of range.
    pub async fn get_at(
        &self,
        key: &str,
        consistency: Consistency,
        replica: Option<usize>,
    ) -> Result<Option<String>> {
        validate_token("key", key)?;
        let topology = self.context.topology()?;
        let target = read_target(&topology, consistency, replica);
        let request_id = self.context.next_request_id();
        let message = Message::Get {
            key: key.to_string(),
            requester: topology.self_addr.clone(),
            request_id: request_id.clone(),
        };

        match self.request("get", &message, &target, request_id).await? {
            Message::GetResult { value, .. } => Ok(value),
            other => Err(KvError::MalformedMessage(format!(
                "unexpected reply to get: {other}"
            ))),
        }
    }

    /// Writes `key` through the primary and returns once the primary reports
    /// the write complete for this client's consistency level.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_token("key", key)?;
        validate_token("value", value)?;
        let topology = self.context.topology()?;
        let request_id = self.context.next_request_id();
        let message = Message::PrimarySet {
            key: key.to_string(),
            value: value.to_string(),
            client: topology.self_addr.clone(),
            request_id: request_id.clone(),
        };

        match self
            .request("set", &message, &topology.primary, request_id)
            .await?
        {
            Message::PrimarySetResult { .. } => Ok(()),
            Message::PrimarySetError { key, reason, .. } => {
                Err(KvError::SetRejected { key, reason })
            }
            other => Err(KvError::MalformedMessage(format!(
                "unexpected reply to set: {other}"
            ))),
        }
    }

    /// Sends `message` to `target` and returns the first result recorded
    /// under `request_id`.
    pub async fn request(
        &self,
        op: &'static str,
        message: &Message,
        target: &str,
        request_id: RequestId,
    ) -> Result<Message> {
        let started = Instant::now();
        info!(op, %target, %request_id, "initiated");

        self.context.send(message, target).await?;

        let limit = self.context.settings().request_timeout;
        let outcome = self
            .context
            .results()
            .await_satisfied(&request_id, limit, |results| !results.is_empty())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let results = match outcome {
            Ok(results) => results,
            Err(_) => {
                warn!(op, %target, %request_id, latency_ms, "timed out");
                return Err(KvError::RequestTimeout {
                    request_id: request_id.to_string(),
                });
            }
        };
        info!(op, %target, %request_id, latency_ms, "finished");

        results.into_first().ok_or_else(|| {
            KvError::MalformedMessage(format!("request {request_id} resolved without a result"))
        })
    }
}

/// Chooses where a read at `consistency` goes.
pub fn read_target(topology: &Topology, consistency: Consistency, replica: Option<usize>) -> String {
    if consistency.reads_from_primary() {
        return topology.primary.clone();
    }
    if let Some(addr) = replica.and_then(|index| topology.replicas.get(index)) {
        return addr.clone();
    }
    topology
        .replicas
        .choose(&mut rand::thread_rng())
        .unwrap_or(&topology.primary)
        .clone()
}

fn validate_token(what: &str, token: &str) -> Result<()> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(KvError::InvalidArgument(format!(
            "{what} must be a single non-empty token, got {token:?}"
        )));
    }
    if token == crate::message::NULL_VALUE && what == "value" {
        return Err(KvError::InvalidArgument(format!(
            "{what} {token} is reserved for missing keys"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::config::{Role, Settings};
    use crate::node::tests::{topology, RecordingTransport};

    fn client(settings: Settings) -> Arc<NodeContext<RecordingTransport>> {
        let context = NodeContext::new(RecordingTransport::default(), settings);
        context
            .initialize(topology(Role::Client, Consistency::Sequential, "client:5"))
            .unwrap();
        Arc::new(context)
    }

    async fn sent_request_id(context: &NodeContext<RecordingTransport>) -> RequestId {
        timeout(Duration::from_secs(1), async {
            loop {
                if let Some((_, message)) = context.transport().sent().pop() {
                    if let Some(id) = message.correlation_id() {
                        return id.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("request was sent")
    }

    #[test]
    fn linearizable_reads_target_the_primary() {
        let topology = topology(Role::Client, Consistency::Linearizable, "client:5");
        for replica in [None, Some(0), Some(1), Some(7)] {
            assert_eq!(
                read_target(&topology, Consistency::Linearizable, replica),
                "primary:9"
            );
        }
    }

    #[test]
    fn explicit_replica_index_is_honored() {
        let topology = topology(Role::Client, Consistency::Eventual, "client:5");
        assert_eq!(read_target(&topology, Consistency::Eventual, Some(1)), "r2:2");
        assert_eq!(read_target(&topology, Consistency::Sequential, Some(0)), "r1:1");
    }

    #[test]
    fn out_of_range_index_falls_back_to_some_replica() {
        let topology = topology(Role::Client, Consistency::Eventual, "client:5");
        for _ in 0..20 {
            let target = read_target(&topology, Consistency::Eventual, Some(5));
            assert!(topology.replicas.contains(&target), "{target}");
        }
    }

    #[test]
    fn no_replicas_falls_back_to_the_primary() {
        let mut topology = topology(Role::Client, Consistency::Eventual, "client:5");
        topology.replicas.clear();
        assert_eq!(read_target(&topology, Consistency::Eventual, None), "primary:9");
    }

    #[tokio::test]
    async fn get_returns_the_first_recorded_result() {
        let context = client(Settings::default());
        let session = ClientSession::new(Arc::clone(&context));
        let pending = tokio::spawn(async move { session.get("x", Some(0)).await });

        let request_id = sent_request_id(&context).await;
        let (target, sent) = context.transport().sent().pop().unwrap();
        assert_eq!(target, "r1:1");
        assert!(matches!(sent, Message::Get { ref requester, .. } if requester == "client:5"));

        for value in ["1", "2"] {
            context
                .handle_result(Message::GetResult {
                    key: "x".into(),
                    value: Some(value.into()),
                    request_id: request_id.clone(),
                })
                .unwrap();
        }

        let value = timeout(Duration::from_secs(1), pending)
            .await
            .expect("get should complete")
            .unwrap()
            .unwrap();
        assert_eq!(value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn set_goes_to_primary_and_surfaces_rejection() {
        let context = client(Settings::default());
        let session = ClientSession::new(Arc::clone(&context));
        let pending = tokio::spawn(async move { session.set("x", "1").await });

        let request_id = sent_request_id(&context).await;
        assert_eq!(context.transport().sent()[0].0, "primary:9");
        context
            .handle_result(Message::PrimarySetError {
                key: "x".into(),
                request_id,
                reason: "replication r-1 timed out".into(),
            })
            .unwrap();

        let err = timeout(Duration::from_secs(1), pending)
            .await
            .expect("set should complete")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, KvError::SetRejected { ref key, .. } if key == "x"));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let context = client(Settings {
            request_timeout: Some(Duration::from_millis(30)),
            ..Settings::default()
        });
        let session = ClientSession::new(context);

        let err = session.get("x", None).await.unwrap_err();
        assert!(matches!(err, KvError::RequestTimeout { .. }));
    }

    #[tokio::test]
    async fn invalid_tokens_are_rejected_before_sending() {
        let context = client(Settings::default());
        let session = ClientSession::new(Arc::clone(&context));

        assert!(matches!(
            session.set("two words", "1").await,
            Err(KvError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.set("x", "").await,
            Err(KvError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.get("", None).await,
            Err(KvError::InvalidArgument(_))
        ));
        assert!(context.transport().sent().is_empty());
    }
}
