//! Per-process state and the handlers for every message a node acts on.
//!
//! A [`NodeContext`] bundles what the process learns from `initialize`
//! (role, consistency level, replica set, addresses) with the store, both
//! correlators, and the outbound transport. Handlers take `&self` and may
//! run concurrently; the store lock is held for single map operations only,
//! never across a send, a sleep, or the replication barrier.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Role, Settings, Topology};
use crate::correlator::{AckCorrelator, ResultCorrelator};
use crate::error::{KvError, Result};
use crate::message::{Message, MessageKind};
use crate::request_id::{IdGenerator, RequestId};
use crate::store::KvStore;
use crate::transport::Transport;

pub struct NodeContext<T: Transport> {
    topology: watch::Sender<Option<Arc<Topology>>>,
    settings: Settings,
    store: KvStore,
    acks: AckCorrelator,
    results: ResultCorrelator,
    ids: IdGenerator,
    transport: T,
}

impl<T: Transport> NodeContext<T> {
    pub fn new(transport: T, settings: Settings) -> Self {
        Self {
            topology: watch::channel(None).0,
            settings,
            store: KvStore::new(),
            acks: AckCorrelator::new(),
            results: ResultCorrelator::new(),
            ids: IdGenerator::new(),
            transport,
        }
    }

    /// Installs the topology from an `initialize` message. Only the first call succeeds.
    pub fn initialize(&self, topology: Topology) -> Result<()> {
        let topology = Arc::new(topology);
        let installed = self.topology.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(Arc::clone(&topology));
            true
        });
        if !installed {
            return Err(KvError::AlreadyInitialized);
        }

        info!(
            role = %topology.role,
            consistency = %topology.consistency,
            replicas = topology.replicas.len(),
            primary = %topology.primary,
            "initialized"
        );
        Ok(())
    }

    pub fn topology(&self) -> Result<Arc<Topology>> {
        self.topology.borrow().clone().ok_or(KvError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.topology.borrow().is_some()
    }

    /// Suspends until `initialize` has been applied.
    pub async fn wait_initialized(&self) -> Arc<Topology> {
        let mut rx = self.topology.subscribe();
        loop {
            if let Some(topology) = rx.borrow_and_update().clone() {
                return topology;
            }
            // The sender lives in `self`, so `changed` only fails if we are gone.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn acks(&self) -> &AckCorrelator {
        &self.acks
    }

    pub fn results(&self) -> &ResultCorrelator {
        &self.results
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn next_request_id(&self) -> RequestId {
        self.ids.next_id()
    }

    pub async fn send(&self, message: &Message, addr: &str) -> Result<()> {
        self.transport.send(message, addr).await
    }

    /// Serves a read from the local store. Missing keys answer with `NULL`.
    pub async fn handle_get(
        &self,
        key: String,
        requester: String,
        request_id: RequestId,
    ) -> Result<()> {
        self.topology_for(MessageKind::Get, &[Role::Primary, Role::Replica])?;

        let value = self.store.get(&key);
        debug!(%key, ?value, %requester, %request_id, "get");
        self.send(
            &Message::GetResult {
                key,
                value,
                request_id,
            },
            &requester,
        )
        .await
    }

    /// Applies a client write on the primary and replicates it.
    ///
    /// Under eventual consistency the client hears back before any replica
    /// is contacted. Otherwise the client hears back only after every
    /// replica has acknowledged, or gets a `primary-set-error` if a replica
    /// is unreachable or the configured quorum timeout passes.
    pub async fn handle_primary_set(
        &self,
        key: String,
        value: String,
        client: String,
        request_id: RequestId,
    ) -> Result<()> {
        let topology = self.topology_for(MessageKind::PrimarySet, &[Role::Primary])?;

        self.store.put(key.clone(), value.clone());
        let replication_id = self.ids.next_id();
        debug!(%key, %value, %client, %request_id, %replication_id, "primary set applied locally");

        if !topology.consistency.waits_for_replicas() {
            let notified = self
                .send(
                    &Message::PrimarySetResult {
                        key: key.clone(),
                        value: value.clone(),
                        request_id,
                    },
                    &client,
                )
                .await;

            for replica in &topology.replicas {
                if let Err(err) = self.replicate_to(replica, &key, &value, &replication_id).await {
                    warn!(%replica, %replication_id, error = %err, "replication send failed");
                }
            }
            return notified;
        }

        for replica in &topology.replicas {
            if let Err(err) = self.replicate_to(replica, &key, &value, &replication_id).await {
                self.reject_set(&client, key, request_id, &err).await;
                return Err(err);
            }
        }

        let expected = topology.replicas.len();
        let barrier = self
            .acks
            .await_satisfied(&replication_id, self.settings.quorum_timeout, |count| {
                count.0 >= expected
            })
            .await;

        match barrier {
            Ok(acked) => {
                debug!(%key, %replication_id, acked = acked.0, "all replicas acknowledged");
                self.send(
                    &Message::PrimarySetResult {
                        key,
                        value,
                        request_id,
                    },
                    &client,
                )
                .await
            }
            Err(timed_out) => {
                let err = KvError::QuorumTimeout {
                    replication_id: replication_id.to_string(),
                    acked: timed_out.last.0,
                    expected,
                };
                warn!(%key, error = %err, "replication barrier timed out");
                self.reject_set(&client, key, request_id, &err).await;
                Err(err)
            }
        }
    }

    /// Applies a replicated write and acknowledges it to the primary.
    pub async fn handle_replica_set(
        &self,
        key: String,
        value: String,
        replication_id: RequestId,
    ) -> Result<()> {
        let topology = self.topology_for(MessageKind::ReplicaSet, &[Role::Replica])?;

        self.store.put(key.clone(), value.clone());
        debug!(%key, %value, %replication_id, "replica set applied");
        self.send(
            &Message::ReplicaSetResult {
                key,
                value,
                replication_id,
            },
            &topology.primary,
        )
        .await
    }

    /// Counts one replica acknowledgement toward its replication round.
    pub fn handle_replica_set_result(&self, replication_id: &RequestId) -> Result<()> {
        self.topology_for(MessageKind::ReplicaSetResult, &[Role::Primary])?;

        let count = self.acks.record(replication_id, ());
        debug!(%replication_id, acks = count.0, "replica acknowledged");
        Ok(())
    }

    /// Files a get or set result under its request identifier for the waiting session.
    pub fn handle_result(&self, message: Message) -> Result<()> {
        let kind = message.kind();
        self.topology_for(kind, &[Role::Client])?;

        let Some(request_id) = message.correlation_id().cloned() else {
            return Err(KvError::WrongRole {
                kind,
                role: Role::Client,
            });
        };
        let results = self.results.record(&request_id, message);
        debug!(%request_id, received = results.len(), "result recorded");
        Ok(())
    }

    async fn replicate_to(
        &self,
        replica: &str,
        key: &str,
        value: &str,
        replication_id: &RequestId,
    ) -> Result<()> {
        if !self.settings.replication_delay.is_zero() {
            tokio::time::sleep(self.settings.replication_delay).await;
        }
        self.send(
            &Message::ReplicaSet {
                key: key.to_string(),
                value: value.to_string(),
                replication_id: replication_id.clone(),
            },
            replica,
        )
        .await
    }

    async fn reject_set(&self, client: &str, key: String, request_id: RequestId, cause: &KvError) {
        let rejection = Message::PrimarySetError {
            key,
            request_id,
            reason: cause.to_string(),
        };
        if let Err(err) = self.send(&rejection, client).await {
            warn!(%client, error = %err, "failed to report rejected set to client");
        }
    }

    fn topology_for(&self, kind: MessageKind, roles: &[Role]) -> Result<Arc<Topology>> {
        let topology = self.topology()?;
        if roles.contains(&topology.role) {
            Ok(topology)
        } else {
            Err(KvError::WrongRole {
                kind,
                role: topology.role,
            })
        }
    }
}
