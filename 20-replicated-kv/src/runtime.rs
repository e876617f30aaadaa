//! Listener, reader tasks, and the single queue consumer.
//!
//! The threading model:
//!
//! - **Accept loop**: accepts inbound connections until shutdown or `exit`
//! - **Reader tasks**: one per connection, reads frames and enqueues them raw
//! - **Consumer task**: the only task that dequeues; parses and dispatches
//! - **Handler tasks**: `get`, `primary-set`, `replica-set` and
//!   `replica-set-result` each run in their own task so a pending
//!   replication barrier never stalls the queue
//!
//! `initialize`, `exit` and incoming results are handled inline by the
//! consumer.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{KvError, Result};
use crate::framing::read_frame;
use crate::message::{Message, MessageKind};
use crate::node::NodeContext;
use crate::queue::MessageQueue;
use crate::transport::{TcpTransport, Transport};

/// A bound, not yet running process: node or client.
pub struct Node<T: Transport = TcpTransport> {
    listener: TcpListener,
    context: Arc<NodeContext<T>>,
    queue: Arc<MessageQueue>,
}

impl Node<TcpTransport> {
    pub async fn bind(addr: &str, settings: Settings) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::with_transport(listener, TcpTransport, settings))
    }
}

impl<T: Transport> Node<T> {
    pub fn with_transport(listener: TcpListener, transport: T, settings: Settings) -> Self {
        Self {
            listener,
            context: Arc::new(NodeContext::new(transport, settings)),
            queue: Arc::new(MessageQueue::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<NodeContext<T>> {
        Arc::clone(&self.context)
    }

    /// Serves until `shutdown` resolves or an `exit` message is consumed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Node {
            listener,
            context,
            queue,
        } = self;
        tokio::pin!(shutdown);

        let mut consumer = tokio::spawn(consume(Arc::clone(&context), Arc::clone(&queue)));

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("node shutting down");
                    break;
                }
                finished = &mut consumer => {
                    if let Err(err) = finished {
                        warn!(error = ?err, "consumer task failed");
                    }
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &queue);
                }
            }
        }

        queue.close();
        Ok(())
    }

    /// Serves until ctrl-c or an `exit` message. If the ctrl-c handler cannot
    /// be installed, only `exit` stops the node.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(shutdown_signal(tokio::signal::ctrl_c())).await
    }

    /// Runs the node in the background and returns a handle to it.
    pub fn spawn(self) -> Result<NodeHandle<T>> {
        let addr = self.local_addr()?;
        let context = self.context();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(NodeHandle {
            addr,
            context,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a node running in the background.
///
/// Dropping the handle stops the node.
pub struct NodeHandle<T: Transport = TcpTransport> {
    addr: SocketAddr,
    context: Arc<NodeContext<T>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl<T: Transport> NodeHandle<T> {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &Arc<NodeContext<T>> {
        &self.context
    }

    /// True once the node has stopped, e.g. after consuming `exit`.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        join(self.task).await
    }

    /// Waits for the node to stop on its own.
    pub async fn wait(self) -> Result<()> {
        let NodeHandle {
            shutdown, task, ..
        } = self;
        let outcome = join(task).await;
        drop(shutdown);
        outcome
    }
}

async fn shutdown_signal<S>(signal: S)
where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        warn!(error = ?err, "failed to install ctrl-c handler; serving until exit");
        std::future::pending::<()>().await;
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    task.await.map_err(|err| KvError::Io(std::io::Error::other(err)))?
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    queue: &Arc<MessageQueue>,
) {
    match result {
        Ok((stream, peer)) => spawn_reader(stream, peer, queue),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_reader(stream: TcpStream, peer: SocketAddr, queue: &Arc<MessageQueue>) {
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        if let Err(err) = read_connection(stream, peer, queue).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

async fn read_connection(stream: TcpStream, peer: SocketAddr, queue: Arc<MessageQueue>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    while let Some(raw) = read_frame(&mut reader).await? {
        let lane = queue.enqueue(raw);
        debug!(peer = %peer, ?lane, "frame queued");
    }
    Ok(())
}

enum Flow {
    Continue,
    Exit,
}

async fn consume<T: Transport>(context: Arc<NodeContext<T>>, queue: Arc<MessageQueue>) {
    while let Some(raw) = queue.dequeue().await {
        if let Flow::Exit = dispatch(&context, &raw) {
            queue.close();
            break;
        }
    }
    debug!("consumer stopped");
}

fn dispatch<T: Transport>(context: &Arc<NodeContext<T>>, raw: &str) -> Flow {
    let message = match Message::parse(raw) {
        Ok(message) => message,
        Err(err) => {
            warn!(frame = %raw.trim_end(), error = %err, "dropping frame");
            return Flow::Continue;
        }
    };
    let kind = message.kind();

    match message {
        Message::Initialize(topology) => {
            if let Err(err) = context.initialize(topology) {
                warn!(error = %err, "ignoring initialize");
            }
        }
        Message::Exit { coordinator } => {
            info!(%coordinator, "exit requested");
            return Flow::Exit;
        }
        Message::Done { client } => {
            debug!(%client, "ignoring done; only the coordinator tracks completions");
        }
        Message::Get {
            key,
            requester,
            request_id,
        } => {
            let context = Arc::clone(context);
            spawn_handler(kind, async move {
                context.handle_get(key, requester, request_id).await
            });
        }
        Message::PrimarySet {
            key,
            value,
            client,
            request_id,
        } => {
            let context = Arc::clone(context);
            spawn_handler(kind, async move {
                context
                    .handle_primary_set(key, value, client, request_id)
                    .await
            });
        }
        Message::ReplicaSet {
            key,
            value,
            replication_id,
        } => {
            let context = Arc::clone(context);
            spawn_handler(kind, async move {
                context.handle_replica_set(key, value, replication_id).await
            });
        }
        Message::ReplicaSetResult { replication_id, .. } => {
            let context = Arc::clone(context);
            spawn_handler(kind, async move {
                context.handle_replica_set_result(&replication_id)
            });
        }
        result @ (Message::GetResult { .. }
        | Message::PrimarySetResult { .. }
        | Message::PrimarySetError { .. }) => {
            if let Err(err) = context.handle_result(result) {
                warn!(%kind, error = %err, "dropping result");
            }
        }
    }

    Flow::Continue
}

fn spawn_handler<F>(kind: MessageKind, handler: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = handler.await {
            warn!(%kind, error = %err, "handler failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    use super::*;
    use crate::config::{Consistency, Role};
    use crate::framing::write_frame;
    use crate::node::tests::{topology, RecordingTransport};
    use crate::request_id::RequestId;

    async fn spawn_recording() -> NodeHandle<RecordingTransport> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Node::with_transport(listener, RecordingTransport::default(), Settings::default())
            .spawn()
            .unwrap()
    }

    async fn deliver(addr: SocketAddr, frames: &[String]) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for frame in frames {
            write_frame(&mut stream, frame).await.unwrap();
        }
        stream.shutdown().await.unwrap();
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn initialize_then_traffic_is_served() {
        let node = spawn_recording().await;
        let init = Message::Initialize(topology(Role::Replica, Consistency::Eventual, "r1:1"));

        deliver(
            node.addr(),
            &[init.to_string(), "replica-set x 1 r-1".to_string()],
        )
        .await;

        let context = Arc::clone(node.context());
        eventually(|| context.store().get("x").is_some()).await;
        assert_eq!(context.topology().unwrap().role, Role::Replica);

        deliver(node.addr(), &["get x client:5 q-1".to_string()]).await;
        eventually(|| context.transport().sent().len() == 2).await;

        let sent = context.transport().sent();
        assert!(sent.contains(&(
            "client:5".to_string(),
            Message::GetResult {
                key: "x".into(),
                value: Some("1".into()),
                request_id: RequestId::from("q-1"),
            }
        )));
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_and_serving_continues() {
        let node = spawn_recording().await;
        let init = Message::Initialize(topology(Role::Primary, Consistency::Eventual, "primary:9"));

        deliver(
            node.addr(),
            &[
                "gossip hello".to_string(),
                "get only-a-key".to_string(),
                init.to_string(),
                "get x client:5 q-1\0\n".to_string(),
            ],
        )
        .await;

        let context = Arc::clone(node.context());
        eventually(|| context.transport().sent().len() == 1).await;
        assert_eq!(
            context.transport().sent()[0].1.to_string(),
            "get-result x NULL q-1"
        );
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_signal_install_does_not_shut_down() {
        let failed = async { Err(std::io::Error::other("no signal support")) };
        assert!(
            timeout(Duration::from_millis(50), shutdown_signal(failed))
                .await
                .is_err(),
            "a missing ctrl-c handler must not count as a shutdown request"
        );
        assert!(timeout(Duration::from_millis(50), shutdown_signal(async { Ok(()) }))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn exit_stops_the_node() {
        let node = spawn_recording().await;
        deliver(node.addr(), &["exit 127.0.0.1:8999".to_string()]).await;

        timeout(Duration::from_secs(2), node.wait())
            .await
            .expect("node should stop on exit")
            .unwrap();
    }

    #[tokio::test]
    async fn messages_before_initialize_are_not_applied() {
        let node = spawn_recording().await;
        deliver(node.addr(), &["replica-set x 1 r-1".to_string()]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(node.context().store().is_empty());
        assert!(!node.context().is_initialized());
        node.stop().await.unwrap();
    }
}
