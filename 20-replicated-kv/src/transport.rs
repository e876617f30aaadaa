//! Outbound side of the network: the single `send(message, address)` primitive.

use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{KvError, Result};
use crate::framing::write_frame;
use crate::message::Message;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers one message to one address.
///
/// Failures come back as [`KvError::SendFailure`] and are never swallowed here.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, message: &Message, addr: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Opens a fresh TCP connection per message, writes one frame, and closes it.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn send(&self, message: &Message, addr: &str) -> impl Future<Output = Result<()>> + Send {
        let text = message.to_string();
        let addr = addr.to_string();
        async move {
            debug!(%addr, message = %text, "sending");
            try_send(&addr, &text).await.map_err(|err| match err {
                KvError::Io(source) => KvError::SendFailure { addr, source },
                other => other,
            })
        }
    }
}

async fn try_send(addr: &str, text: &str) -> Result<()> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    write_frame(&mut stream, text).await?;
    stream.shutdown().await?;
    Ok(())
}
