//! Length-prefixed framing for message text.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! UTF-8. A frame may span several reads and one read may carry several
//! frames.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{KvError, Result};

pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Reads the next frame. Returns `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    // Only EOF before the first header byte is a clean end of stream.
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    match reader.read_exact(&mut len_buf[1..]).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(KvError::MalformedMessage(
                "stream ended inside a frame header".to_string(),
            ))
        }
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(KvError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|err| KvError::MalformedMessage(format!("frame is not UTF-8: {err}")))
}

pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = text.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(KvError::FrameTooLarge(bytes.len()));
    }

    let mut encoded = Vec::with_capacity(4 + bytes.len());
    encoded.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    encoded.extend_from_slice(bytes);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
