//! Length-prefixed JSON framing.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [JSON data]`

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Message;

/// Largest accepted frame body, in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encodes one wire message to JSON bytes.
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes one wire message from JSON bytes.
pub fn decode_message(data: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(data)?)
}

/// Writes `data` as one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(RpcError::InvalidRequest(format!(
            "Message too large: {} bytes (max {} bytes)",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len = data.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;

    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(map_io_error(e, "reading length prefix")),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::InvalidResponse(format!(
            "Message too large: {} bytes (max {} bytes)",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    Ok(Some(buf))
}

/// Maps stream failures to connection errors; anything else stays an I/O error.
fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            RpcError::Connection(format!("{}: connection lost", context))
        }
        _ => RpcError::Io(err),
    }
}
