//! Length-prefixed JSON framing.
//!
//! Every message on the wire is `[u32 big-endian length][payload]`.
//! Frames above 10 MiB are rejected before allocation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's payload.
pub const MAX_FRAME_BYTES: u32 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(u32),
}

/// Write one framed payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    if len > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge(len));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Serialize a value and write it as one frame.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    write_frame(writer, &payload).await
}

/// Read one frame and deserialize it.
pub async fn read_json<R, T>(reader: &mut R) -> Result<T, NetError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader).await?;
    Ok(serde_json::from_slice(&payload)?)
}
