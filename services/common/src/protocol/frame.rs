//! Length-prefixed framing: `[u32 big-endian length N][N bytes UTF-8 JSON]`.
//!
//! Any framing violation is a transport error; the reader closes the
//! connection and leaves recovery to the reconnect loop.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::message::WireFrame;
use crate::errors::{TraderError, TraderResult};

/// Upper bound on a single frame body
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize one frame to its wire bytes
pub fn encode_frame(frame: &WireFrame) -> TraderResult<Vec<u8>> {
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TraderError::Transport(format!(
            "frame body {} exceeds limit {MAX_FRAME_LEN}",
            body.len()
        )));
    }
    let mut buf = Vec::with_capacity(4 + body.len());
    // Body length always fits u32 after the limit check.
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parse one frame from a complete wire buffer, returning the frame and the
/// number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> TraderResult<(WireFrame, usize)> {
    if bytes.len() < 4 {
        return Err(TraderError::Transport("framing underrun".to_string()));
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TraderError::Transport(format!(
            "frame length {len} exceeds limit {MAX_FRAME_LEN}"
        )));
    }
    let end = 4 + len;
    if bytes.len() < end {
        return Err(TraderError::Transport("unterminated frame".to_string()));
    }
    let frame = serde_json::from_slice(&bytes[4..end])
        .map_err(|e| TraderError::Transport(format!("bad frame json: {e}")))?;
    Ok((frame, end))
}

/// Read one frame from the stream. `Ok(None)` marks a clean EOF at a frame
/// boundary; mid-frame EOF and all other violations are transport errors.
pub async fn read_frame<R>(reader: &mut R) -> TraderResult<Option<WireFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TraderError::Transport(format!(
            "frame length {len} exceeds limit {MAX_FRAME_LEN}"
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TraderError::Transport(format!("unterminated frame: {e}")))?;
    let frame = serde_json::from_slice(&body)
        .map_err(|e| TraderError::Transport(format!("bad frame json: {e}")))?;
    Ok(Some(frame))
}

/// Write one frame to the stream and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &WireFrame) -> TraderResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
