use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{WireError, WireResult};
use crate::frame::Frame;

/// Frames larger than this are rejected rather than allocated, guarding against a
/// corrupt or hostile length prefix.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Reads one length-prefixed JSON frame from `reader`.
///
/// Wire shape: a 4-byte big-endian length prefix followed by that many bytes of UTF-8 JSON
/// encoding a [`Frame`]. Returns [`WireError::ConnectionClosed`] if the stream ends before a
/// length prefix can be read at all (a clean EOF between frames).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> WireResult<Frame> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed)
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let frame: Frame = serde_json::from_slice(&body)?;
    Ok(frame)
}

/// Writes one length-prefixed JSON frame to `writer` and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> WireResult<()> {
    let body = serde_json::to_vec(frame)?;
    if body.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(WireError::FrameTooLarge {
            size: body.len() as u32,
            max: MAX_FRAME_LEN,
        });
    }
    let len = (body.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
