//! Length-prefixed JSON framing for the per-worker message channel
//!
//! Each frame is a little-endian u32 byte count followed by the envelope
//! as JSON. The channel rides on the worker's stdin/stdout pair, which is
//! why worker logs must go to stderr.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};
use crate::messages::Envelope;

/// Upper bound on a single frame; anything larger is a protocol violation
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one envelope as a frame and flush it
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(envelope)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(SharedError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        });
    }

    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one envelope; `Ok(None)` means the peer closed the channel cleanly.
///
/// EOF in the middle of a frame is an error - a clean close only ever
/// happens on a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> SharedResult<Option<Envelope>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SharedError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SIGNAL_DISCONNECT;
    use serde_json::json;

    #[tokio::test]
    async fn frames_round_trip_in_order() {
        let (mut left, mut right) = tokio::io::duplex(1024);

        let first = Envelope::request("supervisor-0".into(), "echo", Some(json!({"v": 1})));
        let second = Envelope::signal(SIGNAL_DISCONNECT);
        write_frame(&mut left, &first).await.unwrap();
        write_frame(&mut left, &second).await.unwrap();

        assert_eq!(read_frame(&mut right).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut right).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn clean_close_reads_as_none() {
        let (left, mut right) = tokio::io::duplex(64);
        drop(left);

        assert!(read_frame(&mut right).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut left, mut right) = tokio::io::duplex(64);

        // Announce 100 bytes but deliver only 3 before closing
        tokio::io::AsyncWriteExt::write_all(&mut left, &100u32.to_le_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut left, b"abc").await.unwrap();
        drop(left);

        assert!(read_frame(&mut right).await.is_err());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut left, mut right) = tokio::io::duplex(64);

        let len = (MAX_FRAME_LEN as u32) + 1;
        tokio::io::AsyncWriteExt::write_all(&mut left, &len.to_le_bytes())
            .await
            .unwrap();

        match read_frame(&mut right).await {
            Err(SharedError::FrameTooLarge { .. }) => {}
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }
}
