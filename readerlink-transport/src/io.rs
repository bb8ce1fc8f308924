//! Deadline bounded reads and flushed writes shared by the stream transports

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::error::{Error, Result};
use crate::WIRE_LOG_TARGET;

pub(crate) async fn write_flushed<S>(stream: &mut S, data: &[u8], medium: &'static str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    trace!(target: WIRE_LOG_TARGET, medium, len = data.len(), "Out {:02X?}", data);
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// One read of at most `capacity` bytes; empty once `deadline` passes
///
/// End of stream is reported as [`Error::ConnectionClosed`].
pub(crate) async fn read_before<S>(
    stream: &mut S,
    deadline: Instant,
    capacity: usize,
    medium: &'static str,
) -> Result<BytesMut>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = BytesMut::with_capacity(capacity);

    let Ok(read) = timeout_at(deadline, stream.read_buf(&mut chunk)).await else {
        return Ok(BytesMut::new());
    };
    if read? == 0 {
        return Err(Error::ConnectionClosed);
    }

    trace!(target: WIRE_LOG_TARGET, medium, len = chunk.len(), "In {:02X?}", &chunk[..]);
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_then_close() {
        let (mut near, mut far) = tokio::io::duplex(64);
        far.write_all(&[0x02, 0x10, 0x03]).await.unwrap();
        drop(far);

        let deadline = Instant::now() + Duration::from_secs(1);
        let chunk = read_before(&mut near, deadline, 16, "test").await.unwrap();
        assert_eq!(&chunk[..], &[0x02, 0x10, 0x03]);
        assert!(matches!(
            read_before(&mut near, deadline, 16, "test").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_until_deadline() {
        let (mut near, _far) = tokio::io::duplex(64);
        let deadline = Instant::now() + Duration::from_millis(300);

        let chunk = read_before(&mut near, deadline, 16, "test").await.unwrap();
        assert!(chunk.is_empty());
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test]
    async fn test_write_flushed() {
        let (mut near, mut far) = tokio::io::duplex(64);
        write_flushed(&mut near, b"v", "test").await.unwrap();

        let mut received = [0u8; 1];
        far.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"v");
    }
}
