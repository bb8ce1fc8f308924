//! Command/answer exchange over one transport
//!
//! A [`Channel`] owns the transport and the frame buffer fed by it. Sending a
//! command drops stale bytes, writes the adapted command, then keeps reading
//! until the extractor yields a frame or the deadline passes.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace};

use readerlink_core::{Answer, CommandAdapter, FrameBuffer, Protocol};
use readerlink_transport::{Transport, WIRE_LOG_TARGET};

use crate::error::{Error, Result};

/// Raw bytes of the last command and its answer frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    pub command: Bytes,
    pub answer: Bytes,
}

pub struct Channel {
    transport: Box<dyn Transport>,
    buffer: FrameBuffer,
    timeout: Duration,
    last: Exchange,
}

impl Channel {
    /// Wrap a transport; `timeout` bounds every answer wait
    pub fn new(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            buffer: FrameBuffer::new(),
            timeout,
            last: Exchange::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Port name or `host:port`
    pub fn name(&self) -> String {
        self.transport.name()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn last_exchange(&self) -> &Exchange {
        &self.last
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Open the transport with an empty buffer
    pub async fn open(&mut self) -> Result<()> {
        self.buffer.clear();
        self.last = Exchange::default();
        self.transport.connect().await?;
        Ok(())
    }

    /// Close the transport and drop buffered bytes
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        if self.transport.is_connected() {
            self.transport.disconnect().await?;
        }
        Ok(())
    }

    /// Send a command and wait for its answer with the channel timeout
    pub async fn send_command<A>(&mut self, adapter: &mut A, command: &[u8]) -> Result<Answer>
    where
        A: CommandAdapter + ?Sized,
    {
        let timeout = self.timeout;
        self.send_command_with_timeout(adapter, command, timeout).await
    }

    /// Send a command and wait at most `timeout` for its answer
    pub async fn send_command_with_timeout<A>(
        &mut self,
        adapter: &mut A,
        command: &[u8],
        timeout: Duration,
    ) -> Result<Answer>
    where
        A: CommandAdapter + ?Sized,
    {
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        if !self.buffer.is_empty() {
            debug!(
                dropped = %hex::encode(self.buffer.as_slice()),
                "Dropping unread bytes before command"
            );
            self.buffer.clear();
        }

        self.transmit(adapter, command).await?;

        let frame = self
            .receive_frame(adapter.protocol(), Instant::now() + timeout)
            .await?;
        self.last.answer = frame.clone();

        Ok(adapter.adapt_answer(&frame)?)
    }

    /// Adapt and write a command without waiting for an answer
    pub async fn transmit<A>(&mut self, adapter: &mut A, command: &[u8]) -> Result<()>
    where
        A: CommandAdapter + ?Sized,
    {
        let raw = adapter.adapt_command(command)?;
        trace!(target: WIRE_LOG_TARGET, cmd = %hex::encode(&raw), "Command");

        self.transport.send(&raw).await?;
        self.last = Exchange {
            command: Bytes::from(raw),
            answer: Bytes::new(),
        };
        Ok(())
    }

    /// Read until one frame of `protocol` is buffered or `deadline` passes
    ///
    /// An empty buffer at the deadline is a [`Error::Timeout`]; a partial
    /// frame is a truncation error.
    pub async fn receive_frame(&mut self, protocol: Protocol, deadline: Instant) -> Result<Bytes> {
        let started = Instant::now();

        loop {
            if let Some(frame) = self.buffer.next_frame(protocol) {
                debug!(?protocol, frame = %hex::encode(&frame), "Frame received");
                return Ok(frame);
            }

            if Instant::now() >= deadline {
                break;
            }

            let chunk = self.transport.receive(deadline).await?;
            if chunk.is_empty() {
                break;
            }
            self.buffer.extend(&chunk);
        }

        if self.buffer.is_empty() {
            Err(Error::Timeout {
                waited: deadline.saturating_duration_since(started),
            })
        } else {
            Err(readerlink_core::Error::Truncated {
                buffered: self.buffer.len(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{osdp_reply, rpleth_frame, MockTransport, ScriptedTransport};
    use bytes::BytesMut;
    use readerlink_core::adapter::RplethAdapter;
    use readerlink_core::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_answer_split_over_reads() {
        let answer = rpleth_frame(0x01, 0x03, &[0xAA, 0xBB]);
        let transport = ScriptedTransport::new()
            .reply_chunks(vec![answer[..2].to_vec(), answer[2..].to_vec()]);
        let sent = transport.sent();

        let mut channel = Channel::new(Box::new(transport), Duration::from_millis(200));
        channel.open().await.unwrap();

        let mut adapter = RplethAdapter::new();
        let command = RplethAdapter::command(0x01, 0x03, &[]).unwrap();
        let result = channel.send_command(&mut adapter, &command).await.unwrap();

        assert_eq!(result, Answer::new(vec![0xAA, 0xBB], 0x00));
        assert_eq!(sent.lock().unwrap()[0], vec![0x01, 0x03, 0x00, 0x02]);
        assert_eq!(channel.last_exchange().answer.as_ref(), &answer[..]);
    }

    #[tokio::test]
    async fn test_stale_bytes_dropped_before_command() {
        let first = rpleth_frame(0x01, 0x03, &[0xAA]);
        let second = rpleth_frame(0x01, 0x03, &[0xBB]);
        let mut replies = vec![
            // a late duplicate rides along with the first answer
            vec![[first.clone(), first.clone()].concat()],
            vec![second.clone()],
        ]
        .into_iter();
        let transport =
            ScriptedTransport::with_responder(move |_: &[u8]| replies.next().unwrap_or_default());

        let mut channel = Channel::new(Box::new(transport), Duration::from_millis(200));
        channel.open().await.unwrap();

        let mut adapter = RplethAdapter::new();
        let command = RplethAdapter::command(0x01, 0x03, &[]).unwrap();

        let answer = channel.send_command(&mut adapter, &command).await.unwrap();
        assert_eq!(answer.data.as_ref(), &[0xAA]);
        assert_eq!(channel.buffer.as_slice(), &first[..]);

        let answer = channel.send_command(&mut adapter, &command).await.unwrap();
        assert_eq!(answer.data.as_ref(), &[0xBB]);
        assert_eq!(channel.last_exchange().answer.as_ref(), &second[..]);
        assert!(channel.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_is_timeout() {
        let mut channel = Channel::new(
            Box::new(ScriptedTransport::new().reply(Vec::new())),
            Duration::from_millis(300),
        );
        channel.open().await.unwrap();

        let mut adapter = RplethAdapter::new();
        let command = RplethAdapter::command(0x01, 0x03, &[]).unwrap();
        let err = channel.send_command(&mut adapter, &command).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(matches!(err, Error::Timeout { waited } if waited == Duration::from_millis(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_frame_is_truncated() {
        let mut channel = Channel::new(
            Box::new(ScriptedTransport::new().reply(vec![0x00, 0x01, 0x03, 0x04, 0xAA])),
            Duration::from_millis(300),
        );
        channel.open().await.unwrap();

        let mut adapter = RplethAdapter::new();
        let command = RplethAdapter::command(0x01, 0x03, &[]).unwrap();
        let err = channel.send_command(&mut adapter, &command).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Core(readerlink_core::Error::Truncated { buffered: 5 })
        ));
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut channel = Channel::new(Box::new(ScriptedTransport::new()), Duration::from_millis(10));
        let mut adapter = RplethAdapter::new();
        let command = RplethAdapter::command(0x01, 0x03, &[]).unwrap();

        assert!(matches!(
            channel.send_command(&mut adapter, &command).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mut mock = MockTransport::new();
        mock.expect_is_connected().return_const(true);
        mock.expect_send()
            .withf(|data: &[u8]| data == [0x01, 0x03, 0x00, 0x02])
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_receive()
            .returning(|_| Err(readerlink_transport::Error::ConnectionClosed));

        let mut channel = Channel::new(Box::new(mock), Duration::from_millis(50));
        let mut adapter = RplethAdapter::new();
        let command = RplethAdapter::command(0x01, 0x03, &[]).unwrap();
        let err = channel.send_command(&mut adapter, &command).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Transport(readerlink_transport::Error::ConnectionClosed)
        ));
        assert!(err.requires_reconnect());
    }

    #[tokio::test]
    async fn test_noise_before_frame_is_skipped() {
        let mut mock = MockTransport::new();
        mock.expect_is_connected().return_const(true);
        mock.expect_send().returning(|_| Ok(()));

        let mut noisy = vec![0xFF, 0xFE];
        noisy.extend(osdp_reply(0x00, 0x00, 0x40, &[]));
        mock.expect_receive()
            .times(1)
            .returning(move |_| Ok(BytesMut::from(&noisy[..])));

        let mut channel = Channel::new(Box::new(mock), Duration::from_millis(50));
        let mut adapter = readerlink_core::adapter::OsdpAdapter::new(0x00);
        let answer = channel.send_command(&mut adapter, &[0x60]).await.unwrap();

        assert_eq!(answer.status, 0x40);
        assert!(answer.data.is_empty());
    }
}
