//! Transport doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use mockall::mock;
use tokio::time::Instant;

use readerlink_core::checksum::{self, CRC_CCITT_1D0F};
use readerlink_transport::{Result, Transport};

mock! {
    pub Transport {}

    #[async_trait]
    impl Transport for Transport {
        async fn connect(&mut self) -> Result<()>;
        async fn disconnect(&mut self) -> Result<()>;
        fn is_connected(&self) -> bool;
        async fn send(&mut self, data: &[u8]) -> Result<()>;
        async fn receive(&mut self, deadline: Instant) -> Result<BytesMut>;
        fn name(&self) -> String;
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// In-memory reader: every write produces the chunks the responder returns
///
/// A read with nothing queued sleeps until its deadline and returns empty,
/// like a silent line.
pub struct ScriptedTransport {
    name: String,
    connected: bool,
    fail_connect: bool,
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            name: "sim0".into(),
            connected: false,
            fail_connect: false,
            responder: Box::new(responder),
            pending: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer the first write with `bytes`, stay silent afterwards
    pub fn reply(self, bytes: Vec<u8>) -> Self {
        self.reply_chunks(vec![bytes])
    }

    /// Answer the first write with `chunks`, one per read
    pub fn reply_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        let mut script = Some(chunks);
        self.responder = Box::new(move |_| script.take().unwrap_or_default());
        self
    }

    /// Bytes readable without any write
    pub fn pushed(mut self, bytes: Vec<u8>) -> Self {
        self.pending.push_back(bytes);
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Every write, in order
    pub fn sent(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }

    /// Number of `disconnect` calls made while connected
    pub fn disconnects(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.disconnects)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(readerlink_transport::Error::Serial {
                port: self.name.clone(),
                message: "no such device".into(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(readerlink_transport::Error::NotConnected);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        let chunks = (self.responder)(data);
        self.pending.extend(chunks.into_iter().filter(|c| !c.is_empty()));
        Ok(())
    }

    async fn receive(&mut self, deadline: Instant) -> Result<BytesMut> {
        if !self.connected {
            return Err(readerlink_transport::Error::NotConnected);
        }
        match self.pending.pop_front() {
            Some(chunk) => Ok(BytesMut::from(&chunk[..])),
            None => {
                tokio::time::sleep_until(deadline).await;
                Ok(BytesMut::new())
            }
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// OSDP reply frame with a CRC trailer
pub fn osdp_reply(address: u8, sequence: u8, code: u8, data: &[u8]) -> Vec<u8> {
    let total = 5 + 1 + data.len() + 2;
    let mut frame = vec![0x53, address | 0x80];
    frame.extend_from_slice(&(total as u16).to_le_bytes());
    frame.push(sequence | 0x04);
    frame.push(code);
    frame.extend_from_slice(data);
    let crc = checksum::crc_ccitt(CRC_CCITT_1D0F, &frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Rpleth answer frame with a success status
pub fn rpleth_frame(device: u8, command: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x00, device, command, data.len() as u8];
    frame.extend_from_slice(data);
    frame.push(checksum::xor(&frame));
    frame
}
