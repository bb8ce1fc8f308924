//! TCP transport
//!
//! Used by network attached readers such as the Rpleth box. Every address
//! the host name resolves to is tried in turn until one accepts, all within
//! one connect timeout.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::io::{read_before, write_flushed};
use crate::Transport;

const READ_CHUNK: usize = 1024;

pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    peer: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            peer: None,
            stream: None,
        }
    }

    /// Bound on name resolution plus all connection attempts
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Address the socket is connected to
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn dial(&self, deadline: Instant) -> Result<(TcpStream, SocketAddr)> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = timeout_at(deadline, tokio::net::lookup_host(&target))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", target, e)))?
            .collect();

        if addrs.is_empty() {
            return Err(Error::InvalidAddress(format!("{} resolves to nothing", target)));
        }

        let mut last = None;
        for addr in addrs {
            match timeout_at(deadline, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok((stream, addr)),
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "Connection refused");
                    last = Some(e);
                }
                Err(_) => return Err(Error::ConnectionTimeout),
            }
        }

        Err(Error::Io(last.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected))))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let deadline = Instant::now() + self.connect_timeout;
        let (stream, addr) = self.dial(deadline).await?;
        // Reader frames are small, don't wait to coalesce them
        stream.set_nodelay(true)?;

        info!(peer = %addr, "TCP connection established");
        self.peer = Some(addr);
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peer = None;
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        if let Err(e) = stream.shutdown().await {
            debug!(name = %self.name(), error = %e, "TCP shutdown failed");
        }
        debug!(name = %self.name(), "TCP connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        write_flushed(stream, data, "tcp").await
    }

    async fn receive(&mut self, deadline: Instant) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        read_before(stream, deadline, READ_CHUNK, "tcp").await
    }

    fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            warn!(name = %self.name(), "TCP transport dropped while connected");
        }
    }
}
