//! Transport layer for reader communication
//!
//! Provides TCP and serial byte streams with deadline-bounded reads.

pub mod error;
mod io;
pub mod serial;
pub mod tcp;

pub use error::{Error, Result};
pub use serial::{available_ports, LineSettings, SerialTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::time::Instant;

/// Log target for raw bytes on the wire
pub const WIRE_LOG_TARGET: &str = "readerlink::wire";

/// Byte stream to a reader
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the endpoint
    async fn connect(&mut self) -> Result<()>;
    
    /// Close the endpoint
    async fn disconnect(&mut self) -> Result<()>;
    
    /// Check if connected
    fn is_connected(&self) -> bool;
    
    /// Write all bytes and flush
    async fn send(&mut self, data: &[u8]) -> Result<()>;
    
    /// Wait for readable bytes until `deadline`
    ///
    /// Returns an empty buffer if the deadline passes with nothing to read.
    async fn receive(&mut self, deadline: Instant) -> Result<BytesMut>;
    
    /// Port name or `host:port`
    fn name(&self) -> String;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }
    
    async fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect().await
    }
    
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data).await
    }
    
    async fn receive(&mut self, deadline: Instant) -> Result<BytesMut> {
        (**self).receive(deadline).await
    }
    
    fn name(&self) -> String {
        (**self).name()
    }
}
