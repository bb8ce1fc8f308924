//! Serial port auto-detection
//!
//! Candidate ports are tried one after the other. Each one is opened, probed
//! by the driver under the auto-detection timeout and closed again unless
//! the reader answered. A port that fails in any way is skipped.

use std::time::Duration;

use tracing::{debug, info};

use readerlink_transport::{available_ports, LineSettings, SerialTransport, Transport};

use crate::channel::Channel;
use crate::drivers::ReaderDriver;
use crate::error::Result;

/// Source of candidate ports and of transports to probe them with
pub trait PortScanner: Send + Sync {
    /// Ports to try, in order
    fn ports(&self) -> Result<Vec<String>>;

    /// Unopened transport on `port`
    fn open(&self, port: &str) -> Box<dyn Transport>;
}

/// Scanner over the serial ports of this machine
#[derive(Debug, Clone)]
pub struct SerialScanner {
    line: LineSettings,
    retry: Option<Duration>,
    candidates: Option<Vec<String>>,
}

impl SerialScanner {
    pub fn new(line: LineSettings) -> Self {
        Self {
            line,
            retry: None,
            candidates: None,
        }
    }

    /// Forwarded to every [`SerialTransport`] the scanner builds
    pub fn with_configuration_retry(mut self, delay: Option<Duration>) -> Self {
        self.retry = delay;
        self
    }

    /// Probe only these ports instead of every port on the machine
    pub fn with_candidates(mut self, ports: Vec<String>) -> Self {
        self.candidates = Some(ports);
        self
    }
}

impl PortScanner for SerialScanner {
    fn ports(&self) -> Result<Vec<String>> {
        match &self.candidates {
            Some(ports) => Ok(ports.clone()),
            None => Ok(available_ports()?),
        }
    }

    fn open(&self, port: &str) -> Box<dyn Transport> {
        Box::new(SerialTransport::new(port, self.line).with_configuration_retry(self.retry))
    }
}

/// Find the first port where `driver` gets an answer
///
/// Returns the still open channel, or `None` when no port answered. The
/// channel keeps `timeout`; the caller resets it to its data timeout.
pub async fn detect<D>(
    driver: &mut D,
    scanner: &dyn PortScanner,
    timeout: Duration,
) -> Result<Option<Channel>>
where
    D: ReaderDriver + ?Sized,
{
    let ports = scanner.ports()?;
    debug!(count = ports.len(), kind = %driver.kind(), "Probing serial ports");

    for port in ports {
        let mut channel = Channel::new(scanner.open(&port), timeout);

        let found = match channel.open().await {
            Ok(()) => match driver.probe(&mut channel).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(port = %port, error = %e, "Probe failed");
                    false
                }
            },
            Err(e) => {
                debug!(port = %port, error = %e, "Cannot open port");
                false
            }
        };

        if found {
            info!(port = %port, kind = %driver.kind(), "Reader detected");
            return Ok(Some(channel));
        }

        if let Err(e) = channel.close().await {
            debug!(port = %port, error = %e, "Close after probe failed");
        }
    }

    info!(kind = %driver.kind(), "No reader detected");
    Ok(None)
}
