//! Serial transport

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::time::Instant;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::io::{read_before, write_flushed};
use crate::Transport;

const READ_CHUNK: usize = 256;

/// Line parameters applied after opening the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineSettings {
    /// 8N1 at `baud_rate`
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::new(9600)
    }
}

/// Serial transport for RS232/RS485 readers
pub struct SerialTransport {
    port_name: String,
    line: LineSettings,
    retry: Option<Duration>,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, line: LineSettings) -> Self {
        Self {
            port_name: port_name.into(),
            line,
            retry: None,
            stream: None,
        }
    }
    
    /// Reopen once after `delay` when opening or configuring fails
    pub fn with_configuration_retry(mut self, delay: Option<Duration>) -> Self {
        self.retry = delay;
        self
    }
    
    pub fn line_settings(&self) -> LineSettings {
        self.line
    }
    
    /// Change the line settings, applied now if the port is open
    pub fn set_line_settings(&mut self, line: LineSettings) -> Result<()> {
        self.line = line;
        if self.stream.is_some() {
            self.configure()?;
        }
        Ok(())
    }
    
    fn serial_error(&self, err: impl ToString) -> Error {
        Error::Serial {
            port: self.port_name.clone(),
            message: err.to_string(),
        }
    }
    
    fn open(&mut self) -> Result<()> {
        let stream = tokio_serial::new(&self.port_name, self.line.baud_rate)
            .open_native_async()
            .map_err(|e| self.serial_error(e))?;
        self.stream = Some(stream);
        Ok(())
    }
    
    fn configure(&mut self) -> Result<()> {
        let line = self.line;
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        
        let applied = stream
            .set_baud_rate(line.baud_rate)
            .and_then(|_| stream.set_data_bits(line.data_bits))
            .and_then(|_| stream.set_parity(line.parity))
            .and_then(|_| stream.set_stop_bits(line.stop_bits))
            .and_then(|_| stream.set_flow_control(FlowControl::None));
        
        applied.map_err(|e| self.serial_error(e))
    }
    
    fn open_and_configure(&mut self) -> Result<()> {
        let result = self.open().and_then(|_| self.configure());
        if result.is_err() {
            self.stream = None;
        }
        result
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        
        debug!(port = %self.port_name, baud = self.line.baud_rate, "Opening serial port");
        
        if let Err(err) = self.open_and_configure() {
            let Some(delay) = self.retry else {
                return Err(err);
            };
            
            warn!(port = %self.port_name, error = %err, "Serial configuration failed, retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
            self.open_and_configure()?;
        }
        
        info!(port = %self.port_name, "Serial port opened");
        Ok(())
    }
    
    async fn disconnect(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }
    
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
    
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        write_flushed(stream, data, "serial").await
    }

    async fn receive(&mut self, deadline: Instant) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        read_before(stream, deadline, READ_CHUNK, "serial").await
    }

    fn name(&self) -> String {
        self.port_name.clone()
    }
}

/// Names of the serial ports present on this machine
pub fn available_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|e| Error::Serial {
        port: String::from("*"),
        message: e.to_string(),
    })?;
    
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
