//! Transport errors
//!
//! Every variant maps to the transport kind of the facade's error taxonomy.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport is not open")]
    NotConnected,

    #[error("transport is already open")]
    AlreadyConnected,

    #[error("timed out while opening the connection")]
    ConnectionTimeout,

    /// End of stream while reading
    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("cannot resolve {0}")]
    InvalidAddress(String),

    /// Opening, configuring or enumerating serial ports failed
    #[error("serial port {port}: {message}")]
    Serial { port: String, message: String },
}
