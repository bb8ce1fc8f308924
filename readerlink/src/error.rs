//! High-level error types

use std::time::Duration;

pub use readerlink_core::ErrorKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] readerlink_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] readerlink_transport::Error),

    #[error("Configuration error: {0}")]
    Types(#[from] readerlink_types::Error),

    #[error("No answer within {waited:?}")]
    Timeout { waited: Duration },

    #[error("Reader not connected")]
    NotConnected,

    #[error("Port {0} is already used by another reader unit")]
    PortInUse(String),

    #[error("No reader answered on any serial port")]
    NoReaderFound,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid response from reader: {0}")]
    InvalidResponse(String),
}

impl From<readerlink_core::AuthError> for Error {
    fn from(e: readerlink_core::AuthError) -> Self {
        Error::Core(e.into())
    }
}

impl From<readerlink_core::StatusError> for Error {
    fn from(e: readerlink_core::StatusError) -> Self {
        Error::Core(e.into())
    }
}

impl Error {
    /// Failure category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Core(e) => e.kind(),
            Error::Transport(_) => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::InvalidResponse(_) => ErrorKind::Framing,
            Error::Types(_)
            | Error::NotConnected
            | Error::PortInUse(_)
            | Error::NoReaderFound
            | Error::InvalidState(_)
            | Error::NotSupported(_) => ErrorKind::Usage,
        }
    }

    /// Check if the same command may succeed when sent again
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Core(e) => e.is_recoverable(),
            Error::Timeout { .. } | Error::InvalidResponse(_) => true,
            _ => false,
        }
    }

    /// Check if the unit has to reconnect before it can be used again
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::NotConnected
        ) || self.kind() == ErrorKind::Authentication
    }

    /// Authentication failure for a handshake that ran out of time
    pub(crate) fn handshake_timeout() -> Self {
        readerlink_core::AuthError::HandshakeTimeout.into()
    }
}
