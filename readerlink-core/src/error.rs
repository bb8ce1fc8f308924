//! Error types for readerlink-core

use crate::status::StatusError;

/// Result type alias for readerlink-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification shared by every layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open, read, write or connect failure
    Transport,
    
    /// Bad marker, bad length, bad checksum or truncated frame
    Framing,
    
    /// Handshake failure or missing session key
    Authentication,
    
    /// Device reported a non-success status
    ProtocolStatus,
    
    /// Deadline elapsed with no data at all
    Timeout,
    
    /// Caller misuse (not connected, bad configuration, ...)
    Usage,
}

/// Framing and protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooShort {
        expected: usize,
        actual: usize,
    },
    
    /// Wrong start byte
    #[error("Bad start byte: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadMarker {
        expected: u8,
        actual: u8,
    },
    
    /// Wrong end byte
    #[error("Bad end byte: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadTerminator {
        expected: u8,
        actual: u8,
    },
    
    /// Declared length disagrees with the frame
    #[error("Length mismatch: header declares {declared} bytes, frame holds {actual} bytes")]
    LengthMismatch {
        declared: usize,
        actual: usize,
    },
    
    /// Checksum or CRC verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },
    
    /// Message HMAC did not verify
    #[error("Signature mismatch")]
    SignatureMismatch,
    
    /// Frame is well formed but does not answer the last command
    #[error("Unexpected answer: {0}")]
    UnexpectedAnswer(String),
    
    /// Deadline elapsed with a partial frame buffered
    #[error("Truncated frame: {buffered} bytes buffered when the deadline elapsed")]
    Truncated {
        buffered: usize,
    },
    
    /// Payload does not fit the length field
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },
    
    /// Device returned a non-success status
    #[error(transparent)]
    Status(#[from] StatusError),
    
    /// Secure session failure
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

/// STid STR secure session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("insufficient entropy source")]
    InsufficientEntropy,
    
    #[error("cannot negotiate the session: device nonce does not match ours")]
    NonceMismatch,
    
    #[error("bad handshake response length: expected {expected} bytes, got {actual} bytes")]
    BadResponseLength {
        expected: usize,
        actual: usize,
    },
    
    #[error("no {0} session key, authenticate first")]
    MissingSessionKey(&'static str),
    
    #[error("handshake timed out")]
    HandshakeTimeout,
    
    #[error("cipher error: {0}")]
    Cipher(String),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Status(_) => ErrorKind::ProtocolStatus,
            Self::Auth(_) => ErrorKind::Authentication,
            Self::PayloadTooLarge { .. } => ErrorKind::Usage,
            _ => ErrorKind::Framing,
        }
    }
    
    /// Check if error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Status(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RplethStatus;
    
    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Truncated { buffered: 3 }.kind(), ErrorKind::Framing);
        assert_eq!(Error::SignatureMismatch.kind(), ErrorKind::Framing);
        assert_eq!(
            Error::Auth(AuthError::NonceMismatch).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            Error::Status(StatusError::Rpleth(RplethStatus::Timeout)).kind(),
            ErrorKind::ProtocolStatus
        );
    }
    
    #[test]
    fn test_entropy_message() {
        let err = Error::from(AuthError::InsufficientEntropy);
        assert_eq!(err.to_string(), "Authentication error: insufficient entropy source");
    }
}
