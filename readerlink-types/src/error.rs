//! Error types for readerlink-types

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),
    
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown communication mode: {0:?} (expected plain, signed, ciphered or signed+ciphered)")]
    UnknownMode(String),

    #[error("Invalid {name} key: expected {expected} bytes, got {actual} bytes")]
    InvalidKeyLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),
}
