//! # readerlink-core
//!
//! Wire-level building blocks for serial and TCP smart-card readers.
//!
//! This crate provides the protocol primitives:
//! - Frame extraction from a noisy byte stream
//! - Command adapters (encode commands, validate answers) per reader family
//! - Checksums and CRCs
//! - The STid STR secure session (handshakes, signing, ciphering)
//! - Device status tables
//!
//! Nothing here performs I/O.

pub mod adapter;
pub mod checksum;
pub mod cursor;
pub mod error;
pub mod framing;
pub mod secure;
pub mod status;

pub use adapter::{Answer, CommandAdapter};
pub use error::{AuthError, Error, ErrorKind, Result};
pub use framing::{Extraction, FrameBuffer, Protocol};
pub use status::{StatusError, StidCmdType, StidStatus};
