//! # readerlink
//!
//! Drivers for serial and TCP smart-card readers: STid STR (with its
//! signed and ciphered secure session), Rpleth, OSDP, Axess TMC13, STid
//! PRG and Promag.
//!
//! ## Features
//!
//! - Deadline bounded framing over any byte transport
//! - STid STR HMAC and AES mutual authentication
//! - Card insertion and removal polling
//! - Serial port auto-detection
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use readerlink::{Config, ReaderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("readers.toml")?;
//!     readerlink::logging::init(&config.settings)?;
//!
//!     let registry = ReaderRegistry::with_defaults();
//!     let mut unit = registry.create_unit(&config.readers[0], &config.settings)?;
//!
//!     unit.connect().await?;
//!     if let Some(chip) = unit.wait_insertion(Duration::from_secs(30)).await? {
//!         println!("{}", chip);
//!     }
//!     unit.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod autodetect;
pub mod channel;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod reader;
pub mod registry;

#[cfg(test)]
mod testing;

// Re-exports
pub use channel::{Channel, Exchange};
pub use drivers::ReaderDriver;
pub use error::{Error, ErrorKind, Result};
pub use reader::{ReaderUnit, UnitState};
pub use registry::{BuiltinProvider, ReaderProvider, ReaderRegistry};

// Re-export types
pub use readerlink_core::Answer;
pub use readerlink_transport::{LineSettings, SerialTransport, TcpTransport, Transport};
pub use readerlink_types::{
    ChipInfo, CommunicationMode, Config, EndpointConfig, OsdpOptions, ReaderConfig, ReaderKind,
    RplethOptions, Settings, StidStrOptions,
};
