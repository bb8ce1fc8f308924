//! Type definitions for readerlink
//!
//! Values shared by every layer: communication modes, reader kinds,
//! detected chips, settings and the TOML configuration file.

pub mod chip;
pub mod config;
pub mod error;
pub mod kind;
pub mod mode;
pub mod settings;

pub use chip::ChipInfo;
pub use config::{Config, EndpointConfig, OsdpOptions, ReaderConfig, RplethOptions, StidStrOptions};
pub use error::{Error, Result};
pub use kind::ReaderKind;
pub use mode::{CommunicationMode, CommunicationType, StidBaudRate};
pub use settings::Settings;
