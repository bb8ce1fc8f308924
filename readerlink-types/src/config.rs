//! TOML configuration for reader units
//!
//! ```toml
//! [settings]
//! auto_detect_enabled = true
//!
//! [[reader]]
//! kind = "stidstr"
//! endpoint = { type = "serial", port = "/dev/ttyUSB0" }
//! stidstr = { communication_mode = "signed+ciphered", hmac_key = "A0 87 75 4B 75 47 48 10 94 BE" }
//!
//! [[reader]]
//! kind = "rpleth"
//! endpoint = { type = "tcp", host = "10.0.0.12", port = 23 }
//! ```
//!
//! The library only reads configuration; it never writes it back.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kind::ReaderKind;
use crate::mode::{CommunicationMode, CommunicationType};
use crate::settings::Settings;

/// Length of an STid STR HMAC user key
pub const HMAC_KEY_LEN: usize = 10;

/// Length of an STid STR AES user key
pub const AES_KEY_LEN: usize = 16;

/// Root of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,

    #[serde(rename = "reader")]
    pub readers: Vec<ReaderConfig>,
}

/// One configured reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub kind: ReaderKind,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub stidstr: StidStrOptions,

    #[serde(default)]
    pub rpleth: RplethOptions,

    #[serde(default)]
    pub osdp: OsdpOptions,
}

/// Where the reader is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndpointConfig {
    /// Serial line; no port name means auto-detection
    Serial {
        #[serde(default)]
        port: Option<String>,
        #[serde(default)]
        baud_rate: Option<u32>,
    },

    /// TCP socket
    Tcp { host: String, port: u16 },
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::Serial {
            port: None,
            baud_rate: None,
        }
    }
}

/// STid STR specific options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StidStrOptions {
    pub communication_mode: CommunicationMode,
    pub communication_type: CommunicationType,
    pub rs485_address: u8,

    /// Hex, whitespace ignored; empty selects the reader's factory key
    pub hmac_key: String,

    /// Hex, whitespace ignored; empty selects the reader's factory key
    pub aes_key: String,
}

impl StidStrOptions {
    /// Decoded HMAC user key (empty when not configured)
    pub fn hmac_key_bytes(&self) -> Result<Vec<u8>> {
        decode_key("hmac", &self.hmac_key, HMAC_KEY_LEN)
    }

    /// Decoded AES user key (empty when not configured)
    pub fn aes_key_bytes(&self) -> Result<Vec<u8>> {
        decode_key("aes", &self.aes_key, AES_KEY_LEN)
    }
}

/// Rpleth specific options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RplethOptions {
    /// CSN length in bits inside the Wiegand frame (0 keeps the whole frame)
    pub csn_length: u32,

    /// CSN offset in bits from the end of the Wiegand frame
    pub csn_offset: u32,
}

/// OSDP specific options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsdpOptions {
    /// Peripheral device address (0x00..=0x7E)
    pub address: u8,
}

impl Default for OsdpOptions {
    fn default() -> Self {
        Self { address: 0x00 }
    }
}

fn decode_key(name: &'static str, raw: &str, expected: usize) -> Result<Vec<u8>> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(Vec::new());
    }

    let key = hex::decode(&compact)
        .map_err(|e| Error::Parse(format!("{} key: {}", name, e)))?;

    if key.len() != expected {
        return Err(Error::InvalidKeyLength {
            name,
            expected,
            actual: key.len(),
        });
    }

    Ok(key)
}

impl ReaderConfig {
    /// Minimal configuration for a reader kind with defaults everywhere else
    pub fn new(kind: ReaderKind, endpoint: EndpointConfig) -> Self {
        Self {
            kind,
            endpoint,
            stidstr: StidStrOptions::default(),
            rpleth: RplethOptions::default(),
            osdp: OsdpOptions::default(),
        }
    }

    /// Check value ranges and kind/endpoint combinations
    pub fn validate(&self) -> Result<()> {
        match &self.endpoint {
            EndpointConfig::Tcp { host, port } => {
                if host.is_empty() {
                    return Err(Error::Validation("tcp endpoint needs a host".into()));
                }
                if *port == 0 {
                    return Err(Error::Validation("tcp port must be non-zero".into()));
                }
            }
            EndpointConfig::Serial { baud_rate, .. } => {
                if self.kind == ReaderKind::Rpleth {
                    return Err(Error::Validation("rpleth readers are reached over tcp".into()));
                }
                if *baud_rate == Some(0) {
                    return Err(Error::Validation("baud_rate must be non-zero".into()));
                }
            }
        }

        if self.kind == ReaderKind::StidStr {
            if self.stidstr.rs485_address > 127 {
                return Err(Error::Validation(format!(
                    "rs485_address must be between 0 and 127, got {}",
                    self.stidstr.rs485_address
                )));
            }
            if self.stidstr.communication_mode.is_reserved() {
                return Err(Error::Validation(
                    "the reserved communication mode cannot be configured".into(),
                ));
            }
            self.stidstr.hmac_key_bytes()?;
            self.stidstr.aes_key_bytes()?;
        }

        if self.kind == ReaderKind::Osdp && self.osdp.address > 0x7E {
            return Err(Error::Validation(format!(
                "osdp address must be between 0 and 126, got {}",
                self.osdp.address
            )));
        }

        if self.kind == ReaderKind::Rpleth && self.rpleth.csn_length.saturating_add(self.rpleth.csn_offset) > 64 {
            return Err(Error::Validation(
                "rpleth csn_length + csn_offset must fit in 64 bits".into(),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", e.message()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    ///
    /// A missing file yields the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Validate every reader entry.
    pub fn validate(&self) -> Result<()> {
        for reader in &self.readers {
            reader.validate()?;
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// - READERLINK_LOG_ENABLED: `0`/`false` disables library logging
    /// - READERLINK_DATA_TIMEOUT_MS: command answer timeout
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("READERLINK_LOG_ENABLED") {
            let enabled = !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off");
            tracing::info!("Overriding log_enabled from environment: {}", enabled);
            self.settings.log_enabled = enabled;
        }

        if let Ok(value) = std::env::var("READERLINK_DATA_TIMEOUT_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    tracing::info!("Overriding data_transport_timeout_ms from environment: {}", ms);
                    self.settings.data_transport_timeout_ms = ms;
                }
                _ => tracing::warn!("Ignoring invalid READERLINK_DATA_TIMEOUT_MS: {:?}", value),
            }
        }
    }
}
