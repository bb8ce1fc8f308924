//! STid STR line options: communication mode, wire type and baud codes

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

bitflags! {
    /// Protection applied to every command frame after authentication.
    ///
    /// The empty set is plain communication. `RESERVED` is only ever set
    /// while handshake frames are on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommunicationMode: u8 {
        const SIGNED = 0x01;
        const CIPHERED = 0x02;
        const RESERVED = 0x04;
    }
}

impl CommunicationMode {
    /// No signature, no encryption
    pub const PLAIN: Self = Self::empty();

    /// Check whether frames carry an HMAC tag
    pub fn is_signed(self) -> bool {
        self.contains(Self::SIGNED)
    }

    /// Check whether frames are AES ciphered
    pub fn is_ciphered(self) -> bool {
        self.contains(Self::CIPHERED)
    }

    /// Check whether a handshake is currently in flight
    pub fn is_reserved(self) -> bool {
        self.contains(Self::RESERVED)
    }

    /// Wire value sent in the frame header
    pub fn as_byte(self) -> u8 {
        self.bits()
    }
}

impl Default for CommunicationMode {
    fn default() -> Self {
        Self::PLAIN
    }
}

impl fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reserved() {
            return f.write_str("reserved");
        }
        match (self.is_signed(), self.is_ciphered()) {
            (false, false) => f.write_str("plain"),
            (true, false) => f.write_str("signed"),
            (false, true) => f.write_str("ciphered"),
            (true, true) => f.write_str("signed+ciphered"),
        }
    }
}

impl FromStr for CommunicationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut mode = Self::PLAIN;
        for part in s.split(['+', '|', ',']) {
            match part.trim().to_ascii_lowercase().as_str() {
                "plain" | "" => {}
                "signed" | "hmac" => mode |= Self::SIGNED,
                "ciphered" | "aes" => mode |= Self::CIPHERED,
                _ => return Err(Error::UnknownMode(s.to_string())),
            }
        }
        Ok(mode)
    }
}

impl Serialize for CommunicationMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CommunicationMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Physical line of an STid STR reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationType {
    #[default]
    Rs232 = 0x00,
    Rs485 = 0x01,
}

impl CommunicationType {
    pub fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0x01 {
            Self::Rs485
        } else {
            Self::Rs232
        }
    }
}

/// Baud rates understood by the STid STR `set_baud_rate` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StidBaudRate {
    B9600 = 0x00,
    B19200 = 0x01,
    B38400 = 0x02,
    B57600 = 0x03,
    B115200 = 0x04,
}

impl StidBaudRate {
    /// Rate in bits per second
    pub fn bps(self) -> u32 {
        match self {
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
        }
    }

    /// Decode the code reported by `GetInfos`
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::B9600),
            0x01 => Some(Self::B19200),
            0x02 => Some(Self::B38400),
            0x03 => Some(Self::B57600),
            0x04 => Some(Self::B115200),
            _ => None,
        }
    }
}

impl TryFrom<u32> for StidBaudRate {
    type Error = Error;

    fn try_from(bps: u32) -> Result<Self> {
        match bps {
            9600 => Ok(Self::B9600),
            19200 => Ok(Self::B19200),
            38400 => Ok(Self::B38400),
            57600 => Ok(Self::B57600),
            115200 => Ok(Self::B115200),
            other => Err(Error::UnsupportedBaudRate(other)),
        }
    }
}
