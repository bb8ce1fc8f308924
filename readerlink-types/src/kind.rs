//! Reader families

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reader family, the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderKind {
    StidStr,
    Rpleth,
    Osdp,
    AxessTmc13,
    StidPrg,
    Promag,
}

impl ReaderKind {
    pub const ALL: [ReaderKind; 6] = [
        ReaderKind::StidStr,
        ReaderKind::Rpleth,
        ReaderKind::Osdp,
        ReaderKind::AxessTmc13,
        ReaderKind::StidPrg,
        ReaderKind::Promag,
    ];

    /// Human readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::StidStr => "STidSTR",
            Self::Rpleth => "Rpleth",
            Self::Osdp => "OSDP",
            Self::AxessTmc13 => "AxessTMC13",
            Self::StidPrg => "STidPRG",
            Self::Promag => "Promag",
        }
    }

    /// Default line speed for serial readers
    pub fn default_baud_rate(&self) -> u32 {
        match self {
            Self::StidStr => 38400,
            Self::AxessTmc13 => 57600,
            Self::StidPrg | Self::Promag | Self::Osdp | Self::Rpleth => 9600,
        }
    }
}

impl fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
