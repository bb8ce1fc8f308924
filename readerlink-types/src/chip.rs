//! Detected chip description

use std::fmt;

/// Card type used when the reader cannot tell what it saw
pub const GENERIC_TAG: &str = "GenericTag";

/// A chip reported by a reader poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// Card family ("Mifare1K", "DESFireEV1", "GenericTag", ...)
    pub card_type: String,
    
    /// Chip identifier (UID / CSN) as reported by the reader
    pub identifier: Vec<u8>,
}

impl ChipInfo {
    pub fn new(card_type: impl Into<String>, identifier: impl Into<Vec<u8>>) -> Self {
        Self {
            card_type: card_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Chip of unknown family
    pub fn generic(identifier: impl Into<Vec<u8>>) -> Self {
        Self::new(GENERIC_TAG, identifier)
    }

    /// Same physical chip (identifiers compared, not card types)
    pub fn same_chip(&self, other: &ChipInfo) -> bool {
        self.identifier == other.identifier
    }
}

impl fmt::Display for ChipInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.card_type, hex::encode_upper(&self.identifier))
    }
}
