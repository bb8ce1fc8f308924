//! Device status codes surfaced as protocol status errors

use std::fmt;

/// Command type carried in every STid STR message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StidCmdType {
    Reader = 0x00,
    MifareClassic = 0x01,
    Desfire = 0x02,
    MifarePlus = 0x03,
    Reserved = 0x04,
    UltralightC = 0x05,
    RfidChip = 0x06,
}

impl TryFrom<u8> for StidCmdType {
    type Error = u8;
    
    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(Self::Reader),
            0x01 => Ok(Self::MifareClassic),
            0x02 => Ok(Self::Desfire),
            0x03 => Ok(Self::MifarePlus),
            0x04 => Ok(Self::Reserved),
            0x05 => Ok(Self::UltralightC),
            0x06 => Ok(Self::RfidChip),
            other => Err(other),
        }
    }
}

/// Rpleth answer status byte (0x00 is success)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RplethStatus {
    CommandFailure = 0x01,
    BadChecksum = 0x02,
    Timeout = 0x03,
    BadSize = 0x04,
    BadDevice = 0x05,
}

impl RplethStatus {
    /// `None` for success, unknown codes are reported as command failures
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => None,
            0x02 => Some(Self::BadChecksum),
            0x03 => Some(Self::Timeout),
            0x04 => Some(Self::BadSize),
            0x05 => Some(Self::BadDevice),
            _ => Some(Self::CommandFailure),
        }
    }
}

impl fmt::Display for RplethStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::CommandFailure => "command failure",
            Self::BadChecksum => "bad checksum in command",
            Self::Timeout => "timeout",
            Self::BadSize => "bad size of command",
            Self::BadDevice => "bad device in command",
        };
        write!(f, "{} (0x{:02X})", msg, *self as u8)
    }
}

/// STid STR status byte (0x00 is success)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StidStatus {
    AuthenticationError,
    IncorrectData,
    CrcError,
    FrameLength,
    SignatureError,
    Timeout,
    IncorrectCommandCode,
    IncorrectCommandType,
    CommModeNotAllowed,
    IncorrectTag,
    NoSkbTag,
    
    /// Chip-level status for Mifare / DESFire adapters
    Chip {
        cmd_type: StidCmdType,
        code: u8,
    },
    
    /// Code missing from the tables
    Unknown {
        cmd_type: StidCmdType,
        code: u8,
    },
}

impl StidStatus {
    /// Decode a status byte in the context of the adapter's command type
    pub fn from_code(cmd_type: StidCmdType, code: u8) -> Option<Self> {
        if code == 0x00 {
            return None;
        }
        
        let status = match cmd_type {
            StidCmdType::MifareClassic | StidCmdType::Desfire => {
                if chip_description(cmd_type, code).is_some() {
                    Self::Chip { cmd_type, code }
                } else {
                    Self::Unknown { cmd_type, code }
                }
            }
            _ => match code {
                0x01 => Self::AuthenticationError,
                0x02 => Self::IncorrectData,
                0x03 => Self::CrcError,
                0x04 => Self::FrameLength,
                0x05 => Self::SignatureError,
                0x06 => Self::Timeout,
                0x07 => Self::IncorrectCommandCode,
                0x08 => Self::IncorrectCommandType,
                0x11 => Self::CommModeNotAllowed,
                0xF3 => Self::IncorrectTag,
                0xF4 => Self::NoSkbTag,
                _ => Self::Unknown { cmd_type, code },
            },
        };
        
        Some(status)
    }
    
    /// Raw status byte
    pub fn code(&self) -> u8 {
        match self {
            Self::AuthenticationError => 0x01,
            Self::IncorrectData => 0x02,
            Self::CrcError => 0x03,
            Self::FrameLength => 0x04,
            Self::SignatureError => 0x05,
            Self::Timeout => 0x06,
            Self::IncorrectCommandCode => 0x07,
            Self::IncorrectCommandType => 0x08,
            Self::CommModeNotAllowed => 0x11,
            Self::IncorrectTag => 0xF3,
            Self::NoSkbTag => 0xF4,
            Self::Chip { code, .. } | Self::Unknown { code, .. } => *code,
        }
    }
    
    /// Reader documentation text for the code
    pub fn description(&self) -> &'static str {
        match self {
            Self::AuthenticationError => "Authentication error with reader",
            Self::IncorrectData => "Incorrect data setting",
            Self::CrcError => "CRC error on the frame",
            Self::FrameLength => "Incorrect frame length received",
            Self::SignatureError => "Signature error at authentication",
            Self::Timeout => "Time out error",
            Self::IncorrectCommandCode => "Incorrect command code",
            Self::IncorrectCommandType => "Incorrect command type",
            Self::CommModeNotAllowed => "Communication mode not allowed with the reader",
            Self::IncorrectTag => "Incorrect tag",
            Self::NoSkbTag => "No SKB tag",
            Self::Chip { cmd_type, code } => {
                chip_description(*cmd_type, *code).unwrap_or("Unknown error")
            }
            Self::Unknown { .. } => "Unknown error",
        }
    }
}

fn chip_description(cmd_type: StidCmdType, code: u8) -> Option<&'static str> {
    let msg = match (cmd_type, code) {
        (StidCmdType::MifareClassic, 0x01) => "MIFARE time out error",
        (StidCmdType::MifareClassic, 0x02) => "More than one tag in the RFID field",
        (StidCmdType::MifareClassic, 0x03) => "Incorrect tag type",
        (StidCmdType::MifareClassic, 0x05) => "MIFARE frame error",
        (StidCmdType::MifareClassic, 0x06) => "Incorrect settings error",
        (StidCmdType::MifareClassic, 0x13) => "MIFARE data format error",
        (StidCmdType::MifareClassic, 0x14) => "MIFARE authentication error",
        (StidCmdType::MifareClassic, 0x27) => "Invalid command error",
        
        (StidCmdType::Desfire, 0x01) => "More than one tag in the RFID field",
        (StidCmdType::Desfire, 0x02) => "Incorrect tag type",
        (StidCmdType::Desfire, 0x0C) => "No change made to backup files",
        (StidCmdType::Desfire, 0x0E) => "Not enough EEPROM memory",
        (StidCmdType::Desfire, 0x1C) => "Incorrect command code",
        (StidCmdType::Desfire, 0x1E) => "DESFire integrity error",
        (StidCmdType::Desfire, 0x40) => "Key does not exist",
        (StidCmdType::Desfire, 0x7E) => "Incorrect length",
        (StidCmdType::Desfire, 0x9D) => "Permission denied",
        (StidCmdType::Desfire, 0x9E) => "Incorrect setting",
        (StidCmdType::Desfire, 0xA0) => "Application not found",
        (StidCmdType::Desfire, 0xA1) => "Application integrity error",
        (StidCmdType::Desfire, 0xAE) => "Authentication error",
        (StidCmdType::Desfire, 0xAF) => "Frame expected",
        (StidCmdType::Desfire, 0xBE) => "Limit exceeded",
        (StidCmdType::Desfire, 0xC1) => "Card integrity error",
        (StidCmdType::Desfire, 0xCA) => "Command aborted",
        (StidCmdType::Desfire, 0xCD) => "Card disabled",
        (StidCmdType::Desfire, 0xCE) => "Maximum number of applications reached",
        (StidCmdType::Desfire, 0xDE) => "Duplicate AIDs or files",
        (StidCmdType::Desfire, 0xEE) => "EEPROM error",
        (StidCmdType::Desfire, 0xF0) => "File not found",
        (StidCmdType::Desfire, 0xF1) => "File integrity error",
        _ => return None,
    };
    Some(msg)
}

impl fmt::Display for StidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Non-success status reported by a device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("Rpleth status: {0}")]
    Rpleth(RplethStatus),
    
    #[error("STid status: {0}")]
    Stid(StidStatus),
    
    #[error("OSDP NAK: error code 0x{0:02X}")]
    OsdpNak(u8),
    
    #[error("Promag escape status: 0x{0:02X}")]
    Promag(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_rpleth_status_codes() {
        assert_eq!(RplethStatus::from_code(0x00), None);
        assert_eq!(RplethStatus::from_code(0x01), Some(RplethStatus::CommandFailure));
        assert_eq!(RplethStatus::from_code(0x02), Some(RplethStatus::BadChecksum));
        assert_eq!(RplethStatus::from_code(0x03), Some(RplethStatus::Timeout));
        assert_eq!(RplethStatus::from_code(0x04), Some(RplethStatus::BadSize));
        assert_eq!(RplethStatus::from_code(0x05), Some(RplethStatus::BadDevice));
    }
    
    #[test]
    fn test_stid_reader_codes_are_distinct() {
        let codes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x11, 0xF3, 0xF4];
        let decoded: Vec<_> = codes
            .iter()
            .map(|c| StidStatus::from_code(StidCmdType::Reader, *c).unwrap())
            .collect();
        
        for (i, a) in decoded.iter().enumerate() {
            assert_eq!(a.code(), codes[i]);
            for b in decoded.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
    
    #[test]
    fn test_stid_success() {
        assert_eq!(StidStatus::from_code(StidCmdType::Reader, 0x00), None);
    }
    
    #[test]
    fn test_stid_chip_tables() {
        let status = StidStatus::from_code(StidCmdType::Desfire, 0xAE).unwrap();
        assert_eq!(status.description(), "Authentication error");
        
        let status = StidStatus::from_code(StidCmdType::MifareClassic, 0x14).unwrap();
        assert_eq!(status.to_string(), "MIFARE authentication error (0x14)");
        
        let status = StidStatus::from_code(StidCmdType::Reader, 0x99).unwrap();
        assert!(matches!(status, StidStatus::Unknown { code: 0x99, .. }));
    }
    
    #[test]
    fn test_cmd_type_round_trip() {
        assert_eq!(StidCmdType::try_from(0x02), Ok(StidCmdType::Desfire));
        assert_eq!(StidCmdType::try_from(0x09), Err(0x09));
    }
}
