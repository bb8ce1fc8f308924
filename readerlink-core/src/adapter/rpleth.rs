//! Rpleth (TCP) adapter
//!
//! ```text
//! command: [device][command][len][data...][xor]
//! answer:  [status][device][command][len][data...][xor]
//! ```

use bytes::Bytes;
use tracing::trace;

use super::{Answer, CommandAdapter};
use crate::checksum;
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::framing::Protocol;
use crate::status::{RplethStatus, StatusError};

/// Rpleth reader itself
pub const DEVICE_RPLETH: u8 = 0x00;

/// HID reader behind the Rpleth box
pub const DEVICE_HID: u8 = 0x01;

/// HID no-op, used as ping
pub const HID_NOP: u8 = 0x03;

/// HID badge, pushed unsolicited when a card is read
pub const HID_BADGE: u8 = 0x04;

/// One decoded Rpleth frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RplethFrame {
    pub status: u8,
    pub device: u8,
    pub command: u8,
    pub data: Bytes,
}

impl RplethFrame {
    /// Whether this is a pushed HID badge
    pub fn is_badge(&self) -> bool {
        self.device == DEVICE_HID && self.command == HID_BADGE
    }
}

#[derive(Debug, Default)]
pub struct RplethAdapter {
    last: Option<(u8, u8)>,
}

impl RplethAdapter {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Build the logical command `[device, command, len, data]`
    pub fn command(device: u8, command: u8, data: &[u8]) -> Result<Vec<u8>> {
        let len = u8::try_from(data.len()).map_err(|_| Error::PayloadTooLarge {
            size: data.len(),
            max: u8::MAX as usize,
        })?;
        
        let mut cmd = Vec::with_capacity(3 + data.len());
        cmd.extend_from_slice(&[device, command, len]);
        cmd.extend_from_slice(data);
        Ok(cmd)
    }
    
    /// Decode a frame without matching it to a command
    ///
    /// Checks the length, the XOR and the status byte.
    pub fn parse_frame(frame: &[u8]) -> Result<RplethFrame> {
        if frame.len() < 5 {
            return Err(Error::FrameTooShort {
                expected: 5,
                actual: frame.len(),
            });
        }
        
        let (body, received) = frame.split_at(frame.len() - 1);
        let expected = checksum::xor(body);
        if expected != received[0] {
            return Err(Error::ChecksumMismatch {
                expected: expected as u16,
                received: received[0] as u16,
            });
        }
        
        let mut cursor = ByteCursor::new(body);
        let status = cursor.read_u8()?;
        let device = cursor.read_u8()?;
        let command = cursor.read_u8()?;
        let len = cursor.read_u8()? as usize;
        if cursor.remaining() != len {
            return Err(Error::LengthMismatch {
                declared: len,
                actual: cursor.remaining(),
            });
        }
        
        if let Some(status) = RplethStatus::from_code(status) {
            return Err(StatusError::Rpleth(status).into());
        }
        
        Ok(RplethFrame {
            status,
            device,
            command,
            data: Bytes::copy_from_slice(cursor.rest()),
        })
    }
}

impl CommandAdapter for RplethAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Rpleth
    }
    
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if command.len() < 3 {
            return Err(Error::FrameTooShort {
                expected: 3,
                actual: command.len(),
            });
        }
        
        let declared = command[2] as usize;
        if declared != command.len() - 3 {
            return Err(Error::LengthMismatch {
                declared,
                actual: command.len() - 3,
            });
        }
        
        let mut out = command.to_vec();
        out.push(checksum::xor(command));
        self.last = Some((command[0], command[1]));
        
        trace!(cmd = %hex::encode(&out), "Rpleth command");
        Ok(out)
    }
    
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        let decoded = Self::parse_frame(frame)?;
        
        if let Some((device, command)) = self.last {
            if decoded.device != device || decoded.command != command {
                return Err(Error::UnexpectedAnswer(format!(
                    "answer is for device 0x{:02X} command 0x{:02X}, sent device 0x{:02X} command 0x{:02X}",
                    decoded.device, decoded.command, device, command
                )));
            }
        }
        
        Ok(Answer::new(decoded.data, decoded.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    
    #[test]
    fn test_command_encoding() {
        let mut adapter = RplethAdapter::new();
        let cmd = RplethAdapter::command(DEVICE_HID, HID_NOP, &[]).unwrap();
        assert_eq!(adapter.adapt_command(&cmd).unwrap(), vec![0x01, 0x03, 0x00, 0x02]);
    }
    
    #[test]
    fn test_command_length_checked() {
        let mut adapter = RplethAdapter::new();
        assert!(matches!(
            adapter.adapt_command(&[0x01, 0x03, 0x02, 0xAA]),
            Err(Error::LengthMismatch { declared: 2, actual: 1 })
        ));
        assert!(matches!(
            RplethAdapter::command(0x00, 0x01, &[0u8; 300]),
            Err(Error::PayloadTooLarge { size: 300, max: 255 })
        ));
    }
    
    #[test]
    fn test_only_matching_xor_is_accepted() {
        let good = 0x00 ^ 0x01 ^ 0x04 ^ 0x02 ^ 0xAA ^ 0xBB;
        
        for x in 0u8..=255 {
            let frame = [0x00, 0x01, 0x04, 0x02, 0xAA, 0xBB, x];
            let result = RplethAdapter::parse_frame(&frame);
            if x == good {
                assert_eq!(result.unwrap().data, Bytes::from_static(&[0xAA, 0xBB]));
            } else {
                assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
            }
        }
    }
    
    #[test]
    fn test_status_codes() {
        for code in 1u8..=5 {
            let mut frame = vec![code, 0x01, 0x03, 0x00];
            frame.push(checksum::xor(&frame));
            
            let err = RplethAdapter::parse_frame(&frame).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::ProtocolStatus);
        }
    }
    
    #[test]
    fn test_answer_must_echo_command() {
        let mut adapter = RplethAdapter::new();
        adapter
            .adapt_command(&RplethAdapter::command(DEVICE_HID, HID_NOP, &[]).unwrap())
            .unwrap();
        
        let mut other = vec![0x00, DEVICE_RPLETH, 0x07, 0x00];
        other.push(checksum::xor(&other));
        assert!(matches!(adapter.adapt_answer(&other), Err(Error::UnexpectedAnswer(_))));
        
        let mut echo = vec![0x00, DEVICE_HID, HID_NOP, 0x01, 0x42];
        echo.push(checksum::xor(&echo));
        assert_eq!(adapter.adapt_answer(&echo).unwrap(), Answer::new(vec![0x42], 0));
    }
    
    #[test]
    fn test_badge_frame() {
        let mut frame = vec![0x00, DEVICE_HID, HID_BADGE, 0x03, 0x12, 0x34, 0x56];
        frame.push(checksum::xor(&frame));
        
        let decoded = RplethAdapter::parse_frame(&frame).unwrap();
        assert!(decoded.is_badge());
        assert_eq!(&decoded.data[..], &[0x12, 0x34, 0x56]);
    }
}
