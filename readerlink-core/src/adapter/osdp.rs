//! OSDP adapter
//!
//! ```text
//! [0x53][addr][len_lo][len_hi][ctrl][code][data...][crc_lo][crc_hi]
//! ```
//!
//! `len` covers the whole frame. `ctrl` carries the sequence number in its
//! low two bits, 0x04 when the frame ends with a CRC instead of a 1-byte
//! checksum, and 0x08 when a security block follows. Replies set bit 7 of
//! the address.

use bytes::Bytes;
use tracing::trace;

use super::{Answer, CommandAdapter};
use crate::checksum::{self, CRC_CCITT_1D0F};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::framing::{Protocol, OSDP_MAX_FRAME, OSDP_SOM};
use crate::status::StatusError;

const CTRL_SEQUENCE: u8 = 0x03;
const CTRL_CRC: u8 = 0x04;
const CTRL_SCB: u8 = 0x08;

/// Reply address bit
pub const REPLY_BIT: u8 = 0x80;

pub const CMD_POLL: u8 = 0x60;
pub const CMD_ID: u8 = 0x61;

pub const REPLY_ACK: u8 = 0x40;
pub const REPLY_NAK: u8 = 0x41;
pub const REPLY_PDID: u8 = 0x45;
pub const REPLY_LSTATR: u8 = 0x48;
pub const REPLY_RAW: u8 = 0x50;
pub const REPLY_FMT: u8 = 0x51;
pub const REPLY_BUSY: u8 = 0x79;
pub const REPLY_XRD: u8 = 0xB1;

/// Decoded peripheral reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdpReply {
    pub address: u8,
    pub sequence: u8,
    pub code: u8,
    pub data: Bytes,
}

#[derive(Debug)]
pub struct OsdpAdapter {
    address: u8,
    sequence: u8,
}

impl OsdpAdapter {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            sequence: 0,
        }
    }
    
    pub fn address(&self) -> u8 {
        self.address
    }
    
    /// Sequence number of the next command
    pub fn sequence(&self) -> u8 {
        self.sequence
    }
    
    /// 0 only once, then 1, 2, 3, 1, ...
    fn advance_sequence(&mut self) {
        self.sequence = if self.sequence >= 3 { 1 } else { self.sequence + 1 };
    }
    
    /// Decode a reply frame
    pub fn parse_reply(&self, frame: &[u8]) -> Result<OsdpReply> {
        let mut cursor = ByteCursor::new(frame);
        let som = cursor.read_u8()?;
        if som != OSDP_SOM {
            return Err(Error::BadMarker {
                expected: OSDP_SOM,
                actual: som,
            });
        }
        
        let address = cursor.read_u8()?;
        let declared = cursor.read_u16_le()? as usize;
        if declared != frame.len() {
            return Err(Error::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }
        
        let ctrl = cursor.read_u8()?;
        let trailer = if ctrl & CTRL_CRC != 0 { 2 } else { 1 };
        if frame.len() < 6 + trailer {
            return Err(Error::FrameTooShort {
                expected: 6 + trailer,
                actual: frame.len(),
            });
        }
        
        let (body, check) = frame.split_at(frame.len() - trailer);
        if trailer == 2 {
            let expected = checksum::crc_ccitt(CRC_CCITT_1D0F, body);
            let received = u16::from_le_bytes([check[0], check[1]]);
            if expected != received {
                return Err(Error::ChecksumMismatch { expected, received });
            }
        } else {
            let expected = checksum::sum8(body);
            if expected != check[0] {
                return Err(Error::ChecksumMismatch {
                    expected: expected as u16,
                    received: check[0] as u16,
                });
            }
        }
        
        if address != self.address | REPLY_BIT {
            return Err(Error::UnexpectedAnswer(format!(
                "reply address 0x{:02X}, expected 0x{:02X}",
                address,
                self.address | REPLY_BIT
            )));
        }
        
        let mut cursor = ByteCursor::new(&body[5..]);
        if ctrl & CTRL_SCB != 0 {
            let scb_len = cursor.read_u8()? as usize;
            cursor.take(scb_len.saturating_sub(1))?;
        }
        let code = cursor.read_u8()?;
        
        Ok(OsdpReply {
            address,
            sequence: ctrl & CTRL_SEQUENCE,
            code,
            data: Bytes::copy_from_slice(cursor.rest()),
        })
    }
}

impl CommandAdapter for OsdpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Osdp
    }
    
    /// `command` is `[code, data...]`
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if command.is_empty() {
            return Err(Error::FrameTooShort {
                expected: 1,
                actual: 0,
            });
        }
        
        let total = 5 + command.len() + 2;
        if total > OSDP_MAX_FRAME {
            return Err(Error::PayloadTooLarge {
                size: total,
                max: OSDP_MAX_FRAME,
            });
        }
        
        let mut frame = Vec::with_capacity(total);
        frame.push(OSDP_SOM);
        frame.push(self.address);
        frame.extend_from_slice(&(total as u16).to_le_bytes());
        frame.push(self.sequence | CTRL_CRC);
        frame.extend_from_slice(command);
        let crc = checksum::crc_ccitt(CRC_CCITT_1D0F, &frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        
        trace!(seq = self.sequence, frame = %hex::encode(&frame), "OSDP command");
        Ok(frame)
    }
    
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        let reply = self.parse_reply(frame)?;
        
        if reply.sequence != self.sequence {
            return Err(Error::UnexpectedAnswer(format!(
                "reply sequence {}, expected {}",
                reply.sequence, self.sequence
            )));
        }
        self.advance_sequence();
        
        if reply.code == REPLY_NAK {
            let reason = reply.data.first().copied().unwrap_or(0);
            return Err(StatusError::OsdpNak(reason).into());
        }
        
        Ok(Answer::new(reply.data, reply.code))
    }
}
