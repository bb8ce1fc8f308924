//! STid PRG adapter
//!
//! ```text
//! [0x02][cmd][p1][p2][len][data (len bytes)][xor][0x03]
//! ```
//!
//! The XOR covers `cmd` through the last data byte. The logical command is
//! `[cmd, p1, p2, len, data...]`.

use bytes::Bytes;
use tracing::trace;

use super::{Answer, CommandAdapter};
use crate::checksum;
use crate::error::{Error, Result};
use crate::framing::{Protocol, ETX, STX};

const HEADER_LEN: usize = 4;

#[derive(Debug, Default)]
pub struct StidPrgAdapter;

impl StidPrgAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl CommandAdapter for StidPrgAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::StidPrg
    }
    
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if command.len() < HEADER_LEN {
            return Err(Error::FrameTooShort {
                expected: HEADER_LEN,
                actual: command.len(),
            });
        }
        
        let declared = command[3] as usize;
        if declared != command.len() - HEADER_LEN {
            return Err(Error::LengthMismatch {
                declared,
                actual: command.len() - HEADER_LEN,
            });
        }
        
        let mut out = Vec::with_capacity(command.len() + 3);
        out.push(STX);
        out.extend_from_slice(command);
        out.push(checksum::xor(command));
        out.push(ETX);
        
        trace!(frame = %hex::encode(&out), "STidPRG command");
        Ok(out)
    }
    
    /// Answer data is the payload after the header, status is the command echo
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        let min = 1 + HEADER_LEN + 2;
        if frame.len() < min {
            return Err(Error::FrameTooShort {
                expected: min,
                actual: frame.len(),
            });
        }
        if frame[0] != STX {
            return Err(Error::BadMarker {
                expected: STX,
                actual: frame[0],
            });
        }
        
        let last = frame[frame.len() - 1];
        if last != ETX {
            return Err(Error::BadTerminator {
                expected: ETX,
                actual: last,
            });
        }
        
        let payload = &frame[1..frame.len() - 2];
        let received = frame[frame.len() - 2];
        let expected = checksum::xor(payload);
        if expected != received {
            return Err(Error::ChecksumMismatch {
                expected: expected as u16,
                received: received as u16,
            });
        }
        
        let declared = payload[3] as usize;
        if declared != payload.len() - HEADER_LEN {
            return Err(Error::LengthMismatch {
                declared,
                actual: payload.len() - HEADER_LEN,
            });
        }
        
        Ok(Answer::new(
            Bytes::copy_from_slice(&payload[HEADER_LEN..]),
            payload[0],
        ))
    }
}
