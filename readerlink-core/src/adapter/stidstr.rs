//! STid STR adapter
//!
//! ```text
//! frame:   [0x02][size:2][ctrl1][mode][message (size bytes)][crc:2]
//! message: [0x00][type][code:2][0xAA][0x55][len:2][data...]
//!          then AES-CBC(message, IV) || IV   when ciphered
//!          then || HMAC-SHA1(message)[..10]  when signed
//! answer:  [ack:2][len:2][data...][status type][status]
//! ```
//!
//! Multi-byte fields are big-endian. The CRC is CRC-CCITT seeded with
//! 0xFFFF over everything after the start byte.

use bytes::Bytes;
use readerlink_types::{CommunicationMode, CommunicationType};
use tracing::trace;

use super::{Answer, CommandAdapter};
use crate::checksum::{self, CRC_CCITT_FFFF};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::framing::{Protocol, STX};
use crate::secure::{self, SessionKeys, SessionState, SharedMode, BLOCK_SIZE, SIGNATURE_LEN};
use crate::status::{StatusError, StidCmdType, StidStatus};

/// Frame overhead around the message
const FRAME_OVERHEAD: usize = 7;

pub struct StidStrAdapter {
    cmd_type: StidCmdType,
    comm_type: CommunicationType,
    rs485_address: u8,
    mode: SharedMode,
    keys: SessionKeys,
    state: SessionState,
    last_iv: Option<[u8; BLOCK_SIZE]>,
    last_code: u16,
}

impl StidStrAdapter {
    /// Reader-level adapter bound to a shared mode cell
    pub fn new(comm_type: CommunicationType, rs485_address: u8, mode: SharedMode) -> Self {
        Self {
            cmd_type: StidCmdType::Reader,
            comm_type,
            rs485_address,
            mode,
            keys: SessionKeys::default(),
            state: SessionState::Unauthenticated,
            last_iv: None,
            last_code: 0,
        }
    }
    
    /// Logical command `[code_hi, code_lo, data...]`
    pub fn command(code: u16, data: &[u8]) -> Vec<u8> {
        let mut cmd = Vec::with_capacity(2 + data.len());
        cmd.extend_from_slice(&code.to_be_bytes());
        cmd.extend_from_slice(data);
        cmd
    }
    
    pub fn cmd_type(&self) -> StidCmdType {
        self.cmd_type
    }
    
    pub fn communication_mode(&self) -> CommunicationMode {
        self.mode.get()
    }
    
    /// Shared mode cell, for overriding it during a handshake
    pub fn mode_cell(&self) -> &SharedMode {
        &self.mode
    }
    
    pub fn session_keys(&self) -> &SessionKeys {
        &self.keys
    }
    
    pub fn session_keys_mut(&mut self) -> &mut SessionKeys {
        &mut self.keys
    }
    
    pub fn session_state(&self) -> SessionState {
        self.state
    }
    
    pub fn set_session_state(&mut self, state: SessionState) {
        self.state = state;
    }
    
    /// IV used by the next ciphered command
    pub fn last_iv(&self) -> Option<&[u8; BLOCK_SIZE]> {
        self.last_iv.as_ref()
    }
    
    /// Forget the session keys and the IV chain
    pub fn reset_session(&mut self) {
        self.keys.clear();
        self.last_iv = None;
        self.state = SessionState::Unauthenticated;
    }
    
    fn ctrl1(&self) -> u8 {
        match self.comm_type {
            CommunicationType::Rs232 => CommunicationType::Rs232 as u8,
            CommunicationType::Rs485 => CommunicationType::Rs485 as u8 | (self.rs485_address << 1),
        }
    }
    
    fn build_message(&mut self, code: u16, data: &[u8], mode: CommunicationMode) -> Result<Vec<u8>> {
        let dlen = u16::try_from(data.len()).map_err(|_| Error::PayloadTooLarge {
            size: data.len(),
            max: u16::MAX as usize,
        })?;
        
        let mut msg = Vec::with_capacity(8 + data.len() + 2 * BLOCK_SIZE + SIGNATURE_LEN);
        msg.push(0x00);
        msg.push(self.cmd_type as u8);
        msg.extend_from_slice(&code.to_be_bytes());
        msg.extend_from_slice(&[0xAA, 0x55]);
        msg.extend_from_slice(&dlen.to_be_bytes());
        msg.extend_from_slice(data);
        
        if mode.is_ciphered() {
            let iv = match self.last_iv {
                Some(iv) => iv,
                None => secure::fresh_nonce()?,
            };
            
            let mut ciphered = secure::cbc_encrypt(self.keys.aes()?, &iv, &msg)?;
            if let Some(last) = last_block(&ciphered) {
                self.last_iv = Some(last);
            }
            ciphered.extend_from_slice(&iv);
            msg = ciphered;
        }
        
        if mode.is_signed() {
            let signature = secure::sign(self.keys.hmac()?, &msg)?;
            msg.extend_from_slice(&signature);
        }
        
        Ok(msg)
    }
    
    fn open_message(&mut self, message: &[u8], mode: CommunicationMode) -> Result<Answer> {
        let mut body = message;
        
        if mode.is_signed() {
            if body.len() < SIGNATURE_LEN {
                return Err(Error::FrameTooShort {
                    expected: SIGNATURE_LEN,
                    actual: body.len(),
                });
            }
            let (signed, signature) = body.split_at(body.len() - SIGNATURE_LEN);
            if !secure::verify(self.keys.hmac()?, signed, signature)? {
                return Err(Error::SignatureMismatch);
            }
            body = signed;
        }
        
        let plain;
        if mode.is_ciphered() {
            if body.len() < BLOCK_SIZE {
                return Err(Error::FrameTooShort {
                    expected: BLOCK_SIZE,
                    actual: body.len(),
                });
            }
            let (ciphered, iv) = body.split_at(body.len() - BLOCK_SIZE);
            plain = secure::cbc_decrypt(self.keys.aes()?, iv, ciphered)?;
            if let Some(last) = last_block(ciphered) {
                self.last_iv = Some(last);
            }
            body = &plain;
        }
        
        let mut cursor = ByteCursor::new(body);
        let ack = cursor.read_u16_be()?;
        if ack != self.last_code {
            return Err(Error::UnexpectedAnswer(format!(
                "acknowledged command 0x{:04X}, last command was 0x{:04X}",
                ack, self.last_code
            )));
        }
        
        let len = cursor.read_u16_be()? as usize;
        let data = cursor.take(len)?;
        let status_type = cursor.read_u8()?;
        if status_type != self.cmd_type as u8 {
            return Err(Error::UnexpectedAnswer(format!(
                "status type 0x{:02X} does not match adapter type 0x{:02X}",
                status_type, self.cmd_type as u8
            )));
        }
        
        let status = cursor.read_u8()?;
        if let Some(status) = StidStatus::from_code(self.cmd_type, status) {
            return Err(StatusError::Stid(status).into());
        }
        
        Ok(Answer::new(Bytes::copy_from_slice(data), status))
    }
}

fn last_block(data: &[u8]) -> Option<[u8; BLOCK_SIZE]> {
    data.len()
        .checked_sub(BLOCK_SIZE)
        .and_then(|start| data[start..].try_into().ok())
}

impl CommandAdapter for StidStrAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::StidStr
    }
    
    fn adapt_command(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if command.len() < 2 {
            return Err(Error::FrameTooShort {
                expected: 2,
                actual: command.len(),
            });
        }
        
        let code = u16::from_be_bytes([command[0], command[1]]);
        let mode = self.mode.get();
        self.last_code = code;
        
        let message = self.build_message(code, &command[2..], mode)?;
        let size = u16::try_from(message.len()).map_err(|_| Error::PayloadTooLarge {
            size: message.len(),
            max: u16::MAX as usize,
        })?;
        
        let mut frame = Vec::with_capacity(message.len() + FRAME_OVERHEAD);
        frame.push(STX);
        frame.extend_from_slice(&size.to_be_bytes());
        frame.push(self.ctrl1());
        frame.push(mode.as_byte());
        frame.extend_from_slice(&message);
        let crc = checksum::crc_ccitt(CRC_CCITT_FFFF, &frame[1..]);
        frame.extend_from_slice(&crc.to_be_bytes());
        
        trace!(code = format!("0x{:04X}", code), %mode, frame = %hex::encode(&frame), "STid STR command");
        Ok(frame)
    }
    
    fn adapt_answer(&mut self, frame: &[u8]) -> Result<Answer> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(Error::FrameTooShort {
                expected: FRAME_OVERHEAD,
                actual: frame.len(),
            });
        }
        if frame[0] != STX {
            return Err(Error::BadMarker {
                expected: STX,
                actual: frame[0],
            });
        }
        
        let size = u16::from_be_bytes([frame[1], frame[2]]) as usize;
        if size + FRAME_OVERHEAD > frame.len() {
            return Err(Error::LengthMismatch {
                declared: size,
                actual: frame.len() - FRAME_OVERHEAD,
            });
        }
        
        let comm_type = CommunicationType::from_bit(frame[3]);
        if comm_type != self.comm_type {
            return Err(Error::UnexpectedAnswer(format!(
                "communication type {:?} does not match {:?}",
                comm_type, self.comm_type
            )));
        }
        if comm_type == CommunicationType::Rs485 {
            let address = (frame[3] & 0xFE) >> 1;
            if address != self.rs485_address {
                return Err(Error::UnexpectedAnswer(format!(
                    "RS485 address {} does not match {}",
                    address, self.rs485_address
                )));
            }
        }
        
        let mode = self.mode.get();
        if !mode.is_reserved() && frame[4] != mode.as_byte() {
            return Err(Error::UnexpectedAnswer(format!(
                "communication mode 0x{:02X} does not match {}",
                frame[4], mode
            )));
        }
        
        let expected = checksum::crc_ccitt(CRC_CCITT_FFFF, &frame[1..5 + size]);
        let received = u16::from_be_bytes([frame[5 + size], frame[6 + size]]);
        if expected != received {
            return Err(Error::ChecksumMismatch { expected, received });
        }
        
        trace!(frame = %hex::encode(frame), "STid STR answer");
        self.open_message(&frame[5..5 + size], mode)
    }
}
