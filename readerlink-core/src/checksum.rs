//! Integrity checks used by the reader protocols
//!
//! - XOR fold (Rpleth, STidPRG)
//! - CRC-CCITT, polynomial 0x1021, MSB first, no reflection, no final XOR
//!   (STid STR seeds it with 0xFFFF, OSDP with 0x1D0F)
//! - 8-bit two's complement sum (OSDP frames without the CRC bit)

use tracing::trace;

/// CRC seed used by STid STR frames
pub const CRC_CCITT_FFFF: u16 = 0xFFFF;

/// CRC seed used by OSDP frames
pub const CRC_CCITT_1D0F: u16 = 0x1D0F;

const CRC_POLY: u16 = 0x1021;

/// XOR of every byte
///
/// # Examples
///
/// ```
/// use readerlink_core::checksum;
///
/// assert_eq!(checksum::xor(&[0x01, 0x04, 0x02]), 0x07);
/// ```
pub fn xor(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// CRC-CCITT over `data` starting from `init`
///
/// # Examples
///
/// ```
/// use readerlink_core::checksum::{crc_ccitt, CRC_CCITT_FFFF};
///
/// assert_eq!(crc_ccitt(CRC_CCITT_FFFF, b"123456789"), 0x29B1);
/// ```
pub fn crc_ccitt(init: u16, data: &[u8]) -> u16 {
    let mut crc = init;
    
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC_POLY
            } else {
                crc << 1
            };
        }
    }
    
    trace!(
        init = format!("0x{:04X}", init),
        len = data.len(),
        crc = format!("0x{:04X}", crc),
        "Calculated CRC-CCITT"
    );
    
    crc
}

/// Two's complement of the byte sum, so that the sum of frame and checksum is zero
pub fn sum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}
