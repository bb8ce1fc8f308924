//! Bounds-checked reads over an answer payload

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Forward-only reader over a byte slice
///
/// Every read checks the remaining length and fails with
/// [`Error::FrameTooShort`] instead of panicking.
///
/// # Examples
///
/// ```
/// use readerlink_core::cursor::ByteCursor;
///
/// let mut cursor = ByteCursor::new(&[0x01, 0x00, 0x0A, 0xFF]);
/// assert_eq!(cursor.read_u8().unwrap(), 0x01);
/// assert_eq!(cursor.read_u16_be().unwrap(), 0x000A);
/// assert_eq!(cursor.rest(), &[0xFF]);
/// ```
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
    
    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
    
    /// Current offset from the start of the slice
    pub fn position(&self) -> usize {
        self.pos
    }
    
    /// Consume `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::FrameTooShort {
                expected: self.pos + n,
                actual: self.data.len(),
            });
        }
        
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
    
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }
    
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }
    
    /// Consume everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}
