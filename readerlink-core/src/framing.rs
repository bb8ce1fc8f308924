//! Frame extraction from a noisy byte stream
//!
//! Each protocol has a pure extractor that looks at the head of the
//! accumulated bytes and reports whether a complete frame is there, more
//! bytes are needed, or a prefix is noise. [`FrameBuffer`] owns the
//! accumulated bytes and applies those decisions.
//!
//! Extractors only bound frames. Checksums, terminators and signatures are
//! verified by the matching [`CommandAdapter`](crate::adapter::CommandAdapter).

use bytes::{Buf, Bytes, BytesMut};
use readerlink_types::ReaderKind;
use tracing::{debug, warn};

/// Start of an STid STR or STidPRG frame
pub const STX: u8 = 0x02;

/// End of an STidPRG frame
pub const ETX: u8 = 0x03;

/// Promag "no tag" answer
pub const BEL: u8 = 0x07;

/// Carriage return, Axess and Promag terminator
pub const CR: u8 = 0x0D;

/// Promag error answer
pub const ESC: u8 = 0x1B;

/// Start of an OSDP frame
pub const OSDP_SOM: u8 = 0x53;

/// Smallest OSDP frame (1-byte checksum, no data)
pub const OSDP_MIN_FRAME: usize = 7;

/// Largest OSDP frame we accept
pub const OSDP_MAX_FRAME: usize = 1440;

/// Largest STid STR frame: a 16-bit size plus 7 framing bytes
pub const STIDSTR_MAX_FRAME: usize = u16::MAX as usize + 7;

/// Wire protocol spoken by a reader family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Rpleth,
    StidStr,
    Osdp,
    AxessTmc13,
    StidPrg,
    Promag,
}

impl From<ReaderKind> for Protocol {
    fn from(kind: ReaderKind) -> Self {
        match kind {
            ReaderKind::StidStr => Self::StidStr,
            ReaderKind::Rpleth => Self::Rpleth,
            ReaderKind::Osdp => Self::Osdp,
            ReaderKind::AxessTmc13 => Self::AxessTmc13,
            ReaderKind::StidPrg => Self::StidPrg,
            ReaderKind::Promag => Self::Promag,
        }
    }
}

/// Outcome of looking at the head of the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// No complete frame yet, keep buffering
    Incomplete,
    
    /// The first `n` bytes are one frame
    Frame(usize),
    
    /// The first `n` bytes are noise
    Discard(usize),
}

/// Decide what the head of `buf` is for `protocol`
///
/// Pure and idempotent: calling it again on the same bytes gives the same
/// answer. `Discard` always carries a non-zero count.
///
/// # Examples
///
/// ```
/// use readerlink_core::framing::{extract, Extraction, Protocol};
///
/// let frame = [0x00, 0x01, 0x04, 0x02, 0xAA, 0xBB, 0x00];
/// assert_eq!(extract(Protocol::Rpleth, &frame), Extraction::Frame(7));
/// assert_eq!(extract(Protocol::Rpleth, &frame[..6]), Extraction::Incomplete);
/// ```
pub fn extract(protocol: Protocol, buf: &[u8]) -> Extraction {
    if buf.is_empty() {
        return Extraction::Incomplete;
    }
    
    match protocol {
        Protocol::Rpleth => extract_rpleth(buf),
        Protocol::StidStr => extract_stidstr(buf),
        Protocol::Osdp => extract_osdp(buf),
        Protocol::AxessTmc13 => extract_terminated(buf),
        Protocol::StidPrg => extract_stidprg(buf),
        Protocol::Promag => extract_promag(buf),
    }
}

/// Bytes before the next `marker`, or the whole buffer
fn discard_until(buf: &[u8], marker: u8) -> Extraction {
    let n = buf
        .iter()
        .skip(1)
        .position(|&b| b == marker)
        .map(|p| p + 1)
        .unwrap_or(buf.len());
    Extraction::Discard(n)
}

fn complete_at(buf: &[u8], total: usize) -> Extraction {
    if buf.len() >= total {
        Extraction::Frame(total)
    } else {
        Extraction::Incomplete
    }
}

// [status][device][command][L][L bytes][xor]
fn extract_rpleth(buf: &[u8]) -> Extraction {
    if buf.len() < 4 {
        return Extraction::Incomplete;
    }
    complete_at(buf, 4 + buf[3] as usize + 1)
}

// [0x02][size_hi][size_lo][ctrl][mode][size bytes][crc_hi][crc_lo]
fn extract_stidstr(buf: &[u8]) -> Extraction {
    if buf[0] != STX {
        return discard_until(buf, STX);
    }
    if buf.len() < 7 {
        return Extraction::Incomplete;
    }
    let size = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    complete_at(buf, size + 7)
}

// [0x53][addr][len_lo][len_hi][ctrl]... with len covering the whole frame
fn extract_osdp(buf: &[u8]) -> Extraction {
    if buf[0] != OSDP_SOM {
        return discard_until(buf, OSDP_SOM);
    }
    if buf.len() < 6 {
        return Extraction::Incomplete;
    }
    let total = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    if !(OSDP_MIN_FRAME..=OSDP_MAX_FRAME).contains(&total) {
        // 0x53 inside noise, not a real start of message
        return Extraction::Discard(1);
    }
    complete_at(buf, total)
}

fn extract_terminated(buf: &[u8]) -> Extraction {
    match buf.iter().position(|&b| b == CR) {
        Some(pos) => Extraction::Frame(pos + 1),
        None => Extraction::Incomplete,
    }
}

// [0x02][cmd][p1][p2][len][len bytes][xor][0x03]
fn extract_stidprg(buf: &[u8]) -> Extraction {
    if buf[0] != STX {
        return discard_until(buf, STX);
    }
    if buf.len() < 5 {
        return Extraction::Incomplete;
    }
    complete_at(buf, 1 + 4 + buf[4] as usize + 2)
}

/// Total frame size announced by a length header at the head of `buf`
///
/// `None` for terminator-delimited protocols, when the header is not
/// complete yet, or when the head is not a start marker.
fn declared_len(protocol: Protocol, buf: &[u8]) -> Option<usize> {
    match protocol {
        Protocol::Rpleth if buf.len() >= 4 => Some(4 + buf[3] as usize + 1),
        Protocol::StidStr if buf.len() >= 3 && buf[0] == STX => {
            Some(u16::from_be_bytes([buf[1], buf[2]]) as usize + 7)
        }
        Protocol::Osdp if buf.len() >= 4 && buf[0] == OSDP_SOM => {
            Some(u16::from_le_bytes([buf[2], buf[3]]) as usize)
        }
        Protocol::StidPrg if buf.len() >= 5 && buf[0] == STX => Some(1 + 4 + buf[4] as usize + 2),
        _ => None,
    }
}

fn extract_promag(buf: &[u8]) -> Extraction {
    match buf[0] {
        ESC | BEL => Extraction::Frame(buf.len()),
        STX => extract_terminated(buf),
        _ => Extraction::Discard(buf.len()),
    }
}

/// Bounded accumulator of received bytes
///
/// # Examples
///
/// ```
/// use readerlink_core::framing::{FrameBuffer, Protocol};
///
/// let mut buffer = FrameBuffer::new();
/// buffer.extend(b"12345\r678");
///
/// let frame = buffer.next_frame(Protocol::AxessTmc13).unwrap();
/// assert_eq!(&frame[..], b"12345\r");
/// assert_eq!(buffer.len(), 3);
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl FrameBuffer {
    /// Default bound on buffered bytes, large enough for any STid STR frame
    pub const DEFAULT_CAPACITY: usize = STIDSTR_MAX_FRAME;
    
    /// Bytes reserved up front; the buffer grows up to its capacity
    const INITIAL_RESERVE: usize = 4096;
    
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
    
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity.min(Self::INITIAL_RESERVE)),
            capacity,
        }
    }
    
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    
    /// Append received bytes
    ///
    /// When the append would exceed the capacity the buffered bytes are
    /// dropped first. Input larger than the capacity keeps only its tail.
    pub fn extend(&mut self, data: &[u8]) {
        if self.buf.len() + data.len() > self.capacity {
            warn!(
                buffered = self.buf.len(),
                incoming = data.len(),
                capacity = self.capacity,
                "Frame buffer overflow, dropping buffered bytes"
            );
            self.buf.clear();
        }
        
        let start = data.len().saturating_sub(self.capacity);
        self.buf.extend_from_slice(&data[start..]);
    }
    
    /// Pop the next complete frame, dropping any leading noise
    ///
    /// A start marker whose header announces a frame larger than the
    /// capacity can never complete and is dropped as noise.
    pub fn next_frame(&mut self, protocol: Protocol) -> Option<Bytes> {
        loop {
            let extraction = match declared_len(protocol, &self.buf) {
                Some(total) if total > self.capacity => {
                    debug!(?protocol, total, capacity = self.capacity, "Frame cannot fit");
                    Extraction::Discard(1)
                }
                _ => extract(protocol, &self.buf),
            };
            
            match extraction {
                Extraction::Incomplete => return None,
                Extraction::Frame(n) => {
                    let frame = self.buf.split_to(n).freeze();
                    debug!(?protocol, len = frame.len(), "Frame extracted");
                    return Some(frame);
                }
                Extraction::Discard(n) => {
                    let n = n.clamp(1, self.buf.len());
                    debug!(
                        ?protocol,
                        dropped = %hex::encode(&self.buf[..n]),
                        "Discarding bytes"
                    );
                    self.buf.advance(n);
                }
            }
        }
    }
    
    /// Buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
    
    pub fn len(&self) -> usize {
        self.buf.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    
    fn rpleth_frame(data: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x00, 0x01, 0x04, data.len() as u8];
        frame.extend_from_slice(data);
        frame.push(checksum::xor(&frame));
        frame
    }
    
    fn stidstr_frame(msg: &[u8]) -> Vec<u8> {
        let mut frame = vec![STX];
        frame.extend_from_slice(&(msg.len() as u16).to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(msg);
        let crc = checksum::crc_ccitt(checksum::CRC_CCITT_FFFF, &frame[1..]);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }
    
    fn osdp_frame(data: &[u8]) -> Vec<u8> {
        let total = 8 + data.len();
        let mut frame = vec![OSDP_SOM, 0x80];
        frame.extend_from_slice(&(total as u16).to_le_bytes());
        frame.extend_from_slice(&[0x05, 0x40]);
        frame.extend_from_slice(data);
        let crc = checksum::crc_ccitt(checksum::CRC_CCITT_1D0F, &frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }
    
    fn stidprg_frame(data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x21, 0x00, 0x00, data.len() as u8];
        payload.extend_from_slice(data);
        let mut frame = vec![STX];
        frame.extend_from_slice(&payload);
        frame.push(checksum::xor(&payload));
        frame.push(ETX);
        frame
    }
    
    fn terminated_frame(data: &[u8]) -> Vec<u8> {
        let mut frame = vec![STX];
        frame.extend(data.iter().map(|b| b & 0x7F).filter(|&b| b != CR));
        frame.push(CR);
        frame
    }
    
    #[test]
    fn test_empty_is_incomplete() {
        for protocol in [
            Protocol::Rpleth,
            Protocol::StidStr,
            Protocol::Osdp,
            Protocol::AxessTmc13,
            Protocol::StidPrg,
            Protocol::Promag,
        ] {
            assert_eq!(extract(protocol, &[]), Extraction::Incomplete);
        }
    }
    
    #[test]
    fn test_stidstr_exact_size() {
        let frame = stidstr_frame(&[0x11; 12]);
        assert_eq!(frame.len(), 12 + 7);
        assert_eq!(extract(Protocol::StidStr, &frame), Extraction::Frame(frame.len()));
        assert_eq!(
            extract(Protocol::StidStr, &frame[..frame.len() - 1]),
            Extraction::Incomplete
        );
    }
    
    #[test]
    fn test_stidstr_leading_noise() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[0xFF, 0x00, 0x13]);
        let frame = stidstr_frame(&[0x01, 0x02]);
        buffer.extend(&frame);
        
        assert_eq!(buffer.next_frame(Protocol::StidStr).unwrap(), Bytes::from(frame));
        assert!(buffer.is_empty());
    }
    
    #[test]
    fn test_osdp_noise_then_frame() {
        let frame = osdp_frame(&[0x01, 0x02, 0x03]);
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[0x00, 0x17, 0xFE]);
        buffer.extend(&frame);
        
        assert_eq!(buffer.next_frame(Protocol::Osdp).unwrap(), Bytes::from(frame));
        assert!(buffer.is_empty());
    }
    
    #[test]
    fn test_osdp_false_marker() {
        // 0x53 followed by an impossible length
        let frame = osdp_frame(&[]);
        let mut bytes = vec![OSDP_SOM, 0x00, 0xFF, 0xFF, 0x00, 0x00];
        bytes.extend_from_slice(&frame);
        
        assert_eq!(extract(Protocol::Osdp, &bytes), Extraction::Discard(1));
        
        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);
        assert_eq!(buffer.next_frame(Protocol::Osdp).unwrap(), Bytes::from(frame));
    }
    
    #[test]
    fn test_promag_variants() {
        assert_eq!(extract(Protocol::Promag, &[BEL]), Extraction::Frame(1));
        assert_eq!(extract(Protocol::Promag, &[ESC, 0x31]), Extraction::Frame(2));
        assert_eq!(extract(Protocol::Promag, &[STX, 0x41, 0x42]), Extraction::Incomplete);
        assert_eq!(extract(Protocol::Promag, &[STX, 0x41, CR]), Extraction::Frame(3));
        assert_eq!(extract(Protocol::Promag, &[0x41, 0x42]), Extraction::Discard(2));
    }
    
    #[test]
    fn test_two_frames_queued() {
        let first = rpleth_frame(&[0xAA]);
        let second = rpleth_frame(&[0xBB, 0xCC]);
        
        let mut buffer = FrameBuffer::new();
        buffer.extend(&first);
        buffer.extend(&second);
        
        assert_eq!(buffer.next_frame(Protocol::Rpleth).unwrap(), Bytes::from(first));
        assert_eq!(buffer.next_frame(Protocol::Rpleth).unwrap(), Bytes::from(second));
        assert_eq!(buffer.next_frame(Protocol::Rpleth), None);
    }
    
    #[test]
    fn test_overflow_clears() {
        let mut buffer = FrameBuffer::with_capacity(8);
        buffer.extend(&[0x01; 6]);
        buffer.extend(&[0x02; 4]);
        assert_eq!(buffer.as_slice(), &[0x02; 4]);
        
        buffer.extend(&[0x03; 20]);
        assert_eq!(buffer.len(), 8);
    }
    
    #[test]
    fn test_large_stidstr_frame_in_chunks() {
        let frame = stidstr_frame(&vec![0x5A; 5000]);
        let mut buffer = FrameBuffer::new();
        
        let mut got = None;
        for chunk in frame.chunks(256) {
            buffer.extend(chunk);
            if let Some(f) = buffer.next_frame(Protocol::StidStr) {
                got = Some(f);
            }
        }
        
        assert_eq!(got, Some(Bytes::from(frame)));
        assert!(buffer.is_empty());
    }
    
    #[test]
    fn test_largest_stidstr_frame_fits_default() {
        let frame = stidstr_frame(&vec![0x00; u16::MAX as usize]);
        assert_eq!(frame.len(), STIDSTR_MAX_FRAME);
        
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame);
        assert_eq!(buffer.next_frame(Protocol::StidStr), Some(Bytes::from(frame)));
    }
    
    #[test]
    fn test_oversized_header_is_noise() {
        let frame = stidstr_frame(&[0x01, 0x02]);
        let mut buffer = FrameBuffer::with_capacity(64);
        // stray STX announcing 0x0100 bytes, more than the buffer holds
        buffer.extend(&[STX, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        buffer.extend(&frame);
        
        assert_eq!(buffer.next_frame(Protocol::StidStr), Some(Bytes::from(frame)));
        assert!(buffer.is_empty());
    }
    
    #[test]
    fn test_oversized_rpleth_header_is_noise() {
        let frame = rpleth_frame(&[0xAA]);
        let mut buffer = FrameBuffer::with_capacity(16);
        buffer.extend(&[0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(buffer.next_frame(Protocol::Rpleth), None);
        assert!(buffer.len() < 4);
        
        buffer.clear();
        buffer.extend(&frame);
        assert_eq!(buffer.next_frame(Protocol::Rpleth), Some(Bytes::from(frame)));
    }
    
    fn build(protocol: Protocol, data: &[u8]) -> Vec<u8> {
        match protocol {
            Protocol::Rpleth => rpleth_frame(data),
            Protocol::StidStr => stidstr_frame(data),
            Protocol::Osdp => osdp_frame(data),
            Protocol::StidPrg => stidprg_frame(data),
            Protocol::AxessTmc13 | Protocol::Promag => terminated_frame(data),
        }
    }
    
    fn any_protocol() -> impl Strategy<Value = Protocol> {
        prop_oneof![
            Just(Protocol::Rpleth),
            Just(Protocol::StidStr),
            Just(Protocol::Osdp),
            Just(Protocol::AxessTmc13),
            Just(Protocol::StidPrg),
            Just(Protocol::Promag),
        ]
    }
    
    /// Largest payload each builder can frame
    fn max_payload(protocol: Protocol) -> usize {
        match protocol {
            Protocol::Rpleth | Protocol::StidPrg => u8::MAX as usize,
            Protocol::StidStr => u16::MAX as usize,
            Protocol::Osdp => OSDP_MAX_FRAME - 8,
            Protocol::AxessTmc13 | Protocol::Promag => 1024,
        }
    }
    
    fn protocol_and_payload() -> impl Strategy<Value = (Protocol, Vec<u8>)> {
        any_protocol().prop_flat_map(|protocol| {
            (
                Just(protocol),
                proptest::collection::vec(any::<u8>(), 0..=max_payload(protocol)),
            )
        })
    }
    
    proptest! {
        #[test]
        fn prop_whole_frame_is_extracted((protocol, data) in protocol_and_payload()) {
            let frame = build(protocol, &data);
            prop_assert_eq!(extract(protocol, &frame), Extraction::Frame(frame.len()));
        }
        
        #[test]
        fn prop_chunked_feed(
            (protocol, data) in protocol_and_payload(),
            chunk in 1usize..64,
        ) {
            let frame = build(protocol, &data);
            let mut buffer = FrameBuffer::new();
            let mut fed = 0;
            
            for piece in frame.chunks(chunk) {
                buffer.extend(piece);
                fed += piece.len();
                let got = buffer.next_frame(protocol);
                if fed < frame.len() {
                    prop_assert!(got.is_none());
                } else {
                    prop_assert_eq!(got, Some(Bytes::from(frame.clone())));
                }
            }
            prop_assert!(buffer.is_empty());
        }
        
        #[test]
        fn prop_byte_at_a_time(
            protocol in any_protocol(),
            data in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let frame = build(protocol, &data);
            let mut buffer = FrameBuffer::new();
            
            for (i, byte) in frame.iter().enumerate() {
                buffer.extend(&[*byte]);
                let got = buffer.next_frame(protocol);
                if i + 1 < frame.len() {
                    prop_assert!(got.is_none());
                } else {
                    prop_assert_eq!(got, Some(Bytes::from(frame.clone())));
                }
            }
            prop_assert!(buffer.is_empty());
        }
    }
}
