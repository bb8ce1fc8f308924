//! Rpleth reader (HID Wiegand reader behind a TCP box)
//!
//! Cards are not polled: the host arms the HID reader with a `BADGE`
//! command and the box pushes the Wiegand frame once a card is presented.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use readerlink_core::adapter::rpleth::{DEVICE_HID, HID_BADGE, HID_NOP};
use readerlink_core::adapter::RplethAdapter;
use readerlink_core::{CommandAdapter, Protocol};
use readerlink_types::{ChipInfo, ReaderKind, RplethOptions};

use super::{ReaderDriver, DEFAULT_POLL_INTERVAL};
use crate::channel::Channel;
use crate::error::{Error, Result};

/// Pick the CSN out of a Wiegand frame
///
/// The frame is read as one big-endian bit string of any width; `length`
/// bits are taken `offset` bits from its end and returned right aligned.
/// A zero `length` keeps the whole frame. Returns `None` when the frame is
/// shorter than `length + offset` bits.
///
/// # Examples
///
/// ```
/// use readerlink::drivers::rpleth::extract_csn;
///
/// let frame = [0x12, 0x34, 0x56, 0x78];
/// assert_eq!(extract_csn(&frame, 16, 8), Some(vec![0x34, 0x56]));
/// assert_eq!(extract_csn(&frame, 0, 0), Some(frame.to_vec()));
/// ```
pub fn extract_csn(frame: &[u8], length: u32, offset: u32) -> Option<Vec<u8>> {
    if length == 0 {
        return Some(frame.to_vec());
    }

    let available = frame.len() as u64 * 8;
    if available < u64::from(length) + u64::from(offset) {
        warn!(
            bits = available,
            length, offset, "Wiegand frame too short for the configured CSN"
        );
        return None;
    }

    // bit 0 is the least significant bit of the last byte
    let bit = |n: usize| (frame[frame.len() - 1 - n / 8] >> (n % 8)) & 1;

    let (length, offset) = (length as usize, offset as usize);
    let size = length.div_ceil(8);
    let mut csn = vec![0u8; size];
    for i in 0..length {
        csn[size - 1 - i / 8] |= bit(offset + i) << (i % 8);
    }
    Some(csn)
}

pub struct RplethReader {
    adapter: RplethAdapter,
    options: RplethOptions,
    badge_wait: Duration,
}

impl RplethReader {
    pub fn new(options: &RplethOptions) -> Self {
        Self {
            adapter: RplethAdapter::new(),
            options: options.clone(),
            badge_wait: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How long one `chip_in_air` call waits for a pushed badge
    pub fn with_badge_wait(mut self, wait: Duration) -> Self {
        self.badge_wait = wait;
        self
    }

    /// Arm the HID reader and wait for one Wiegand frame
    pub async fn badge(&mut self, channel: &mut Channel, wait: Duration) -> Result<Option<Vec<u8>>> {
        let command = RplethAdapter::command(DEVICE_HID, HID_BADGE, &[])?;
        channel.transmit(&mut self.adapter, &command).await?;

        let frame = match channel
            .receive_frame(Protocol::Rpleth, Instant::now() + wait)
            .await
        {
            Ok(frame) => frame,
            Err(Error::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let answer = self.adapter.adapt_answer(&frame)?;
        if answer.data.is_empty() {
            return Ok(None);
        }

        debug!(wiegand = %hex::encode(&answer.data), "Badge received");
        Ok(Some(answer.data.to_vec()))
    }
}

#[async_trait]
impl ReaderDriver for RplethReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Rpleth
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        &mut self.adapter
    }

    fn ping_command(&self) -> Vec<u8> {
        vec![DEVICE_HID, HID_NOP, 0x00]
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        let ping = self.ping_command();
        channel.send_command(&mut self.adapter, &ping).await?;
        Ok(())
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let wait = self.badge_wait;
        let Some(wiegand) = self.badge(channel, wait).await? else {
            return Ok(None);
        };

        Ok(extract_csn(&wiegand, self.options.csn_length, self.options.csn_offset)
            .map(ChipInfo::generic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rpleth_frame, ScriptedTransport};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_csn_not_byte_aligned() {
        let frame = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(extract_csn(&frame, 12, 4), Some(vec![0x05, 0x67]));
        assert_eq!(extract_csn(&frame, 32, 0), Some(frame.to_vec()));
    }

    #[test]
    fn test_csn_from_wide_frame() {
        let frame: Vec<u8> = (1..=20).collect();
        // top 16 bits of a 160-bit frame
        assert_eq!(extract_csn(&frame, 16, 144), Some(vec![0x01, 0x02]));
        assert_eq!(extract_csn(&frame, 160, 0), Some(frame.clone()));

        let shifted: Vec<u8> = frame.windows(2).skip(2).map(|w| (w[0] << 4) | (w[1] >> 4)).collect();
        assert_eq!(shifted.len(), 17);
        assert_eq!(extract_csn(&frame, 136, 4), Some(shifted));
    }

    #[test]
    fn test_csn_frame_too_short() {
        assert_eq!(extract_csn(&[0xFF, 0xFF], 16, 1), None);
    }

    #[tokio::test]
    async fn test_pushed_badge_is_a_chip() {
        let transport = ScriptedTransport::new()
            .reply(rpleth_frame(DEVICE_HID, HID_BADGE, &[0x00, 0x12, 0x34, 0x56, 0x78]));
        let sent = transport.sent();
        let mut channel = Channel::new(Box::new(transport), Duration::from_millis(200));
        channel.open().await.unwrap();

        let mut reader = RplethReader::new(&RplethOptions {
            csn_length: 32,
            csn_offset: 0,
        });
        let chip = reader.chip_in_air(&mut channel).await.unwrap();

        assert_eq!(chip, Some(ChipInfo::generic(vec![0x12, 0x34, 0x56, 0x78])));
        assert_eq!(sent.lock().unwrap()[0], vec![0x01, 0x04, 0x00, 0x05]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_badge_is_no_chip() {
        let mut channel = Channel::new(Box::new(ScriptedTransport::new()), Duration::from_millis(200));
        channel.open().await.unwrap();

        let mut reader = RplethReader::new(&RplethOptions::default());
        assert_eq!(reader.chip_in_air(&mut channel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_configure_pings_hid() {
        let transport = ScriptedTransport::new().reply(rpleth_frame(DEVICE_HID, HID_NOP, &[]));
        let sent = transport.sent();
        let mut channel = Channel::new(Box::new(transport), Duration::from_millis(200));
        channel.open().await.unwrap();

        let mut reader = RplethReader::new(&RplethOptions::default());
        reader.configure(&mut channel).await.unwrap();
        assert_eq!(sent.lock().unwrap()[0], vec![0x01, 0x03, 0x00, 0x02]);
    }
}
