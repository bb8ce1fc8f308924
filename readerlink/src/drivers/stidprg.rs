//! STid PRG 125 kHz programming reader
//!
//! Commands are `[cmd, p1, p2, len, data...]`. The reader is switched to
//! the proximity chip type once, then polled for the current chip.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use readerlink_core::adapter::StidPrgAdapter;
use readerlink_core::CommandAdapter;
use readerlink_types::{ChipInfo, ReaderKind};

use super::ReaderDriver;
use crate::channel::Channel;
use crate::error::Result;

pub const CMD_SELECT_CHIP_TYPE: [u8; 4] = [0x20, 0x03, 0x00, 0x00];
pub const CMD_CURRENT_CHIP: [u8; 4] = [0x21, 0x00, 0x00, 0x00];
pub const CMD_STATUS: [u8; 4] = [0x2A, 0x00, 0x00, 0x00];

/// Card type reported for every chip this reader sees
pub const PROX_CARD_TYPE: &str = "Prox";

#[derive(Debug, Default)]
pub struct StidPrgReader {
    adapter: StidPrgAdapter,
}

impl StidPrgReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the buzzer on or off
    pub async fn set_buzzer(&mut self, channel: &mut Channel, on: bool) -> Result<()> {
        let p1 = if on { 0x10 } else { 0x00 };
        channel
            .send_command(&mut self.adapter, &[0x2D, p1, 0x00, 0x00])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReaderDriver for StidPrgReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::StidPrg
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        &mut self.adapter
    }

    fn ping_command(&self) -> Vec<u8> {
        CMD_STATUS.to_vec()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(200)
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        channel
            .send_command(&mut self.adapter, &CMD_SELECT_CHIP_TYPE)
            .await?;
        Ok(())
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let answer = channel
            .send_command(&mut self.adapter, &CMD_CURRENT_CHIP)
            .await?;
        if answer.data.is_empty() {
            return Ok(None);
        }

        debug!(uid = %hex::encode(&answer.data), "Proximity chip");
        Ok(Some(ChipInfo::new(PROX_CARD_TYPE, answer.data.to_vec())))
    }
}
