//! Promag reader
//!
//! Single-letter commands: `N` returns the reader identifier, `R` the tag
//! identifier as hex digits (or `BEL` when the field is empty).

use async_trait::async_trait;
use tracing::info;

use readerlink_core::adapter::PromagAdapter;
use readerlink_core::CommandAdapter;
use readerlink_types::{ChipInfo, ReaderKind};

use super::{hex_identifier, ReaderDriver};
use crate::channel::Channel;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct PromagReader {
    adapter: PromagAdapter,
    identifier: Option<String>,
}

impl PromagReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}

#[async_trait]
impl ReaderDriver for PromagReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Promag
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        &mut self.adapter
    }

    fn ping_command(&self) -> Vec<u8> {
        b"N".to_vec()
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        let answer = channel.send_command(&mut self.adapter, b"N").await?;
        let identifier = String::from_utf8_lossy(&answer.data).into_owned();
        info!(%identifier, "Promag reader identified");
        self.identifier = Some(identifier);
        Ok(())
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let answer = channel.send_command(&mut self.adapter, b"R").await?;
        if answer.data.is_empty() {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&answer.data);
        Ok(Some(ChipInfo::generic(hex_identifier(&text)?)))
    }
}
