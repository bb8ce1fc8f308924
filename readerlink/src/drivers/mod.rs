//! Per reader family logic
//!
//! A driver owns the family's command adapter and knows which commands
//! configure the reader, which one pings it and how a card shows up.
//! [`ReaderUnit`](crate::ReaderUnit) drives it through a [`Channel`].

pub mod axess;
pub mod osdp;
pub mod promag;
pub mod rpleth;
pub mod stidprg;
pub mod stidstr;

use std::time::Duration;

use async_trait::async_trait;

use readerlink_core::{Answer, CommandAdapter};
use readerlink_types::{ChipInfo, ReaderKind};

use crate::channel::Channel;
use crate::error::{Error, Result};

pub use axess::AxessTmc13Reader;
pub use osdp::OsdpReader;
pub use promag::PromagReader;
pub use rpleth::RplethReader;
pub use stidprg::StidPrgReader;
pub use stidstr::StidStrReader;

/// Default pause between two card polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Decode an identifier printed as hex digits, padding odd lengths
pub(crate) fn hex_identifier(text: &str) -> Result<Vec<u8>> {
    let digits = text.trim();
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits))
    } else {
        hex::decode(digits)
    };

    decoded.map_err(|e| Error::InvalidResponse(format!("identifier {:?}: {}", digits, e)))
}

#[async_trait]
pub trait ReaderDriver: Send {
    fn kind(&self) -> ReaderKind;

    /// Adapter used for every command of this reader
    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter;

    /// Logical command answered by any live reader of this family
    fn ping_command(&self) -> Vec<u8>;

    /// Whether a ping answer really comes from this family
    fn accepts_ping(&self, _answer: &Answer) -> bool {
        true
    }

    /// Pause between two `chip_in_air` calls
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Whether a reader of this family answers on `channel`
    ///
    /// Used by auto-detection on a freshly opened port, before `configure`.
    async fn probe(&mut self, channel: &mut Channel) -> Result<bool> {
        let ping = self.ping_command();
        let answer = channel.send_command(self.adapter_mut(), &ping).await?;
        Ok(self.accepts_ping(&answer))
    }

    /// Bring a freshly opened reader into a usable state
    async fn configure(&mut self, channel: &mut Channel) -> Result<()>;

    /// Card currently in the field, if any
    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>>;

    /// Undo `configure` before the transport closes
    async fn release(&mut self, _channel: &mut Channel) -> Result<()> {
        Ok(())
    }

    /// Whether `configure` left an authenticated session behind
    fn is_authenticated(&self) -> bool {
        false
    }
}

#[async_trait]
impl<D: ReaderDriver + ?Sized> ReaderDriver for Box<D> {
    fn kind(&self) -> ReaderKind {
        (**self).kind()
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        (**self).adapter_mut()
    }

    fn ping_command(&self) -> Vec<u8> {
        (**self).ping_command()
    }

    fn accepts_ping(&self, answer: &Answer) -> bool {
        (**self).accepts_ping(answer)
    }

    fn poll_interval(&self) -> Duration {
        (**self).poll_interval()
    }

    async fn probe(&mut self, channel: &mut Channel) -> Result<bool> {
        (**self).probe(channel).await
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        (**self).configure(channel).await
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        (**self).chip_in_air(channel).await
    }

    async fn release(&mut self, channel: &mut Channel) -> Result<()> {
        (**self).release(channel).await
    }

    fn is_authenticated(&self) -> bool {
        (**self).is_authenticated()
    }
}
