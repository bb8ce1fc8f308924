//! Axess TMC 13.56 MHz reader
//!
//! ASCII protocol: `v` returns the reader identifier (always starting with
//! `TMC`), `s` returns the card number in decimal or `N` without card.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use readerlink_core::adapter::AxessTmc13Adapter;
use readerlink_core::{Answer, CommandAdapter};
use readerlink_types::{ChipInfo, ReaderKind};

use super::{hex_identifier, ReaderDriver};
use crate::channel::Channel;
use crate::error::{Error, Result};

const IDENTIFIER_PREFIX: &[u8] = b"TMC";

#[derive(Debug, Default)]
pub struct AxessTmc13Reader {
    adapter: AxessTmc13Adapter,
    identifier: Option<String>,
}

impl AxessTmc13Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier read by `configure`
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}

/// Card number printed in decimal, as identifier bytes
fn decimal_identifier(text: &str) -> Result<Vec<u8>> {
    let number: u64 = text
        .trim()
        .parse()
        .map_err(|e| Error::InvalidResponse(format!("card number {:?}: {}", text, e)))?;
    hex_identifier(&format!("{:x}", number))
}

#[async_trait]
impl ReaderDriver for AxessTmc13Reader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::AxessTmc13
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        &mut self.adapter
    }

    fn ping_command(&self) -> Vec<u8> {
        b"v".to_vec()
    }

    fn accepts_ping(&self, answer: &Answer) -> bool {
        answer.data.starts_with(IDENTIFIER_PREFIX)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        let answer = channel.send_command(&mut self.adapter, b"v").await?;
        if !self.accepts_ping(&answer) {
            return Err(Error::InvalidResponse(format!(
                "reader identifier {:?} does not start with TMC",
                String::from_utf8_lossy(&answer.data)
            )));
        }

        let identifier = String::from_utf8_lossy(&answer.data).into_owned();
        info!(%identifier, "Axess TMC reader identified");
        self.identifier = Some(identifier);
        Ok(())
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let answer = channel.send_command(&mut self.adapter, b"s").await?;
        match answer.data.first() {
            None | Some(b'N') => Ok(None),
            Some(_) => {
                let text = String::from_utf8_lossy(&answer.data);
                Ok(Some(ChipInfo::generic(decimal_identifier(&text)?)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;

    fn reader_sim() -> ScriptedTransport {
        let mut cards = vec![b"N\r".to_vec(), b"305419896\r".to_vec()].into_iter();
        ScriptedTransport::with_responder(move |frame: &[u8]| match frame {
            b"v\r" => vec![b"TMC13-2.1\r".to_vec()],
            b"s\r" => cards.next().into_iter().collect(),
            _ => Vec::new(),
        })
    }

    #[test]
    fn test_decimal_identifier() {
        assert_eq!(decimal_identifier("305419896").unwrap(), vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(decimal_identifier("4095").unwrap(), vec![0x0F, 0xFF]);
        assert!(decimal_identifier("12a").is_err());
    }

    #[tokio::test]
    async fn test_identify_then_poll() {
        let mut channel = Channel::new(Box::new(reader_sim()), Duration::from_millis(200));
        channel.open().await.unwrap();
        let mut reader = AxessTmc13Reader::new();

        reader.configure(&mut channel).await.unwrap();
        assert_eq!(reader.identifier(), Some("TMC13-2.1"));

        assert_eq!(reader.chip_in_air(&mut channel).await.unwrap(), None);
        assert_eq!(
            reader.chip_in_air(&mut channel).await.unwrap(),
            Some(ChipInfo::generic(vec![0x12, 0x34, 0x56, 0x78]))
        );
    }

    #[tokio::test]
    async fn test_foreign_reader_rejected() {
        let transport = ScriptedTransport::new().reply(b"PROMAG\r".to_vec());
        let mut channel = Channel::new(Box::new(transport), Duration::from_millis(200));
        channel.open().await.unwrap();

        let err = AxessTmc13Reader::new().configure(&mut channel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }
}
