//! OSDP peripheral device (RS485)
//!
//! Plain channel only: the control panel identifies the device with `ID`
//! and then polls it. A `BUSY` reply is retried every 50 ms for up to two
//! seconds.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use readerlink_core::adapter::osdp::{
    CMD_ID, CMD_POLL, REPLY_ACK, REPLY_BUSY, REPLY_FMT, REPLY_LSTATR, REPLY_PDID, REPLY_RAW,
    REPLY_XRD,
};
use readerlink_core::adapter::OsdpAdapter;
use readerlink_core::{Answer, CommandAdapter};
use readerlink_types::{ChipInfo, OsdpOptions, ReaderKind};

use super::ReaderDriver;
use crate::channel::Channel;
use crate::error::{Error, Result};

const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);
const BUSY_RETRY_LIMIT: Duration = Duration::from_secs(2);

/// `PDID` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// IEEE OUI of the vendor
    pub vendor: [u8; 3],
    pub model: u8,
    pub version: u8,
    pub serial: u32,
    /// Major, minor, build
    pub firmware: [u8; 3],
}

impl DeviceIdentity {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::InvalidResponse(format!(
                "PDID reply is {} bytes, expected 12",
                data.len()
            )));
        }

        Ok(Self {
            vendor: [data[0], data[1], data[2]],
            model: data[3],
            version: data[4],
            serial: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            firmware: [data[9], data[10], data[11]],
        })
    }
}

pub struct OsdpReader {
    adapter: OsdpAdapter,
    identity: Option<DeviceIdentity>,
    tamper: bool,
}

impl OsdpReader {
    pub fn new(options: &OsdpOptions) -> Self {
        Self {
            adapter: OsdpAdapter::new(options.address),
            identity: None,
            tamper: false,
        }
    }

    /// Identity read by `configure`
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Tamper flag from the last local status report
    pub fn tamper(&self) -> bool {
        self.tamper
    }

    /// Send `[code, data...]`, retrying while the device answers `BUSY`
    pub async fn send(&mut self, channel: &mut Channel, command: &[u8]) -> Result<Answer> {
        let give_up = Instant::now() + BUSY_RETRY_LIMIT;

        loop {
            let answer = channel.send_command(&mut self.adapter, command).await?;
            if answer.status != REPLY_BUSY {
                return Ok(answer);
            }
            if Instant::now() + BUSY_RETRY_DELAY > give_up {
                return Err(Error::InvalidState("OSDP device stayed busy".into()));
            }

            debug!("OSDP device busy, retrying");
            tokio::time::sleep(BUSY_RETRY_DELAY).await;
        }
    }

    pub async fn identify(&mut self, channel: &mut Channel) -> Result<DeviceIdentity> {
        let answer = self.send(channel, &[CMD_ID, 0x00]).await?;
        if answer.status != REPLY_PDID {
            return Err(Error::InvalidResponse(format!(
                "ID answered with reply 0x{:02X}",
                answer.status
            )));
        }
        DeviceIdentity::parse(&answer.data)
    }
}

#[async_trait]
impl ReaderDriver for OsdpReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::Osdp
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        &mut self.adapter
    }

    fn ping_command(&self) -> Vec<u8> {
        vec![CMD_POLL]
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        let identity = self.identify(channel).await?;
        info!(
            vendor = %hex::encode(identity.vendor),
            model = identity.model,
            serial = identity.serial,
            "OSDP device identified"
        );
        self.identity = Some(identity);
        Ok(())
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let answer = self.send(channel, &[CMD_POLL]).await?;
        let data = &answer.data;

        match answer.status {
            REPLY_ACK => Ok(None),
            // [reader, format, bit count (2, LE), bits...]
            REPLY_RAW if data.len() > 4 => Ok(Some(ChipInfo::generic(&data[4..]))),
            // [reader, direction, length, ascii...]
            REPLY_FMT if data.len() > 3 => Ok(Some(ChipInfo::generic(&data[3..]))),
            REPLY_XRD if data.get(1) == Some(&0x01) => Ok(Some(ChipInfo::generic(&data[2..]))),
            REPLY_XRD => Ok(None),
            REPLY_LSTATR => {
                self.tamper = data.first().is_some_and(|t| *t != 0);
                if self.tamper {
                    warn!("OSDP device reports tamper");
                }
                Ok(None)
            }
            other => Err(Error::InvalidResponse(format!(
                "unexpected POLL reply 0x{:02X}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{osdp_reply, ScriptedTransport};
    use pretty_assertions::assert_eq;

    const PDID: [u8; 12] = [0x00, 0x0E, 0x6B, 0x02, 0x01, 0x78, 0x56, 0x34, 0x12, 0x01, 0x04, 0x00];

    fn sequenced(replies: Vec<(u8, Vec<u8>)>) -> ScriptedTransport {
        let mut replies = replies.into_iter();
        ScriptedTransport::with_responder(move |frame: &[u8]| {
            let sequence = frame[4] & 0x03;
            match replies.next() {
                Some((code, data)) => vec![osdp_reply(0x00, sequence, code, &data)],
                None => Vec::new(),
            }
        })
    }

    async fn open(transport: ScriptedTransport) -> Channel {
        let mut channel = Channel::new(Box::new(transport), Duration::from_millis(200));
        channel.open().await.unwrap();
        channel
    }

    #[test]
    fn test_identity_parse() {
        let identity = DeviceIdentity::parse(&PDID).unwrap();
        assert_eq!(identity.vendor, [0x00, 0x0E, 0x6B]);
        assert_eq!(identity.serial, 0x12345678);
        assert_eq!(identity.firmware, [0x01, 0x04, 0x00]);
        assert!(DeviceIdentity::parse(&PDID[..11]).is_err());
    }

    #[tokio::test]
    async fn test_configure_reads_identity() {
        let mut channel = open(sequenced(vec![(REPLY_PDID, PDID.to_vec())])).await;
        let mut reader = OsdpReader::new(&OsdpOptions::default());

        reader.configure(&mut channel).await.unwrap();
        assert_eq!(reader.identity().map(|i| i.model), Some(0x02));
    }

    #[tokio::test]
    async fn test_poll_replies() {
        let mut channel = open(sequenced(vec![
            (REPLY_ACK, vec![]),
            (REPLY_RAW, vec![0x00, 0x01, 0x20, 0x00, 0xCA, 0xFE, 0xBA, 0xBE]),
            (REPLY_LSTATR, vec![0x01, 0x00]),
        ]))
        .await;
        let mut reader = OsdpReader::new(&OsdpOptions::default());

        assert_eq!(reader.chip_in_air(&mut channel).await.unwrap(), None);
        assert_eq!(
            reader.chip_in_air(&mut channel).await.unwrap(),
            Some(ChipInfo::generic(vec![0xCA, 0xFE, 0xBA, 0xBE]))
        );
        assert_eq!(reader.chip_in_air(&mut channel).await.unwrap(), None);
        assert!(reader.tamper());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_is_retried() {
        let transport = sequenced(vec![(REPLY_BUSY, vec![]), (REPLY_BUSY, vec![]), (REPLY_ACK, vec![])]);
        let sent = transport.sent();
        let mut channel = open(transport).await;
        let mut reader = OsdpReader::new(&OsdpOptions::default());

        assert_eq!(reader.chip_in_air(&mut channel).await.unwrap(), None);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }
}
