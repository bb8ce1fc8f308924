//! STid STR reader
//!
//! After the line is open the reader authenticates the host once per
//! connection: HMAC handshake when the configured mode signs frames, then
//! AES handshake when it ciphers them. Handshake frames travel in the
//! reserved mode, which is forced for the duration of the exchange and put
//! back on every exit path.
//!
//! The typed commands (`reader_info`, `set_baud_rate`, ...) take the
//! [`Channel`] explicitly; [`ReaderUnit`](crate::ReaderUnit) forwards them
//! for an STid STR unit.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use readerlink_core::adapter::StidStrAdapter;
use readerlink_core::secure::{
    AesHandshake, HmacHandshake, SessionState, SharedMode, AES_CHALLENGE_REQUEST,
    AUTHENTICATE_CODE, HMAC_CHALLENGE_REQUEST,
};
use readerlink_core::{Answer, CommandAdapter, StatusError};
use readerlink_types::{ChipInfo, CommunicationMode, ReaderKind, StidBaudRate, StidStrOptions};

use super::ReaderDriver;
use crate::channel::Channel;
use crate::error::{Error, Result};

pub const CMD_CHANGE_KEYS: u16 = 0x0003;
pub const CMD_SET_BAUD_RATE: u16 = 0x0005;
pub const CMD_SET_RS485_ADDRESS: u16 = 0x0006;
pub const CMD_READER_INFO: u16 = 0x0008;
pub const CMD_SCAN_14443B: u16 = 0x0009;
pub const CMD_SET_ALLOWED_MODES: u16 = 0x000A;
pub const CMD_SET_TAMPER_SWITCH: u16 = 0x000B;
pub const CMD_TAMPER_SWITCH: u16 = 0x000C;
pub const CMD_RESET_AUTHENTICATE: u16 = 0x000D;
pub const CMD_LOAD_SKB: u16 = 0x000E;
pub const CMD_SCAN_A_RAW: u16 = 0x000F;

/// Highest RS485 bus address
pub const MAX_RS485_ADDRESS: u8 = 127;

/// Answer to `reader_info`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderInformation {
    pub version: u8,
    /// Raw baud code, see [`ReaderInformation::baud_rate`]
    pub baud_code: u8,
    pub rs485_address: u8,
    /// Supply voltage in volts
    pub voltage: f32,
}

impl ReaderInformation {
    pub fn baud_rate(&self) -> Option<StidBaudRate> {
        StidBaudRate::from_code(self.baud_code)
    }
}

impl fmt::Display for ReaderInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STid STR v0x{:02X} (baud code {}, RS485 address {}, {:.1} V)",
            self.version, self.baud_code, self.rs485_address, self.voltage
        )
    }
}

/// What the reader does when its tamper switch opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TamperBehavior {
    Nothing = 0x00,
    ResetConfig = 0x01,
    ResetKeys = 0x02,
    ResetAll = 0x03,
}

impl TryFrom<u8> for TamperBehavior {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(Self::Nothing),
            0x01 => Ok(Self::ResetConfig),
            0x02 => Ok(Self::ResetKeys),
            0x03 => Ok(Self::ResetAll),
            other => Err(Error::InvalidResponse(format!(
                "unknown tamper switch behavior 0x{:02X}",
                other
            ))),
        }
    }
}

/// Answer to `tamper_switch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TamperSwitchInfo {
    pub enabled: bool,
    pub behavior: TamperBehavior,
    /// Switch opened since the last query
    pub changed: bool,
}

/// Card family for an ISO 14443A ATQA (NXP AN10833)
pub fn card_type_from_atqa(atqa: u16) -> &'static str {
    match atqa {
        0x0002 => "Mifare4K",
        0x0004 => "Mifare1K",
        0x0042 | 0x0044 => "MifareUltralight",
        0x0344 => "DESFireEV1",
        _ => "UNKNOWN",
    }
}

pub struct StidStrReader {
    adapter: StidStrAdapter,
    mode: SharedMode,
    configured: CommunicationMode,
    hmac_key: Zeroizing<Vec<u8>>,
    aes_key: Zeroizing<Vec<u8>>,
}

impl StidStrReader {
    pub fn new(options: &StidStrOptions) -> Result<Self> {
        let mode = SharedMode::new(options.communication_mode);
        let adapter = StidStrAdapter::new(
            options.communication_type,
            options.rs485_address,
            mode.clone(),
        );

        Ok(Self {
            adapter,
            mode,
            configured: options.communication_mode,
            hmac_key: Zeroizing::new(options.hmac_key_bytes()?),
            aes_key: Zeroizing::new(options.aes_key_bytes()?),
        })
    }

    /// Mode every command uses once the session is up
    pub fn communication_mode(&self) -> CommunicationMode {
        self.configured
    }

    /// Mode currently applied by the adapter
    pub fn current_mode(&self) -> CommunicationMode {
        self.mode.get()
    }

    pub fn session_state(&self) -> SessionState {
        self.adapter.session_state()
    }

    pub fn adapter(&self) -> &StidStrAdapter {
        &self.adapter
    }

    async fn send(&mut self, channel: &mut Channel, code: u16, data: &[u8]) -> Result<Answer> {
        channel
            .send_command(&mut self.adapter, &StidStrAdapter::command(code, data))
            .await
    }

    async fn handshake_step(&mut self, channel: &mut Channel, data: &[u8]) -> Result<Answer> {
        match self.send(channel, AUTHENTICATE_CODE, data).await {
            Err(Error::Timeout { waited }) => {
                warn!(?waited, "Handshake step timed out");
                Err(Error::handshake_timeout())
            }
            other => other,
        }
    }

    async fn hmac_exchange(
        &mut self,
        channel: &mut Channel,
        mut handshake: HmacHandshake,
    ) -> Result<[u8; 10]> {
        let _reserved = self.mode.override_with(CommunicationMode::RESERVED);

        let rnd_a = self.handshake_step(channel, &HMAC_CHALLENGE_REQUEST).await?;
        let request = handshake.respond(&rnd_a.data)?;
        let reply = self.handshake_step(channel, &request).await?;
        Ok(handshake.finish(&reply.data)?)
    }

    async fn aes_exchange(
        &mut self,
        channel: &mut Channel,
        mut handshake: AesHandshake,
    ) -> Result<[u8; 16]> {
        let _reserved = self.mode.override_with(CommunicationMode::RESERVED);

        let challenge = self.handshake_step(channel, &AES_CHALLENGE_REQUEST).await?;
        let request = handshake.respond(&challenge.data)?;
        let reply = self.handshake_step(channel, &request).await?;
        Ok(handshake.finish(&reply.data)?)
    }

    /// Run the signed-mode handshake and install the HMAC session key
    pub async fn authenticate_hmac(&mut self, channel: &mut Channel) -> Result<()> {
        info!("Authenticating STid STR reader (HMAC)...");

        let handshake = HmacHandshake::new(&self.hmac_key)?;
        self.adapter.set_session_state(SessionState::HandshakeInFlight);

        match self.hmac_exchange(channel, handshake).await {
            Ok(key) => {
                self.adapter.session_keys_mut().set_hmac(key);
                debug!("HMAC session key installed");
                Ok(())
            }
            Err(e) => {
                self.adapter.reset_session();
                Err(e)
            }
        }
    }

    /// Run the ciphered-mode handshake and install the AES session key
    pub async fn authenticate_aes(&mut self, channel: &mut Channel) -> Result<()> {
        info!("Authenticating STid STR reader (AES)...");

        let handshake = AesHandshake::new(&self.aes_key)?;
        self.adapter.set_session_state(SessionState::HandshakeInFlight);

        match self.aes_exchange(channel, handshake).await {
            Ok(key) => {
                self.adapter.session_keys_mut().set_aes(key);
                debug!("AES session key installed");
                Ok(())
            }
            Err(e) => {
                self.adapter.reset_session();
                Err(e)
            }
        }
    }

    /// Ask the reader to drop its session, then forget ours
    pub async fn reset_authenticate(&mut self, channel: &mut Channel) -> Result<()> {
        info!("Resetting STid STR authentication...");
        let result = self.send(channel, CMD_RESET_AUTHENTICATE, &[]).await;
        self.adapter.reset_session();
        result.map(|_| ())
    }

    pub async fn reader_info(&mut self, channel: &mut Channel) -> Result<ReaderInformation> {
        let answer = self.send(channel, CMD_READER_INFO, &[]).await?;
        let data = &answer.data;
        if data.len() < 5 {
            return Err(Error::InvalidResponse(format!(
                "reader information is {} bytes, expected 5",
                data.len()
            )));
        }

        let info = ReaderInformation {
            version: data[0],
            baud_code: data[1],
            rs485_address: data[2],
            voltage: data[3] as f32 + data[4] as f32 / 10.0,
        };
        debug!("Reader information: {}", info);
        Ok(info)
    }

    /// Replace the reader's user keys; `None` keeps the current one
    pub async fn change_reader_keys(
        &mut self,
        channel: &mut Channel,
        hmac_key: Option<&[u8; 10]>,
        aes_key: Option<&[u8; 16]>,
    ) -> Result<()> {
        if hmac_key.is_none() && aes_key.is_none() {
            return Err(Error::InvalidState("no reader key to change".into()));
        }

        info!("Changing STid STR reader keys...");
        let mut data = Zeroizing::new(vec![0x00]);
        if let Some(key) = hmac_key {
            data[0] |= 0x01;
            data.extend_from_slice(key);
        }
        if let Some(key) = aes_key {
            data[0] |= 0x02;
            data.extend_from_slice(key);
        }

        self.send(channel, CMD_CHANGE_KEYS, &data).await?;
        Ok(())
    }

    pub async fn set_baud_rate(&mut self, channel: &mut Channel, rate: StidBaudRate) -> Result<()> {
        info!(bps = rate.bps(), "Setting STid STR baud rate");
        self.send(channel, CMD_SET_BAUD_RATE, &[rate as u8]).await?;
        Ok(())
    }

    pub async fn set_rs485_address(&mut self, channel: &mut Channel, address: u8) -> Result<()> {
        if address > MAX_RS485_ADDRESS {
            return Err(readerlink_types::Error::Validation(format!(
                "RS485 address must be between 0 and {}, got {}",
                MAX_RS485_ADDRESS, address
            ))
            .into());
        }

        info!(address, "Setting STid STR RS485 address");
        self.send(channel, CMD_SET_RS485_ADDRESS, &[address]).await?;
        Ok(())
    }

    /// Restrict the modes the reader accepts
    pub async fn set_allowed_comm_modes(
        &mut self,
        channel: &mut Channel,
        plain: bool,
        signed: bool,
        ciphered: bool,
    ) -> Result<()> {
        let mut allowed = 0x08;
        if plain {
            allowed |= 0x01;
        }
        if signed {
            allowed |= 0x02;
        }
        if ciphered {
            allowed |= 0x04;
        }

        info!(plain, signed, ciphered, "Setting allowed communication modes");
        self.send(channel, CMD_SET_ALLOWED_MODES, &[allowed]).await?;
        Ok(())
    }

    pub async fn set_tamper_switch(
        &mut self,
        channel: &mut Channel,
        enabled: bool,
        behavior: TamperBehavior,
    ) -> Result<()> {
        self.send(channel, CMD_SET_TAMPER_SWITCH, &[enabled as u8, behavior as u8])
            .await?;
        Ok(())
    }

    pub async fn tamper_switch(&mut self, channel: &mut Channel) -> Result<TamperSwitchInfo> {
        let answer = self.send(channel, CMD_TAMPER_SWITCH, &[]).await?;
        let data = &answer.data;
        if data.len() < 3 {
            return Err(Error::InvalidResponse(format!(
                "tamper switch answer is {} bytes, expected 3",
                data.len()
            )));
        }

        Ok(TamperSwitchInfo {
            enabled: data[0] == 0x01,
            behavior: TamperBehavior::try_from(data[1])?,
            changed: data[2] == 0x01,
        })
    }

    /// Load the secure key block into the reader
    pub async fn load_skb(&mut self, channel: &mut Channel) -> Result<()> {
        let answer = self.send(channel, CMD_LOAD_SKB, &[]).await?;
        if !answer.data.is_empty() {
            return Err(Error::InvalidResponse(
                "unexpected payload while loading the SKB".into(),
            ));
        }
        Ok(())
    }

    /// Look for an ISO 14443A card
    ///
    /// Answer: `[have_card, atqa_hi, atqa_lo, sak, uid_len, uid...]`
    pub async fn scan_a_raw(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let answer = self.send(channel, CMD_SCAN_A_RAW, &[0x00]).await?;
        let data = &answer.data;

        match data.first() {
            None => return Err(Error::InvalidResponse("empty 14443A scan answer".into())),
            Some(0x01) => {}
            Some(_) => return Ok(None),
        }
        if data.len() <= 5 {
            return Err(Error::InvalidResponse(format!(
                "14443A scan answer is {} bytes, expected more than 5",
                data.len()
            )));
        }

        let atqa = u16::from_be_bytes([data[1], data[2]]);
        let card_type = card_type_from_atqa(atqa);
        let uid_len = data[4] as usize;
        if uid_len == 0 {
            warn!("14443A card without UID");
            return Ok(None);
        }

        let uid = data
            .get(5..5 + uid_len)
            .ok_or_else(|| Error::InvalidResponse(format!("UID of {} bytes is truncated", uid_len)))?;

        debug!(atqa = format!("0x{:04X}", atqa), card_type, uid = %hex::encode(uid), "14443A card");
        Ok(Some(ChipInfo::new(card_type, uid)))
    }

    /// Look for an ISO 14443B card
    ///
    /// Answer: `[have_card, uid_len, uid...]`
    pub async fn scan_14443b(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        let answer = self.send(channel, CMD_SCAN_14443B, &[]).await?;
        let data = &answer.data;

        match data.first() {
            None => return Err(Error::InvalidResponse("empty 14443B scan answer".into())),
            Some(0x01) => {}
            Some(_) => return Ok(None),
        }

        let uid_len = data.get(1).copied().unwrap_or(0) as usize;
        if uid_len == 0 {
            warn!("14443B card without UID");
            return Ok(None);
        }

        let uid = data
            .get(2..2 + uid_len)
            .ok_or_else(|| Error::InvalidResponse(format!("UID of {} bytes is truncated", uid_len)))?;

        debug!(uid = %hex::encode(uid), "14443B card");
        Ok(Some(ChipInfo::new("UNKNOWN", uid)))
    }
}

#[async_trait]
impl ReaderDriver for StidStrReader {
    fn kind(&self) -> ReaderKind {
        ReaderKind::StidStr
    }

    fn adapter_mut(&mut self) -> &mut dyn CommandAdapter {
        &mut self.adapter
    }

    fn ping_command(&self) -> Vec<u8> {
        StidStrAdapter::command(CMD_READER_INFO, &[])
    }

    fn accepts_ping(&self, answer: &Answer) -> bool {
        answer.data.len() >= 5
    }

    /// Ping in plain mode; a reader refusing plain frames still answers
    /// with an STid status and counts as found
    async fn probe(&mut self, channel: &mut Channel) -> Result<bool> {
        let ping = self.ping_command();
        let _plain = self.mode.override_with(CommunicationMode::PLAIN);

        match channel.send_command(&mut self.adapter, &ping).await {
            Ok(answer) => Ok(self.accepts_ping(&answer)),
            Err(Error::Core(readerlink_core::Error::Status(StatusError::Stid(status)))) => {
                debug!(%status, "Reader refused the plain ping");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn configure(&mut self, channel: &mut Channel) -> Result<()> {
        self.adapter.reset_session();
        self.mode.set(self.configured);

        if self.configured.is_signed() {
            self.authenticate_hmac(channel).await?;
        }
        if self.configured.is_ciphered() {
            self.authenticate_aes(channel).await?;
        }

        if self.configured.is_signed() || self.configured.is_ciphered() {
            self.adapter.set_session_state(SessionState::Authenticated);
            info!(mode = %self.configured, "STid STR session established");
        }
        Ok(())
    }

    async fn chip_in_air(&mut self, channel: &mut Channel) -> Result<Option<ChipInfo>> {
        if let Some(chip) = self.scan_a_raw(channel).await? {
            return Ok(Some(chip));
        }
        self.scan_14443b(channel).await
    }

    async fn release(&mut self, channel: &mut Channel) -> Result<()> {
        if self.adapter.session_state() == SessionState::Authenticated {
            self.reset_authenticate(channel).await
        } else {
            self.adapter.reset_session();
            Ok(())
        }
    }

    fn is_authenticated(&self) -> bool {
        self.adapter.session_state() == SessionState::Authenticated
    }
}
