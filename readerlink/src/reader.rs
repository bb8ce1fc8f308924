//! Reader unit: one reader, its transport and its driver
//!
//! The unit walks `Disconnected → Connected → Authenticated → Scanning`:
//! [`ReaderUnit::connect`] opens the transport (probing serial ports first
//! when no port is configured) and lets the driver configure the reader,
//! which includes the STid STR handshakes. The wait methods then poll the
//! driver for a card until something changes or their deadline passes.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use readerlink_core::Answer;
use readerlink_transport::Transport;
use readerlink_types::{ChipInfo, ReaderKind, Settings, StidBaudRate};

use crate::autodetect::{self, PortScanner};
use crate::channel::{Channel, Exchange};
use crate::drivers::stidstr::{ReaderInformation, TamperBehavior, TamperSwitchInfo};
use crate::drivers::{ReaderDriver, StidStrReader};
use crate::error::{Error, Result};
use crate::logging::SuppressGuard;
use crate::registry::{PortLease, PortTable};

/// Connection state of a [`ReaderUnit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Disconnected,
    Connected,
    /// Connected with a secure session
    Authenticated,
    /// Inside `wait_insertion` or `wait_removal`
    Scanning,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Scanning => "scanning",
        };
        f.write_str(name)
    }
}

/// A connected (or connectable) reader
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use readerlink::drivers::PromagReader;
/// use readerlink::{LineSettings, ReaderUnit, SerialTransport, Settings};
///
/// # async fn run() -> readerlink::Result<()> {
/// let transport = SerialTransport::new("/dev/ttyUSB0", LineSettings::new(9600));
/// let mut unit = ReaderUnit::new(PromagReader::new(), Box::new(transport), Settings::default());
///
/// unit.connect().await?;
/// if let Some(chip) = unit.wait_insertion(Duration::from_secs(10)).await? {
///     println!("{}", chip);
///     unit.wait_removal(Duration::ZERO).await?;
/// }
/// unit.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ReaderUnit<D = Box<dyn ReaderDriver>> {
    driver: D,
    channel: Option<Channel>,
    scanner: Option<Box<dyn PortScanner>>,
    settings: Settings,
    state: UnitState,
    inserted: Option<ChipInfo>,
    pending: Option<ChipInfo>,
    ports: Option<PortTable>,
    lease: Option<PortLease>,
}

/// `None` for an unbounded wait
fn deadline_after(max_wait: Duration) -> Option<Instant> {
    if max_wait.is_zero() {
        None
    } else {
        Some(Instant::now() + max_wait)
    }
}

impl<D: ReaderDriver> ReaderUnit<D> {
    /// Unit on a known transport
    pub fn new(driver: D, transport: Box<dyn Transport>, settings: Settings) -> Self {
        let timeout = settings.data_transport_timeout();
        Self {
            driver,
            channel: Some(Channel::new(transport, timeout)),
            scanner: None,
            settings,
            state: UnitState::Disconnected,
            inserted: None,
            pending: None,
            ports: None,
            lease: None,
        }
    }

    /// Unit whose serial port is found by probing at connect time
    pub fn auto_detected(driver: D, scanner: Box<dyn PortScanner>, settings: Settings) -> Self {
        Self {
            driver,
            channel: None,
            scanner: Some(scanner),
            settings,
            state: UnitState::Disconnected,
            inserted: None,
            pending: None,
            ports: None,
            lease: None,
        }
    }

    /// Ports claimed through `table` are refused to other units
    pub(crate) fn with_port_table(mut self, table: PortTable, lease: Option<PortLease>) -> Self {
        self.ports = Some(table);
        self.lease = lease;
        self
    }

    pub fn kind(&self) -> ReaderKind {
        self.driver.kind()
    }

    /// Port name or `host:port`; `None` until auto-detection found a port
    pub fn name(&self) -> Option<String> {
        self.channel.as_ref().map(Channel::name)
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.state != UnitState::Disconnected
            && self.channel.as_ref().is_some_and(Channel::is_connected)
    }

    /// Chip reported by the last successful `wait_insertion`
    pub fn inserted_chip(&self) -> Option<&ChipInfo> {
        self.inserted.as_ref()
    }

    pub fn last_exchange(&self) -> Option<&Exchange> {
        self.channel.as_ref().map(Channel::last_exchange)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Driver and channel together, for driver specific commands
    pub fn split_mut(&mut self) -> Result<(&mut D, &mut Channel)> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        match self.channel.as_mut() {
            Some(channel) => Ok((&mut self.driver, channel)),
            None => Err(Error::NotConnected),
        }
    }

    /// Open the transport and configure the reader
    ///
    /// On failure the transport is closed again and the unit stays
    /// disconnected; a failed handshake never falls back to plain mode.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        if self.channel.is_none() {
            let channel = self.detect().await?;
            self.channel = Some(channel);
        } else if let Some(channel) = self.channel.as_mut() {
            channel.open().await?;
        }

        let Some(channel) = self.channel.as_mut() else {
            return Err(Error::NotConnected);
        };
        channel.set_timeout(self.settings.data_transport_timeout());

        if let Err(e) = self.driver.configure(channel).await {
            warn!(kind = %self.driver.kind(), error = %e, "Reader configuration failed");
            if let Err(close) = channel.close().await {
                debug!(error = %close, "Close after failed configuration failed");
            }
            self.forget_detected_port();
            self.state = UnitState::Disconnected;
            return Err(e);
        }

        self.state = if self.driver.is_authenticated() {
            UnitState::Authenticated
        } else {
            UnitState::Connected
        };
        info!(
            kind = %self.driver.kind(),
            name = %channel.name(),
            state = %self.state,
            "Reader connected"
        );
        Ok(())
    }

    async fn detect(&mut self) -> Result<Channel> {
        let Some(scanner) = self.scanner.as_deref() else {
            return Err(Error::InvalidState("reader unit has no transport".into()));
        };
        if !self.settings.auto_detect_enabled {
            return Err(Error::InvalidState(
                "no serial port configured and auto-detection is disabled".into(),
            ));
        }

        let timeout = self.settings.auto_detection_timeout();
        let Some(mut channel) = autodetect::detect(&mut self.driver, scanner, timeout).await? else {
            return Err(Error::NoReaderFound);
        };

        if let Some(table) = &self.ports {
            match table.claim(&channel.name()) {
                Ok(lease) => self.lease = Some(lease),
                Err(e) => {
                    if let Err(close) = channel.close().await {
                        debug!(error = %close, "Close of a claimed port failed");
                    }
                    return Err(e);
                }
            }
        }
        Ok(channel)
    }

    /// Detected ports are probed again on the next `connect`
    fn forget_detected_port(&mut self) {
        if self.scanner.is_some() {
            self.channel = None;
            self.lease = None;
        }
    }

    /// Release the reader session and close the transport
    pub async fn disconnect(&mut self) -> Result<()> {
        self.state = UnitState::Disconnected;
        self.inserted = None;
        self.pending = None;

        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };

        let mut result = Ok(());
        if channel.is_connected() {
            if let Err(e) = self.driver.release(channel).await {
                warn!(error = %e, "Reader release failed");
            }
            result = channel.close().await;
            info!(name = %channel.name(), "Reader disconnected");
        }

        self.forget_detected_port();
        result
    }

    /// Send a logical command through the driver's adapter
    pub async fn send_command(&mut self, command: &[u8]) -> Result<Answer> {
        let (driver, channel) = self.split_mut()?;
        channel.send_command(driver.adapter_mut(), command).await
    }

    /// Wait until a chip is in the field
    ///
    /// A zero `max_wait` waits forever. A chip that replaced the previous
    /// one during `wait_removal` is returned at once.
    pub async fn wait_insertion(&mut self, max_wait: Duration) -> Result<Option<ChipInfo>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        if let Some(chip) = self.pending.take() {
            info!(%chip, "Chip inserted");
            self.inserted = Some(chip.clone());
            return Ok(Some(chip));
        }

        let deadline = deadline_after(max_wait);
        let result = {
            let _quiet = (!self.settings.see_wait_insertion_log).then(SuppressGuard::suppress);
            let resume = std::mem::replace(&mut self.state, UnitState::Scanning);
            let result = self.poll_insertion(deadline).await;
            self.state = resume;
            result
        };

        let chip = result?;
        match &chip {
            Some(chip) => {
                info!(%chip, "Chip inserted");
                self.inserted = Some(chip.clone());
            }
            None => debug!(?max_wait, "No chip inserted"),
        }
        Ok(chip)
    }

    /// Wait until the inserted chip leaves the field
    ///
    /// Returns `false` when the deadline passed with the chip still there.
    pub async fn wait_removal(&mut self, max_wait: Duration) -> Result<bool> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let Some(inserted) = self.inserted.clone() else {
            return Ok(true);
        };

        let deadline = deadline_after(max_wait);
        let result = {
            let _quiet = (!self.settings.see_wait_removal_log).then(SuppressGuard::suppress);
            let resume = std::mem::replace(&mut self.state, UnitState::Scanning);
            let result = self.poll_removal(&inserted, deadline).await;
            self.state = resume;
            result
        };

        let removed = result?;
        if removed {
            info!(chip = %inserted, "Chip removed");
            self.inserted = None;
        }
        Ok(removed)
    }

    async fn poll_insertion(&mut self, deadline: Option<Instant>) -> Result<Option<ChipInfo>> {
        loop {
            let (driver, channel) = self.split_mut()?;
            if let Some(chip) = driver.chip_in_air(channel).await? {
                return Ok(Some(chip));
            }
            if !pause(self.driver.poll_interval(), deadline).await {
                return Ok(None);
            }
        }
    }

    async fn poll_removal(&mut self, inserted: &ChipInfo, deadline: Option<Instant>) -> Result<bool> {
        loop {
            let (driver, channel) = self.split_mut()?;
            match driver.chip_in_air(channel).await? {
                None => return Ok(true),
                Some(chip) if !chip.same_chip(inserted) => {
                    debug!(%chip, "Another chip replaced the inserted one");
                    self.pending = Some(chip);
                    return Ok(true);
                }
                Some(_) => {}
            }
            if !pause(self.driver.poll_interval(), deadline).await {
                return Ok(false);
            }
        }
    }

}

/// Sleep one poll interval, cut at `deadline`; `false` once it passed
async fn pause(interval: Duration, deadline: Option<Instant>) -> bool {
    let next = Instant::now() + interval;
    match deadline {
        Some(deadline) if Instant::now() >= deadline => false,
        Some(deadline) => {
            tokio::time::sleep_until(next.min(deadline)).await;
            true
        }
        None => {
            tokio::time::sleep_until(next).await;
            true
        }
    }
}

/// Typed STid STR commands on a connected unit
impl ReaderUnit<StidStrReader> {
    pub async fn reader_info(&mut self) -> Result<ReaderInformation> {
        let (reader, channel) = self.split_mut()?;
        reader.reader_info(channel).await
    }

    pub async fn change_reader_keys(
        &mut self,
        hmac_key: Option<&[u8; 10]>,
        aes_key: Option<&[u8; 16]>,
    ) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.change_reader_keys(channel, hmac_key, aes_key).await
    }

    pub async fn set_baud_rate(&mut self, rate: StidBaudRate) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.set_baud_rate(channel, rate).await
    }

    pub async fn set_rs485_address(&mut self, address: u8) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.set_rs485_address(channel, address).await
    }

    pub async fn set_allowed_comm_modes(&mut self, plain: bool, signed: bool, ciphered: bool) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.set_allowed_comm_modes(channel, plain, signed, ciphered).await
    }

    pub async fn set_tamper_switch(&mut self, enabled: bool, behavior: TamperBehavior) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.set_tamper_switch(channel, enabled, behavior).await
    }

    pub async fn tamper_switch(&mut self) -> Result<TamperSwitchInfo> {
        let (reader, channel) = self.split_mut()?;
        reader.tamper_switch(channel).await
    }

    pub async fn load_skb(&mut self) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.load_skb(channel).await
    }

    /// Drop the secure session on the reader side
    pub async fn reset_authenticate(&mut self) -> Result<()> {
        let (reader, channel) = self.split_mut()?;
        reader.reset_authenticate(channel).await?;
        self.state = UnitState::Connected;
        Ok(())
    }
}
