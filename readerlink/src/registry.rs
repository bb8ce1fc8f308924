//! Reader providers keyed by reader kind
//!
//! A [`ReaderRegistry`] is an ordinary value owned by the caller. It turns
//! a [`ReaderConfig`] into a ready to connect [`ReaderUnit`] and remembers
//! which serial ports its units hold, so two units never share one port.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use readerlink_transport::{LineSettings, SerialTransport, TcpTransport, Transport};
use readerlink_types::{EndpointConfig, ReaderConfig, ReaderKind, Settings};

use crate::autodetect::SerialScanner;
use crate::drivers::{
    AxessTmc13Reader, OsdpReader, PromagReader, ReaderDriver, RplethReader, StidPrgReader,
    StidStrReader,
};
use crate::error::{Error, Result};
use crate::reader::ReaderUnit;

/// Builds drivers for one reader kind
pub trait ReaderProvider: Send + Sync {
    fn kind(&self) -> ReaderKind;

    fn create_driver(&self, config: &ReaderConfig) -> Result<Box<dyn ReaderDriver>>;

    /// Endpoint used when a configuration does not name one
    fn default_endpoint(&self) -> EndpointConfig {
        EndpointConfig::Serial {
            port: None,
            baud_rate: Some(self.kind().default_baud_rate()),
        }
    }
}

/// Provider for the reader families shipped with the library
#[derive(Debug, Clone, Copy)]
pub struct BuiltinProvider(pub ReaderKind);

impl ReaderProvider for BuiltinProvider {
    fn kind(&self) -> ReaderKind {
        self.0
    }

    fn create_driver(&self, config: &ReaderConfig) -> Result<Box<dyn ReaderDriver>> {
        let driver: Box<dyn ReaderDriver> = match self.0 {
            ReaderKind::StidStr => Box::new(StidStrReader::new(&config.stidstr)?),
            ReaderKind::Rpleth => Box::new(RplethReader::new(&config.rpleth)),
            ReaderKind::Osdp => Box::new(OsdpReader::new(&config.osdp)),
            ReaderKind::AxessTmc13 => Box::new(AxessTmc13Reader::new()),
            ReaderKind::StidPrg => Box::new(StidPrgReader::new()),
            ReaderKind::Promag => Box::new(PromagReader::new()),
        };
        Ok(driver)
    }

    fn default_endpoint(&self) -> EndpointConfig {
        match self.0 {
            ReaderKind::Rpleth => EndpointConfig::Tcp {
                host: "192.168.1.100".into(),
                port: 23,
            },
            kind => EndpointConfig::Serial {
                port: None,
                baud_rate: Some(kind.default_baud_rate()),
            },
        }
    }
}

/// Serial ports held by the units of one registry
#[derive(Debug, Clone, Default)]
pub(crate) struct PortTable(Arc<Mutex<HashSet<String>>>);

impl PortTable {
    pub(crate) fn claim(&self, port: &str) -> Result<PortLease> {
        let mut ports = self.0.lock();
        if !ports.insert(port.to_string()) {
            return Err(Error::PortInUse(port.to_string()));
        }
        Ok(PortLease {
            table: self.clone(),
            port: port.to_string(),
        })
    }

    fn contains(&self, port: &str) -> bool {
        self.0.lock().contains(port)
    }
}

/// Releases its port when the owning unit drops it
#[derive(Debug)]
pub(crate) struct PortLease {
    table: PortTable,
    port: String,
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.table.0.lock().remove(&self.port);
        debug!(port = %self.port, "Serial port released");
    }
}

#[derive(Default)]
pub struct ReaderRegistry {
    providers: BTreeMap<ReaderKind, Box<dyn ReaderProvider>>,
    ports: PortTable,
}

impl ReaderRegistry {
    /// Registry without any provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing every built-in reader kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ReaderKind::ALL {
            registry.register(BuiltinProvider(kind));
        }
        registry
    }

    /// Add a provider, replacing the one already registered for its kind
    pub fn register<P: ReaderProvider + 'static>(&mut self, provider: P) {
        self.providers.insert(provider.kind(), Box::new(provider));
    }

    pub fn provider(&self, kind: ReaderKind) -> Option<&dyn ReaderProvider> {
        self.providers.get(&kind).map(|p| p.as_ref())
    }

    pub fn kinds(&self) -> impl Iterator<Item = ReaderKind> + '_ {
        self.providers.keys().copied()
    }

    /// Whether a unit of this registry holds `port`
    pub fn is_port_in_use(&self, port: &str) -> bool {
        self.ports.contains(port)
    }

    /// Build a disconnected unit for `config`
    pub fn create_unit(&self, config: &ReaderConfig, settings: &Settings) -> Result<ReaderUnit> {
        config.validate()?;

        let provider = self
            .provider(config.kind)
            .ok_or_else(|| Error::NotSupported(format!("no provider for {}", config.kind)))?;
        let driver = provider.create_driver(config)?;

        let retry = settings
            .configuration_retry_enabled
            .then(|| settings.configuration_retry_timeout());

        let unit = match &config.endpoint {
            EndpointConfig::Tcp { host, port } => {
                let transport: Box<dyn Transport> = Box::new(
                    TcpTransport::new(host.clone(), *port)
                        .with_connect_timeout(settings.data_transport_timeout()),
                );
                ReaderUnit::new(driver, transport, settings.clone())
                    .with_port_table(self.ports.clone(), None)
            }
            EndpointConfig::Serial { port, baud_rate } => {
                let line = LineSettings::new(baud_rate.unwrap_or(config.kind.default_baud_rate()));
                match port {
                    Some(port) => {
                        let lease = self.ports.claim(port)?;
                        let transport: Box<dyn Transport> =
                            Box::new(SerialTransport::new(port.clone(), line).with_configuration_retry(retry));
                        ReaderUnit::new(driver, transport, settings.clone())
                            .with_port_table(self.ports.clone(), Some(lease))
                    }
                    None => {
                        let scanner = SerialScanner::new(line).with_configuration_retry(retry);
                        ReaderUnit::auto_detected(driver, Box::new(scanner), settings.clone())
                            .with_port_table(self.ports.clone(), None)
                    }
                }
            }
        };

        debug!(kind = %config.kind, "Reader unit created");
        Ok(unit)
    }
}
