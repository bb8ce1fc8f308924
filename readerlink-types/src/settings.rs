//! Library-wide settings
//!
//! These used to be a process singleton; here they are a plain value the
//! caller owns and hands to every reader unit it builds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logging and timing knobs shared by all reader units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch for library logging
    pub log_enabled: bool,

    /// Keep logging while `wait_insertion` polls
    pub see_wait_insertion_log: bool,

    /// Keep logging while `wait_removal` polls
    pub see_wait_removal_log: bool,

    /// Log raw wire bytes
    pub see_communication_log: bool,

    /// Probe serial ports when no port name is configured
    pub auto_detect_enabled: bool,

    /// Per-port probe timeout in milliseconds
    pub auto_detection_timeout_ms: u64,

    /// Retry line configuration once after reopening the port
    pub configuration_retry_enabled: bool,

    /// Pause before the configuration retry in milliseconds
    pub configuration_retry_timeout_ms: u64,

    /// Command answer timeout in milliseconds
    pub data_transport_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_enabled: true,
            see_wait_insertion_log: false,
            see_wait_removal_log: false,
            see_communication_log: false,
            auto_detect_enabled: false,
            auto_detection_timeout_ms: 400,
            configuration_retry_enabled: false,
            configuration_retry_timeout_ms: 500,
            data_transport_timeout_ms: 3000,
        }
    }
}

impl Settings {
    pub fn auto_detection_timeout(&self) -> Duration {
        Duration::from_millis(self.auto_detection_timeout_ms)
    }

    pub fn configuration_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.configuration_retry_timeout_ms)
    }

    pub fn data_transport_timeout(&self) -> Duration {
        Duration::from_millis(self.data_transport_timeout_ms)
    }
}
