//! Process-wide logging switch and subscriber setup
//!
//! Every library event passes through one flag. Polling loops switch it
//! off with a [`SuppressGuard`] so that waiting for a card does not flood
//! the log. Guards are counted rather than saved and restored, so logging
//! comes back once the last live guard is dropped, in whatever order the
//! guards go away and whatever the exit path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::Layer;

use readerlink_transport::WIRE_LOG_TARGET;
use readerlink_types::Settings;

/// Environment variable read before `RUST_LOG`
pub const LOG_ENV: &str = "READERLINK_LOG";

static LOG_ENABLED: AtomicBool = AtomicBool::new(true);
static SUPPRESS_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Whether library events are currently emitted
///
/// True when the base flag is on and no [`SuppressGuard`] is alive.
pub fn is_enabled() -> bool {
    SUPPRESS_DEPTH.load(Ordering::Acquire) == 0 && LOG_ENABLED.load(Ordering::Acquire)
}

/// Set the base flag; live guards still win over it
pub fn set_enabled(enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Release);
}

/// Keeps logging off while alive
#[must_use = "logging is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SuppressGuard {
    _private: (),
}

impl SuppressGuard {
    pub fn suppress() -> Self {
        SUPPRESS_DEPTH.fetch_add(1, Ordering::AcqRel);
        Self { _private: () }
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        SUPPRESS_DEPTH.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the env filter for `settings`
///
/// `READERLINK_LOG` wins over `RUST_LOG`; the default level is `info`.
pub fn env_filter(settings: &Settings) -> EnvFilter {
    let base = std::env::var(LOG_ENV)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    if settings.see_communication_log {
        return base;
    }

    match format!("{}=off", WIRE_LOG_TARGET).parse() {
        Ok(directive) => base.add_directive(directive),
        Err(_) => base,
    }
}

/// Install the global fmt subscriber
///
/// Fails if a global subscriber is already set; the log flag is updated
/// either way.
pub fn init(settings: &Settings) -> Result<(), TryInitError> {
    set_enabled(settings.log_enabled);

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(filter_fn(|_| is_enabled()));

    tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(layer)
        .try_init()
}
