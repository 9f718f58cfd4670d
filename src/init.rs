use crate::bridge::RecordLayer;
use crate::config::{ConfigError, LoggerConfig};
use crate::logger::{Logger, LoggerBuilder};
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

static GLOBAL: OnceLock<Logger> = OnceLock::new();

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("global logger is already set")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Controls which layers [`init_tracing_with_config`] installs.
///
/// **Fields**
/// - `bridge_events`: route `tracing` events from other crates into the
///   logger through [`RecordLayer`].
/// - `enable_stdout`: add `tracing_subscriber::fmt` on top, so events (and
///   the crate's own sink diagnostics) are printed to the console.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    pub bridge_events: bool,
    pub enable_stdout: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            bridge_events: true,
            enable_stdout: false,
        }
    }
}

/// Install `logger` as the process-wide logger returned by [`global`].
pub fn set_global(logger: Logger) -> Result<&'static Logger, InitError> {
    GLOBAL.set(logger).map_err(|_| InitError::AlreadyInitialized)?;
    GLOBAL.get().ok_or(InitError::AlreadyInitialized)
}

pub fn global() -> Option<&'static Logger> {
    GLOBAL.get()
}

/// Install a global `tracing` subscriber wired to `logger`.
///
/// This sets a [`Registry`] with the layers selected by `config` as the
/// global default, so every `tracing` event in the process is observed.
pub fn init_tracing_with_config(logger: &Logger, config: TracingConfig) -> Result<(), InitError> {
    let bridge = config.bridge_events.then(|| RecordLayer::new(logger.clone()));
    let fmt = config.enable_stdout.then(tracing_subscriber::fmt::layer);
    let subscriber = Registry::default().with(bridge).with(fmt);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// [`init_tracing_with_config`] with [`TracingConfig::default`].
pub fn init_tracing(logger: &Logger) -> Result<(), InitError> {
    init_tracing_with_config(logger, TracingConfig::default())
}

/// Build the global logger from the `STRUCTLOG_*` environment and bridge
/// `tracing` events into it. This is the recommended entrypoint for
/// binaries.
pub fn init_from_env() -> Result<&'static Logger, InitError> {
    let config = LoggerConfig::from_env()?;
    let logger = set_global(LoggerBuilder::from_config(&config).build())?;
    init_tracing(logger)?;
    Ok(logger)
}
