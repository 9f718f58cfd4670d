use crate::level::Severity;
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use tracing::Level;

/// Target of the events emitted by [`TracingSink`]. The tracing bridge
/// ignores it so records do not loop back into the logger.
pub const RECORD_TARGET: &str = "structlog_core::records";

/// Forwards every record to `tracing` as an event, so an installed
/// `tracing_subscriber` stack (fmt, file appenders, ...) can print it.
///
/// `Critical` records are emitted at `ERROR` with `critical = true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let fields = serde_json::to_string(&record.fields)?;
        let scope = serde_json::to_string(&record.scope)?;
        let error = match &record.error {
            Some(chain) => serde_json::to_string(chain)?,
            None => String::new(),
        };
        let critical = record.level == Severity::Critical;

        macro_rules! forward {
            ($level:expr) => {
                tracing::event!(
                    target: RECORD_TARGET,
                    $level,
                    category = %record.category,
                    fields = %fields,
                    scope = %scope,
                    error = %error,
                    critical,
                    malformed = record.malformed,
                    "{}",
                    record.message
                )
            };
        }

        match record.level {
            Severity::Trace => forward!(Level::TRACE),
            Severity::Debug => forward!(Level::DEBUG),
            Severity::Information => forward!(Level::INFO),
            Severity::Warning => forward!(Level::WARN),
            Severity::Error | Severity::Critical => forward!(Level::ERROR),
        }
        Ok(())
    }
}
