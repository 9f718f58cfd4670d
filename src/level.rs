use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a log record.
///
/// The order is fixed: `Trace < Debug < Information < Warning < Error <
/// Critical`. Comparison against the configured minimum is the only gating
/// mechanism, see [`is_enabled`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// All levels in ascending order.
    pub const ALL: [Severity; 6] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "Trace",
            Severity::Debug => "Debug",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }

    /// Short upper-case tag used by the console layout.
    pub fn short_name(&self) -> &'static str {
        match self {
            Severity::Trace => "TRCE",
            Severity::Debug => "DBUG",
            Severity::Information => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "FAIL",
            Severity::Critical => "CRIT",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a severity name cannot be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown severity level: {0:?}")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "verbose" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "information" | "info" => Ok(Severity::Information),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            "critical" | "crit" | "fatal" => Ok(Severity::Critical),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

impl From<Severity> for tracing::Level {
    fn from(level: Severity) -> Self {
        match level {
            Severity::Trace => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Information => tracing::Level::INFO,
            Severity::Warning => tracing::Level::WARN,
            Severity::Error | Severity::Critical => tracing::Level::ERROR,
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        if *level == tracing::Level::TRACE {
            Severity::Trace
        } else if *level == tracing::Level::DEBUG {
            Severity::Debug
        } else if *level == tracing::Level::INFO {
            Severity::Information
        } else if *level == tracing::Level::WARN {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

/// Returns `true` when a record at `level` passes a `minimum` gate.
#[inline]
pub fn is_enabled(level: Severity, minimum: Severity) -> bool {
    level >= minimum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_is_monotonic() {
        for (i, minimum) in Severity::ALL.iter().enumerate() {
            for (j, level) in Severity::ALL.iter().enumerate() {
                assert_eq!(is_enabled(*level, *minimum), j >= i, "{level} vs {minimum}");
            }
        }
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("Information".parse::<Severity>().unwrap(), Severity::Information);
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(" FATAL ".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn maps_critical_to_tracing_error() {
        assert_eq!(tracing::Level::from(Severity::Critical), tracing::Level::ERROR);
        assert_eq!(Severity::from(&tracing::Level::WARN), Severity::Warning);
    }
}
