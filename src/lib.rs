//! Structured logging core.
//!
//! A [`Logger`] gates records by [`Severity`], renders message templates
//! into text plus named [`Field`]s, attaches the properties of the active
//! scope stack and the chain of an attached error, and hands the finished
//! [`LogRecord`] to every registered [`LogSink`]. Timing and throughput
//! helpers live in [`timing`] and [`metrics`].

pub mod level;
pub mod value;
pub mod record;
pub mod format;
pub mod template;
pub mod scope;
pub mod error;
pub mod timing;
pub mod metrics;
pub mod logger;

pub mod sink;
pub mod noop_sink;
pub mod memory_sink;
pub mod console;
pub mod tracing_sink;
pub mod batching;

pub mod bridge;
pub mod config;
pub mod init;

pub use error::{DomainError, ErrorChain, ErrorDescriptor, FieldError};
pub use level::Severity;
pub use logger::{Logger, LoggerBuilder};
pub use metrics::{BatchStats, PerformanceSample, PhaseReport, PhaseTimer};
pub use record::{Capture, Field, LogRecord};
pub use scope::{ScopeFrame, ScopeGuard};
pub use sink::{AsyncLogSink, LogSink, SinkError};
pub use timing::Stopwatch;
pub use value::Value;
