use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;

/// Failure reported by a sink. The logger contains it: delivery to the
/// other sinks continues and the caller never sees it.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink queue full (capacity {capacity}), record dropped")]
    QueueFull { capacity: usize },

    #[error("sink is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Synchronous destination for [`LogRecord`]s.
///
/// The logger calls `emit` on every registered sink for every record that
/// passes the severity gate, in call order for one execution context.
/// Implementations should be quick; anything slow belongs behind
/// [`BatchingSink`](crate::batching::BatchingSink).
pub trait LogSink: Send + Sync {
    /// Deliver one record.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted.
    /// - `Err(..)` if it was not. The logger counts the failure and reports
    ///   the first one per sink through `tracing`.
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError>;

    /// Flush any buffered records. Default implementation is a no-op.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Asynchronous destination for [`LogRecord`]s.
///
/// Implementations transport records to some backend with async I/O. They
/// are driven from a background task by
/// [`BatchingSink`](crate::batching::BatchingSink) and never awaited on the
/// application thread.
#[async_trait]
pub trait AsyncLogSink: Send + Sync {
    /// Send a single log record to the underlying backend.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted by the backend.
    /// - `Err(..)` if the backend failed. The batching loop treats this as
    ///   transient and retries the batch with backoff.
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Flush any buffered records, if the backend implements buffering.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
