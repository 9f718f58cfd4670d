use crate::record::LogRecord;
use crate::sink::{AsyncLogSink, LogSink, SinkError};
use async_trait::async_trait;
use std::error::Error;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of record construction without any
/// I/O, and as the async backend of a batching pipeline in benchmarks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn emit(&self, _record: &LogRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl AsyncLogSink for NoopSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
