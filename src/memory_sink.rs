use crate::level::Severity;
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use std::sync::{Mutex, MutexGuard};

/// Keeps every record in memory, in delivery order.
///
/// Meant for tests and for hosts that inspect recent records themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn levels(&self) -> Vec<Severity> {
        self.lock().iter().map(|r| r.level).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn last(&self) -> Option<LogRecord> {
        self.lock().last().cloned()
    }

    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.lock())
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.lock().push(record.clone());
        Ok(())
    }
}
