use crate::record::LogRecord;
use crate::sink::{AsyncLogSink, LogSink, SinkError};
use std::error::Error;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

/// Buffering and retry settings for [`BatchingSink`].
///
/// **Fields**
/// - `channel_buffer`: maximum number of queued records before `emit`
///   starts rejecting new ones.
/// - `batch_size`: number of records handed to the backend per batch.
/// - `flush_interval`: longest time a partial batch waits before sending.
/// - `max_attempts`: send attempts per batch before it is given up.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_attempts: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Delivery counters shared between [`BatchingSink`] and its worker.
#[derive(Debug, Default)]
pub struct BatchCounters {
    /// Records offered to `emit`.
    pub total: AtomicU64,
    /// Records accepted into the channel.
    pub enqueued: AtomicU64,
    /// Records rejected because the channel was full or closed.
    pub dropped: AtomicU64,
    /// Records accepted by the backend.
    pub delivered: AtomicU64,
    /// Records in batches given up after `max_attempts`.
    pub failed: AtomicU64,
}

/// Adapts an [`AsyncLogSink`] to the synchronous [`LogSink`] interface.
///
/// `emit` only enqueues into a bounded channel; a background task pulls
/// records, groups them into batches and sends them with exponential
/// backoff. Network I/O is fully decoupled from the logging call. A full
/// queue is reported to the logger as [`SinkError::QueueFull`].
pub struct BatchingSink {
    sender: mpsc::Sender<LogRecord>,
    capacity: usize,
    counters: Arc<BatchCounters>,
}

impl BatchingSink {
    /// Create the sink and spawn its worker on the current Tokio runtime.
    ///
    /// Minimal thresholds are enforced for `channel_buffer`, `batch_size`,
    /// `flush_interval` and `max_attempts` to avoid degenerate
    /// configurations. The worker ends once the sink is dropped and the
    /// remaining records are sent.
    pub fn new(sink: Arc<dyn AsyncLogSink>, config: BatchConfig) -> (Self, JoinHandle<()>) {
        let buffer = config.channel_buffer.max(16);
        let batch_size = config.batch_size.max(1);
        let flush_interval = config.flush_interval.max(Duration::from_millis(10));
        let max_attempts = config.max_attempts.max(1);

        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);
        let counters = Arc::new(BatchCounters::default());
        let counters_bg = Arc::clone(&counters);

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            let backoff = Duration::from_millis(100);
            let max_backoff = Duration::from_secs(10);
            // One deadline for the whole loop; incoming records do not push it back.
            let flush = sleep(flush_interval);
            tokio::pin!(flush);

            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(record) => {
                            batch.push(record);
                            if batch.len() >= batch_size {
                                send_batch(&*sink, &mut batch, backoff, max_backoff, max_attempts, &counters_bg).await;
                                flush.as_mut().reset(Instant::now() + flush_interval);
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                send_batch(&*sink, &mut batch, backoff, max_backoff, max_attempts, &counters_bg).await;
                            }
                            if let Err(e) = sink.flush().await {
                                tracing::warn!(error = %e, "async log sink flush failed");
                            }
                            break;
                        }
                    },
                    _ = &mut flush => {
                        if !batch.is_empty() {
                            send_batch(&*sink, &mut batch, backoff, max_backoff, max_attempts, &counters_bg).await;
                        }
                        flush.as_mut().reset(Instant::now() + flush_interval);
                    }
                }
            }
        });

        (
            Self {
                sender: tx,
                capacity: buffer,
                counters,
            },
            handle,
        )
    }

    pub fn counters(&self) -> Arc<BatchCounters> {
        Arc::clone(&self.counters)
    }
}

async fn send_batch(
    sink: &dyn AsyncLogSink,
    batch: &mut Vec<LogRecord>,
    mut backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
    counters: &BatchCounters,
) {
    let mut attempt = 1;
    loop {
        let mut last_err: Option<Box<dyn Error + Send + Sync>> = None;
        let mut sent = 0;
        for record in batch.iter() {
            if let Err(e) = sink.send(record).await {
                last_err = Some(e);
                break;
            }
            sent += 1;
        }
        // Records before the failure are not resent.
        batch.drain(..sent);
        counters.delivered.fetch_add(sent as u64, Ordering::Relaxed);

        let Some(err) = last_err else {
            return;
        };

        if attempt >= max_attempts {
            counters.failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            tracing::error!(
                error = %err,
                records = batch.len(),
                attempts = attempt,
                "giving up on log batch"
            );
            batch.clear();
            return;
        }

        tracing::warn!(error = %err, retry_in = ?backoff, "log sink send failed, retrying");
        sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, max_backoff);
        attempt += 1;
    }
}

impl LogSink for BatchingSink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(record.clone()) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::QueueFull { capacity: self.capacity })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Closed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Severity;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            level: Severity::Information,
            category: "batching".into(),
            template: message.into(),
            message: message.into(),
            fields: Vec::new(),
            scope: BTreeMap::new(),
            scope_messages: Vec::new(),
            error: None,
            malformed: false,
        }
    }

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<String>>,
        fail_first: AtomicU64,
    }

    #[async_trait]
    impl AsyncLogSink for Collect {
        async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
            if self.fail_first.load(Ordering::Relaxed) > 0 {
                self.fail_first.fetch_sub(1, Ordering::Relaxed);
                return Err("backend unavailable".into());
            }
            self.seen.lock().unwrap().push(record.message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_drains_on_drop() {
        let backend = Arc::new(Collect::default());
        let (sink, worker) = BatchingSink::new(
            backend.clone(),
            BatchConfig { batch_size: 2, ..BatchConfig::default() },
        );
        for i in 0..5 {
            sink.emit(&record(&format!("m{}", i))).unwrap();
        }
        assert_eq!(sink.counters().enqueued.load(Ordering::Relaxed), 5);
        let counters = sink.counters();
        drop(sink);
        worker.await.unwrap();

        assert_eq!(*backend.seen.lock().unwrap(), ["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(counters.delivered.load(Ordering::Relaxed), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_sends() {
        let backend = Arc::new(Collect {
            fail_first: AtomicU64::new(2),
            ..Collect::default()
        });
        let (sink, worker) = BatchingSink::new(backend.clone(), BatchConfig::default());
        sink.emit(&record("retry me")).unwrap();
        let counters = sink.counters();
        drop(sink);
        worker.await.unwrap();

        assert_eq!(*backend.seen.lock().unwrap(), ["retry me"]);
        assert_eq!(counters.failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let backend = Arc::new(Collect {
            fail_first: AtomicU64::new(u64::MAX),
            ..Collect::default()
        });
        let (sink, worker) = BatchingSink::new(
            backend.clone(),
            BatchConfig { max_attempts: 3, ..BatchConfig::default() },
        );
        sink.emit(&record("lost")).unwrap();
        let counters = sink.counters();
        drop(sink);
        worker.await.unwrap();

        assert!(backend.seen.lock().unwrap().is_empty());
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_trickle_is_flushed_on_interval() {
        let backend = Arc::new(Collect::default());
        let (sink, worker) = BatchingSink::new(
            backend.clone(),
            BatchConfig {
                batch_size: 128,
                flush_interval: Duration::from_secs(1),
                ..BatchConfig::default()
            },
        );
        let counters = sink.counters();

        for i in 0..20 {
            sink.emit(&record(&format!("m{}", i))).unwrap();
            sleep(Duration::from_millis(500)).await;
        }
        // Records up to t=8.5s were due at the t=9s flush at the latest.
        assert!(counters.delivered.load(Ordering::Relaxed) >= 18);

        drop(sink);
        worker.await.unwrap();
        assert_eq!(counters.delivered.load(Ordering::Relaxed), 20);
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let backend = Arc::new(Collect::default());
        // The worker is not polled until this test yields, so the queue fills.
        let (sink, _worker) = BatchingSink::new(backend, BatchConfig { channel_buffer: 16, ..BatchConfig::default() });
        for i in 0..16 {
            sink.emit(&record(&format!("m{}", i))).unwrap();
        }
        assert!(matches!(sink.emit(&record("overflow")), Err(SinkError::QueueFull { capacity: 16 })));
        assert_eq!(sink.counters().dropped.load(Ordering::Relaxed), 1);
    }
}
