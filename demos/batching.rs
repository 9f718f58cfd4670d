use std::error::Error;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use structlog_core::batching::{BatchConfig, BatchingSink};
use structlog_core::init::{init_tracing_with_config, TracingConfig};
use structlog_core::noop_sink::NoopSink;
use structlog_core::{AsyncLogSink, LogRecord, Logger, ScopeFrame, Severity};

/// Backend that takes a while per record, like a remote collector would.
struct SlowBackend;

#[async_trait]
impl AsyncLogSink for SlowBackend {
    async fn send(&self, _record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        sleep(Duration::from_micros(20)).await;
        Ok(())
    }
}

async fn run(name: &str, backend: Arc<dyn AsyncLogSink>, config: BatchConfig) -> Result<(), Box<dyn Error>> {
    let (sink, worker) = BatchingSink::new(backend, config);
    let sink = Arc::new(sink);
    let logger = Logger::builder()
        .category(name)
        .minimum_level(Severity::Information)
        .sink("batching", sink.clone())
        .build();

    let n: u64 = 100_000;
    let start = Instant::now();
    {
        let _scope = logger.begin_scope(ScopeFrame::new().with("Run", name));
        for i in 0..n {
            logger.error("load test error {Iteration}", &[i.into()]);
        }
    }
    let elapsed = start.elapsed();

    let counters = sink.counters();
    println!(
        "{}: emitted {} records in {:?} (~{:.0} rec/s), enqueued {}, dropped {}",
        name,
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        counters.enqueued.load(Ordering::Relaxed),
        counters.dropped.load(Ordering::Relaxed),
    );

    // The worker drains once the last handle to the sink is gone.
    drop(logger);
    drop(sink);
    worker.await?;
    println!(
        "{}: delivered {}, failed {}",
        name,
        counters.delivered.load(Ordering::Relaxed),
        counters.failed.load(Ordering::Relaxed),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing_with_config(
        &Logger::builder().sink("noop", Arc::new(NoopSink)).build(),
        TracingConfig { bridge_events: false, enable_stdout: true },
    )?;

    run("default", Arc::new(NoopSink), BatchConfig::default()).await?;
    run(
        "slow-backend",
        Arc::new(SlowBackend),
        BatchConfig {
            channel_buffer: 50_000,
            batch_size: 1_000,
            flush_interval: Duration::from_millis(200),
            max_attempts: 3,
        },
    )
    .await?;
    Ok(())
}
