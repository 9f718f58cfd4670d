use std::error::Error;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use structlog_core::config::LoggerConfig;
use structlog_core::console::{ConsoleFormat, ConsoleSink};
use structlog_core::metrics::{time_all, BatchTracker};
use structlog_core::value::to_structured;
use structlog_core::{
    log, BatchStats, DomainError, LoggerBuilder, PerformanceSample, PhaseTimer, ScopeFrame, Severity, Stopwatch, Value,
};

#[derive(serde::Serialize)]
struct Order {
    id: &'static str,
    total: f64,
    lines: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut config = LoggerConfig::from_env()?;
    config.console = None;
    let logger = LoggerBuilder::from_config(&config)
        .minimum_level(Severity::Debug)
        .sink("console", Arc::new(ConsoleSink::stdout(ConsoleFormat::Text)))
        .build();

    // Gating and lazy arguments.
    logger.trace("never shown {Value}", &[1.into()]);
    log!(logger, Severity::Trace, "Expensive debug data: {Data}", expensive());
    logger.info("Application started at {StartTime:yyyy-MM-dd HH:mm:ss}", &[chrono::Utc::now().into()]);

    // Templates and captures.
    let order = Order { id: "ORD456", total: 1234.5, lines: 3 };
    logger.info(
        "Order {OrderId} worth {Total:C} with {Lines} lines: {@Order}",
        &[order.id.into(), order.total.into(), order.lines.into(), to_structured(&order)],
    );
    logger.info("Ratio {Ratio:P1}, hex {Code:X4}, stringified {$Order}", &[
        0.456.into(),
        255.into(),
        to_structured(&order),
    ]);

    // Nested scopes.
    {
        let _order = logger.begin_scope(ScopeFrame::new().with("OrderId", "ORD456").with("UserId", "USER123"));
        logger.info("Processing order", &[]);
        {
            let _step = logger.begin_scope_template("SubOperation:{Step}", &[Value::from("Validation")]);
            logger.debug("Validating {LineCount} lines", &[3.into()]);
        }
        logger.info("Order processed", &[]);
    }

    // Error chains.
    let root = std::io::Error::new(std::io::ErrorKind::TimedOut, "Connection timeout after 30 seconds");
    let err = DomainError::business_rule(
        "CREDIT_LIMIT",
        "Customer credit limit exceeded",
        [("CustomerId", Value::from("CUST-7")), ("Limit", Value::from(5000))],
    )
    .caused_by(DomainError::generic("DatabaseUnavailable", "Could not load customer").caused_by(root));
    log!(logger, Severity::Error, error = &err, "Business logic error while processing order {OrderId}", "ORD456");

    let invalid = DomainError::validation("Order validation failed")
        .with_field_error("Quantity", "-1", "must be positive")
        .with_field_error("Email", "not-an-email", "invalid format");
    logger.log_error(Severity::Warning, &invalid, "Rejected order {OrderId}", &["ORD789".into()]);

    // Timing and phases.
    let perf = logger.for_category("PerformanceDemo");
    let mut timer = PhaseTimer::start("DataImport");
    timer.time("Load", || sleep(Duration::from_millis(50)));
    timer.time("Transform", || sleep(Duration::from_millis(100)));
    timer.time("Save", || sleep(Duration::from_millis(25)));
    perf.log_phases(Severity::Information, &timer.finish(1000));

    let mut sw = Stopwatch::start();
    sleep(Duration::from_millis(20));
    perf.log_sample(Severity::Information, &PerformanceSample::new("Checksum", sw.stop(), 250).with_memory(4096));

    // Batches.
    let mut tracker = BatchTracker::new();
    let mut overall = Stopwatch::start();
    for (i, errors) in [0u64, 3, 1].into_iter().enumerate() {
        let mut sw = Stopwatch::start();
        sleep(Duration::from_millis(10));
        let stats = tracker.record(BatchStats::new(50, errors, sw.stop()));
        perf.log_batch(Severity::Debug, &format!("BATCH-{}", i + 1), stats);
    }
    perf.log_batch(Severity::Information, "ALL", &tracker.totals(overall.stop()));

    // Concurrent tasks inherit the caller's scope and time independently.
    let _run = logger.begin_scope(ScopeFrame::new().with("RunId", "RUN-1"));
    let jobs = (1..=3u64)
        .map(|n| {
            let logger = logger.clone();
            async move {
                let _task = logger.begin_scope(ScopeFrame::new().with("Task", n));
                tokio::time::sleep(Duration::from_millis(10 * n)).await;
                logger.info("Task {Task} finished", &[n.into()]);
                n * 10
            }
        })
        .collect();
    let (results, report) = time_all(jobs).await?;
    logger.info("Fan-out results {@Results} in {Overall}", &[results.into(), report.overall.into()]);

    logger.flush();
    Ok(())
}

fn expensive() -> &'static str {
    println!("this line must never print");
    "Complex debug data"
}
