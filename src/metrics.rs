//! Performance metrics computed from measured durations.
//!
//! Everything here is plain arithmetic over `Duration`s handed in by the
//! caller. Division by zero is defined, not an error: throughput over a zero
//! duration and success rate over zero processed items are both `0.0`.

use crate::scope::{self, ScopeStack};
use crate::timing::{Clock, Stopwatch, SystemClock};
use crate::value::Value;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Items per second; `0.0` when `elapsed` is zero.
pub fn throughput(items: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        0.0
    } else {
        items as f64 / secs
    }
}

/// Percentage of successful items; `0.0` when nothing was processed.
pub fn success_rate(processed: u64, errors: u64) -> f64 {
    if processed == 0 {
        0.0
    } else {
        processed.saturating_sub(errors) as f64 / processed as f64 * 100.0
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub operation_name: String,
    pub elapsed: Duration,
    pub items_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
}

impl PerformanceSample {
    pub fn new(operation_name: impl Into<String>, elapsed: Duration, items_processed: u64) -> Self {
        Self {
            operation_name: operation_name.into(),
            elapsed,
            items_processed,
            memory_bytes: None,
        }
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    pub fn throughput_per_second(&self) -> f64 {
        throughput(self.items_processed, self.elapsed)
    }
}

impl From<&PerformanceSample> for Value {
    fn from(s: &PerformanceSample) -> Self {
        let mut members = vec![
            ("OperationName".to_string(), Value::from(s.operation_name.as_str())),
            ("DurationMs".to_string(), Value::Float(millis(s.elapsed))),
            ("ItemsProcessed".to_string(), Value::from(s.items_processed)),
            ("ThroughputPerSecond".to_string(), Value::Float(s.throughput_per_second())),
        ];
        if let Some(bytes) = s.memory_bytes {
            members.push(("MemoryBytes".to_string(), Value::from(bytes)));
        }
        Value::Structured(members)
    }
}

/// One phase of a multi-phase operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSample {
    pub name: String,
    pub elapsed: Duration,
    /// Percentage of the overall duration; `0.0` when overall is zero.
    pub share_of_total: f64,
    pub throughput_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub phases: Vec<PhaseSample>,
    pub overall: PerformanceSample,
}

impl PhaseReport {
    pub fn phase(&self, name: &str) -> Option<&PhaseSample> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Sum of the phase durations; may differ from the overall duration.
    pub fn phases_total(&self) -> Duration {
        self.phases.iter().map(|p| p.elapsed).sum()
    }
}

impl From<&PhaseReport> for Value {
    fn from(r: &PhaseReport) -> Self {
        let phases = r
            .phases
            .iter()
            .map(|p| {
                Value::structured([
                    ("Name", Value::from(p.name.as_str())),
                    ("DurationMs", Value::Float(millis(p.elapsed))),
                    ("SharePercent", Value::Float(p.share_of_total)),
                ])
            })
            .collect::<Vec<_>>();
        let mut overall = Value::from(&r.overall);
        if let Value::Structured(members) = &mut overall {
            members.push(("Phases".to_string(), Value::Sequence(phases)));
        }
        overall
    }
}

/// Collects named phase durations for one operation.
pub struct PhaseTimer {
    operation_name: String,
    clock: Arc<dyn Clock>,
    overall: Stopwatch,
    phases: Vec<(String, Duration)>,
}

impl PhaseTimer {
    pub fn start(operation_name: impl Into<String>) -> Self {
        Self::start_with(operation_name, Arc::new(SystemClock))
    }

    pub fn start_with(operation_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            operation_name: operation_name.into(),
            overall: Stopwatch::start_with(Arc::clone(&clock)),
            clock,
            phases: Vec::new(),
        }
    }

    /// Record a phase measured elsewhere.
    pub fn record(&mut self, name: impl Into<String>, elapsed: Duration) -> &mut Self {
        self.phases.push((name.into(), elapsed));
        self
    }

    /// Run `f` as a phase on its own stopwatch.
    pub fn time<T>(&mut self, name: impl Into<String>, f: impl FnOnce() -> T) -> T {
        let mut sw = Stopwatch::start_with(Arc::clone(&self.clock));
        let out = f();
        let elapsed = sw.stop();
        self.record(name, elapsed);
        out
    }

    pub fn phases(&self) -> &[(String, Duration)] {
        &self.phases
    }

    /// Stop the overall stopwatch and build the report.
    pub fn finish(mut self, items_processed: u64) -> PhaseReport {
        let overall = self.overall.stop();
        summarize(self.operation_name, self.phases, overall, items_processed)
    }
}

/// Build a report from already-measured phase and overall durations.
pub fn summarize(
    operation_name: impl Into<String>,
    phases: Vec<(String, Duration)>,
    overall: Duration,
    items_processed: u64,
) -> PhaseReport {
    let total = overall.as_secs_f64();
    let phases = phases
        .into_iter()
        .map(|(name, elapsed)| PhaseSample {
            share_of_total: if total == 0.0 { 0.0 } else { elapsed.as_secs_f64() / total * 100.0 },
            throughput_per_second: throughput(items_processed, elapsed),
            name,
            elapsed,
        })
        .collect();

    PhaseReport {
        phases,
        overall: PerformanceSample::new(operation_name, overall, items_processed),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub processed: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn new(processed: u64, errors: u64, elapsed: Duration) -> Self {
        Self { processed, errors, elapsed }
    }

    pub fn success_rate(&self) -> f64 {
        success_rate(self.processed, self.errors)
    }

    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            100.0 - self.success_rate()
        }
    }

    pub fn throughput(&self) -> f64 {
        throughput(self.processed, self.elapsed)
    }
}

impl From<&BatchStats> for Value {
    fn from(b: &BatchStats) -> Self {
        Value::structured([
            ("Processed", Value::from(b.processed)),
            ("Errors", Value::from(b.errors)),
            ("DurationMs", Value::Float(millis(b.elapsed))),
            ("SuccessRate", Value::Float(b.success_rate())),
            ("ItemsPerSecond", Value::Float(b.throughput())),
        ])
    }
}

/// Accumulates per-batch statistics for a batched run.
#[derive(Debug, Clone, Default)]
pub struct BatchTracker {
    batches: Vec<BatchStats>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, batch: BatchStats) -> &BatchStats {
        self.batches.push(batch);
        &self.batches[self.batches.len() - 1]
    }

    pub fn batches(&self) -> &[BatchStats] {
        &self.batches
    }

    /// Totals across batches, measured against `overall` rather than the
    /// sum of batch durations.
    pub fn totals(&self, overall: Duration) -> BatchStats {
        BatchStats {
            processed: self.batches.iter().map(|b| b.processed).sum(),
            errors: self.batches.iter().map(|b| b.errors).sum(),
            elapsed: overall,
        }
    }
}

/// Durations of concurrently timed sub-operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanOutReport {
    /// Per-task durations in input order.
    pub tasks: Vec<Duration>,
    pub overall: Duration,
}

impl FanOutReport {
    pub fn slowest(&self) -> Option<Duration> {
        self.tasks.iter().copied().max()
    }

    pub fn fastest(&self) -> Option<Duration> {
        self.tasks.iter().copied().min()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TimingError {
    #[error("timed task {index} did not complete: {source}")]
    TaskFailed {
        index: usize,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Await `fut` and return its output with the time it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let mut sw = Stopwatch::start();
    let out = fut.await;
    (out, sw.stop())
}

/// Run every future on its own task and wait for all of them.
///
/// Each task gets an independent stopwatch and its own scope stack, forked
/// from the caller's context at spawn time. Results come back in input
/// order, only after every task finished. If any task panicked or was
/// cancelled, the first such failure is returned once all tasks are done.
pub async fn time_all<F, T>(futures: Vec<F>) -> Result<(Vec<T>, FanOutReport), TimingError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut overall = Stopwatch::start();

    let handles: Vec<_> = futures
        .into_iter()
        .map(|fut| tokio::spawn(scope::scoped_with(ScopeStack::fork_current(), timed(fut))))
        .collect();

    let mut outputs = Vec::with_capacity(handles.len());
    let mut durations = Vec::with_capacity(handles.len());
    let mut first_error = None;

    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok((out, elapsed)) => {
                outputs.push(out);
                durations.push(elapsed);
            }
            Err(source) => {
                if first_error.is_none() {
                    first_error = Some(TimingError::TaskFailed { index, source });
                }
            }
        }
    }

    let overall = overall.stop();
    match first_error {
        Some(err) => Err(err),
        None => Ok((
            outputs,
            FanOutReport {
                tasks: durations,
                overall,
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{begin, current_context, ScopeFrame};
    use crate::timing::ManualClock;

    #[test]
    fn zero_duration_throughput_is_zero() {
        assert_eq!(throughput(1000, Duration::ZERO), 0.0);
        let sample = PerformanceSample::new("Noop", Duration::ZERO, 10);
        assert_eq!(sample.throughput_per_second(), 0.0);
    }

    #[test]
    fn zero_processed_success_rate_is_zero() {
        let stats = BatchStats::new(0, 0, Duration::from_millis(10));
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.error_rate(), 0.0);
        assert_eq!(BatchStats::default().throughput(), 0.0);
    }

    #[test]
    fn batch_success_rate() {
        let stats = BatchStats::new(50, 3, Duration::from_millis(500));
        assert!((stats.success_rate() - 94.0).abs() < 1e-9);
        assert!((stats.error_rate() - 6.0).abs() < 1e-9);
        assert!((stats.throughput() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn multi_phase_throughput() {
        let clock = ManualClock::new();
        let mut timer = PhaseTimer::start_with("ComplexDataProcessing", clock.clone());
        for (name, ms) in [("Load", 50), ("Process", 100), ("Validate", 25)] {
            timer.time(name, || clock.advance(Duration::from_millis(ms)));
        }
        clock.advance(Duration::from_millis(5));
        let report = timer.finish(1000);

        assert_eq!(report.overall.elapsed, Duration::from_millis(180));
        assert!((report.overall.throughput_per_second() - 5555.555).abs() < 0.1);
        assert_eq!(report.phases_total(), Duration::from_millis(175));
        let process = report.phase("Process").unwrap();
        assert!((process.share_of_total - 100.0 / 180.0 * 100.0).abs() < 1e-9);
        assert!((process.throughput_per_second - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn summarize_zero_overall() {
        let report = summarize("Empty", vec![("Only".into(), Duration::ZERO)], Duration::ZERO, 5);
        assert_eq!(report.phases[0].share_of_total, 0.0);
        assert_eq!(report.phases[0].throughput_per_second, 0.0);
        assert_eq!(report.overall.throughput_per_second(), 0.0);
    }

    #[test]
    fn tracker_totals_use_overall_duration() {
        let mut tracker = BatchTracker::new();
        for errors in [0, 1, 0, 2, 0] {
            tracker.record(BatchStats::new(10, errors, Duration::from_millis(50)));
        }
        let totals = tracker.totals(Duration::from_millis(500));
        assert_eq!(totals.processed, 50);
        assert_eq!(totals.errors, 3);
        assert!((totals.success_rate() - 94.0).abs() < 1e-9);
        assert!((totals.throughput() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn sample_converts_to_structured_value() {
        let sample = PerformanceSample::new("Import", Duration::from_millis(500), 50).with_memory(1024);
        let value = Value::from(&sample);
        assert_eq!(value.get("ItemsProcessed"), Some(&Value::Integer(50)));
        assert_eq!(value.get("ThroughputPerSecond"), Some(&Value::Float(100.0)));
        assert_eq!(value.get("MemoryBytes"), Some(&Value::Integer(1024)));
    }

    #[tokio::test]
    async fn time_all_waits_for_every_task() {
        let _op = begin(ScopeFrame::new().with("OperationId", "OP-1"));
        let futures: Vec<_> = [30u64, 5, 15]
            .into_iter()
            .map(|ms| async move {
                let _task = begin(ScopeFrame::new().with("DelayMs", ms));
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let ctx = current_context();
                (ms, ctx.contains_key("OperationId"), ctx.len())
            })
            .collect();

        let (outputs, report) = time_all(futures).await.unwrap();
        assert_eq!(outputs.iter().map(|o| o.0).collect::<Vec<_>>(), [30, 5, 15]);
        assert!(outputs.iter().all(|o| o.1 && o.2 == 2));
        assert_eq!(report.task_count(), 3);
        assert!(report.slowest().unwrap() >= Duration::from_millis(30));
        assert!(report.overall >= report.slowest().unwrap());
        // The parent's stack only has its own frame.
        assert_eq!(current_context().len(), 1);
    }

    #[tokio::test]
    async fn time_all_reports_panicked_task() {
        let futures: Vec<std::pin::Pin<Box<dyn Future<Output = u8> + Send>>> = vec![
            Box::pin(async { 1 }),
            Box::pin(async {
                if true {
                    panic!("task blew up");
                }
                2
            }),
        ];
        let err = time_all(futures).await.unwrap_err();
        assert!(matches!(err, TimingError::TaskFailed { index: 1, .. }));
    }
}
