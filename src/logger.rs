use crate::config::LoggerConfig;
use crate::console::ConsoleSink;
use crate::error::ErrorChain;
use crate::format::FormatterRegistry;
use crate::level::{self, Severity};
use crate::metrics::{BatchStats, PerformanceSample, PhaseReport};
use crate::record::{Field, LogRecord};
use crate::scope::{self, ScopeFrame, ScopeGuard};
use crate::sink::LogSink;
use crate::template::MessageTemplate;
use crate::value::Value;
use chrono::Utc;
use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Log at a level, evaluating the arguments only if the level is enabled.
///
/// ```ignore
/// log!(logger, Severity::Debug, "Expensive debug data: {Data}", build_report());
/// log!(logger, Severity::Error, error = &err, "Order {OrderId} failed", order_id);
/// ```
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, error = $err:expr, $template:expr $(, $arg:expr)* $(,)?) => {{
        let logger = &$logger;
        let level = $level;
        if logger.is_enabled(level) {
            logger.write(level, Some($err), $template, &[$($crate::Value::from($arg)),*]);
        }
    }};
    ($logger:expr, $level:expr, $template:expr $(, $arg:expr)* $(,)?) => {{
        let logger = &$logger;
        let level = $level;
        if logger.is_enabled(level) {
            logger.write(level, None, $template, &[$($crate::Value::from($arg)),*]);
        }
    }};
}

struct SinkSlot {
    name: String,
    sink: Arc<dyn LogSink>,
    failures: AtomicU64,
    reported: AtomicBool,
}

impl SinkSlot {
    fn record_failure(&self, reason: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if !self.reported.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                sink = %self.name,
                error = %reason,
                "log sink failed; further failures of this sink are only counted"
            );
        }
    }
}

struct Shared {
    minimum_level: Severity,
    sinks: Vec<SinkSlot>,
    formatters: FormatterRegistry,
    max_error_depth: Option<usize>,
}

/// Entry point for emitting records.
///
/// Cloning is cheap; clones and [`for_category`](Self::for_category)
/// loggers share the minimum level, sinks and formatter registry, which are
/// fixed once the logger is built.
#[derive(Clone)]
pub struct Logger {
    category: Arc<str>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .field("minimum_level", &self.shared.minimum_level)
            .field("sinks", &self.shared.sinks.iter().map(|s| s.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// A logger with another category sharing this one's configuration.
    pub fn for_category(&self, category: impl Into<String>) -> Logger {
        Logger {
            category: Arc::from(category.into()),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn minimum_level(&self) -> Severity {
        self.shared.minimum_level
    }

    /// Whether a record at `level` would reach the sinks. Call this before
    /// building expensive arguments.
    #[inline]
    pub fn is_enabled(&self, level: Severity) -> bool {
        level::is_enabled(level, self.shared.minimum_level) && !self.shared.sinks.is_empty()
    }

    /// Render, enrich and dispatch one record if `level` is enabled.
    pub fn write(
        &self,
        level: Severity,
        error: Option<&(dyn Error + 'static)>,
        template: &str,
        args: &[Value],
    ) {
        if !self.is_enabled(level) {
            return;
        }
        let record = self.build_record(level, error, template, args);
        self.dispatch(&record);
    }

    pub fn log(&self, level: Severity, template: &str, args: &[Value]) {
        self.write(level, None, template, args);
    }

    /// Like [`log`](Self::log), but `args` is only called when the level is
    /// enabled.
    pub fn log_with<F>(&self, level: Severity, template: &str, args: F)
    where
        F: FnOnce() -> Vec<Value>,
    {
        if self.is_enabled(level) {
            let args = args();
            self.write(level, None, template, &args);
        }
    }

    pub fn log_error(&self, level: Severity, error: &(dyn Error + 'static), template: &str, args: &[Value]) {
        self.write(level, Some(error), template, args);
    }

    pub fn trace(&self, template: &str, args: &[Value]) {
        self.log(Severity::Trace, template, args);
    }

    pub fn debug(&self, template: &str, args: &[Value]) {
        self.log(Severity::Debug, template, args);
    }

    pub fn info(&self, template: &str, args: &[Value]) {
        self.log(Severity::Information, template, args);
    }

    pub fn warn(&self, template: &str, args: &[Value]) {
        self.log(Severity::Warning, template, args);
    }

    pub fn error(&self, template: &str, args: &[Value]) {
        self.log(Severity::Error, template, args);
    }

    pub fn critical(&self, template: &str, args: &[Value]) {
        self.log(Severity::Critical, template, args);
    }

    pub fn log_sample(&self, level: Severity, sample: &PerformanceSample) {
        self.log_with(
            level,
            "Operation {OperationName} completed in {Duration}ms, {ItemsProcessed} items ({Throughput:F2} items/sec) {@Metrics}",
            || {
                vec![
                    Value::from(sample.operation_name.as_str()),
                    Value::from(sample.elapsed.as_millis() as u64),
                    Value::from(sample.items_processed),
                    Value::Float(sample.throughput_per_second()),
                    Value::from(sample),
                ]
            },
        );
    }

    pub fn log_phases(&self, level: Severity, report: &PhaseReport) {
        self.log_with(
            level,
            "Operation {OperationName} completed in {TotalDuration}ms over {PhaseCount} phases ({Throughput:F2} items/sec) {@Phases}",
            || {
                vec![
                    Value::from(report.overall.operation_name.as_str()),
                    Value::from(report.overall.elapsed.as_millis() as u64),
                    Value::from(report.phases.len()),
                    Value::Float(report.overall.throughput_per_second()),
                    Value::from(report),
                ]
            },
        );
    }

    pub fn log_batch(&self, level: Severity, batch_id: &str, stats: &BatchStats) {
        self.log_with(
            level,
            "Batch processing {BatchId} completed: {ProcessedItems} items processed, {Errors} errors, \
             {SuccessRate:F1}% success rate, {OverallThroughput:F2} items/sec, Total duration: {TotalDuration}ms",
            || {
                vec![
                    Value::from(batch_id),
                    Value::from(stats.processed),
                    Value::from(stats.errors),
                    Value::Float(stats.success_rate()),
                    Value::Float(stats.throughput()),
                    Value::from(stats.elapsed.as_millis() as u64),
                ]
            },
        );
    }

    /// Push a key/value scope onto the current execution context.
    pub fn begin_scope(&self, frame: ScopeFrame) -> ScopeGuard {
        scope::begin(frame)
    }

    /// Push a template-form scope, e.g. `"UserId:{UserId}"`.
    pub fn begin_scope_template(&self, template: &str, args: &[Value]) -> ScopeGuard {
        scope::begin(ScopeFrame::from_template_with(template, args, &self.shared.formatters))
    }

    /// Build a record without gating or dispatching it.
    pub fn build_record(
        &self,
        level: Severity,
        error: Option<&(dyn Error + 'static)>,
        template: &str,
        args: &[Value],
    ) -> LogRecord {
        let rendered = MessageTemplate::parse(template).render(args, &self.shared.formatters);
        let error = error.map(|e| match self.shared.max_error_depth {
            Some(max) => ErrorChain::capture_with_limit(e, max),
            None => ErrorChain::capture(e),
        });
        let scope = scope::snapshot();

        LogRecord {
            timestamp: Utc::now(),
            level,
            category: self.category.to_string(),
            template: template.to_string(),
            message: rendered.text,
            fields: rendered.fields,
            scope: scope.properties,
            scope_messages: scope.messages,
            error,
            malformed: rendered.malformed,
        }
    }

    /// Build a record from an already-rendered message, e.g. one coming
    /// from another logging facade.
    pub fn record_from_fields(
        &self,
        level: Severity,
        category: &str,
        message: String,
        fields: Vec<Field>,
    ) -> LogRecord {
        let scope = scope::snapshot();
        LogRecord {
            timestamp: Utc::now(),
            level,
            category: category.to_string(),
            template: message.clone(),
            message,
            fields,
            scope: scope.properties,
            scope_messages: scope.messages,
            error: None,
            malformed: false,
        }
    }

    /// Hand `record` to every sink. Sink errors and panics are contained
    /// per sink and never reach the caller.
    pub fn dispatch(&self, record: &LogRecord) {
        for slot in &self.shared.sinks {
            match panic::catch_unwind(AssertUnwindSafe(|| slot.sink.emit(record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => slot.record_failure(&e.to_string()),
                Err(payload) => slot.record_failure(&panic_message(payload.as_ref())),
            }
        }
    }

    pub fn flush(&self) {
        for slot in &self.shared.sinks {
            match panic::catch_unwind(AssertUnwindSafe(|| slot.sink.flush())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => slot.record_failure(&e.to_string()),
                Err(payload) => slot.record_failure(&panic_message(payload.as_ref())),
            }
        }
    }

    /// Failure count per registered sink, in registration order.
    pub fn sink_failures(&self) -> Vec<(String, u64)> {
        self.shared
            .sinks
            .iter()
            .map(|s| (s.name.clone(), s.failures.load(Ordering::Relaxed)))
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("sink panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("sink panicked: {}", s)
    } else {
        "sink panicked".to_string()
    }
}

/// Builder for [`Logger`]. Everything set here is immutable afterwards.
pub struct LoggerBuilder {
    category: String,
    minimum_level: Severity,
    sinks: Vec<(String, Arc<dyn LogSink>)>,
    formatters: FormatterRegistry,
    max_error_depth: Option<usize>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            category: "app".to_string(),
            minimum_level: Severity::default(),
            sinks: Vec::new(),
            formatters: FormatterRegistry::standard(),
            max_error_depth: None,
        }
    }

    /// Start from a loaded [`LoggerConfig`]; adds a console sink when the
    /// config asks for one.
    pub fn from_config(config: &LoggerConfig) -> Self {
        let mut builder = Self::new()
            .category(config.category.clone())
            .minimum_level(config.minimum_level);
        builder.max_error_depth = config.max_error_depth;
        if let Some(format) = config.console {
            builder = builder.sink("console", Arc::new(ConsoleSink::stdout(format)));
        }
        builder
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn minimum_level(mut self, level: Severity) -> Self {
        self.minimum_level = level;
        self
    }

    /// Register a sink. Every record that passes the gate goes to every
    /// registered sink.
    pub fn sink(mut self, name: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push((name.into(), sink));
        self
    }

    pub fn formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn max_error_depth(mut self, depth: usize) -> Self {
        self.max_error_depth = Some(depth);
        self
    }

    pub fn build(self) -> Logger {
        let sinks = self
            .sinks
            .into_iter()
            .map(|(name, sink)| SinkSlot {
                name,
                sink,
                failures: AtomicU64::new(0),
                reported: AtomicBool::new(false),
            })
            .collect();

        Logger {
            category: Arc::from(self.category),
            shared: Arc::new(Shared {
                minimum_level: self.minimum_level,
                sinks,
                formatters: self.formatters,
                max_error_depth: self.max_error_depth,
            }),
        }
    }
}
