use crate::level::Severity;
use crate::logger::Logger;
use crate::record::{Capture, Field};
use crate::value::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::field::{self, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events whose target starts with this prefix come from the crate itself
/// (sink diagnostics, [`TracingSink`](crate::tracing_sink::TracingSink)) and
/// are never turned back into records.
pub const INTERNAL_TARGET_PREFIX: &str = "structlog_core";

/// Event counters of a [`RecordLayer`].
#[derive(Debug, Default)]
pub struct BridgeCounters {
    /// Events seen by the layer, before any filtering.
    pub total: AtomicU64,
    /// Events turned into records and dispatched.
    pub forwarded: AtomicU64,
}

/// `tracing_subscriber` layer that turns `tracing` events into
/// [`LogRecord`](crate::record::LogRecord)s and dispatches them through a
/// [`Logger`].
///
/// The event target becomes the record category, the `message` field the
/// rendered message, and every other field a record field. The logger's
/// minimum level and the active scope stack apply as for direct calls.
pub struct RecordLayer {
    logger: Logger,
    counters: Arc<BridgeCounters>,
}

impl RecordLayer {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            counters: Arc::new(BridgeCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<BridgeCounters> {
        Arc::clone(&self.counters)
    }
}

impl<S> Layer<S> for RecordLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if meta.target().starts_with(INTERNAL_TARGET_PREFIX) {
            return;
        }
        let level = Severity::from(meta.level());
        if !self.logger.is_enabled(level) {
            return;
        }

        let mut fields = Vec::new();
        let mut message: Option<String> = None;
        event.record(&mut FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        });

        let record = self
            .logger
            .record_from_fields(level, meta.target(), message.unwrap_or_default(), fields);
        self.logger.dispatch(&record);
        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
    }
}

struct FieldVisitor<'a> {
    fields: &'a mut Vec<Field>,
    message: &'a mut Option<String>,
}

impl FieldVisitor<'_> {
    fn push(&mut self, field: &field::Field, value: Value) {
        self.fields.push(Field {
            name: field.name().to_string(),
            value,
            capture: Capture::Default,
        });
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.push(field, Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.push(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.push(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &field::Field, value: f64) {
        self.push(field, Value::Float(value));
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.push(field, Value::from(value));
    }

    fn record_error(&mut self, field: &field::Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn std::fmt::Debug) {
        // `format_args!` messages arrive here, not through `record_str`.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.push(field, Value::String(format!("{:?}", value)));
        }
    }
}
