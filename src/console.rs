use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::Mutex;

/// Output layout of [`ConsoleSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One human-readable line per record, plus one line per error link.
    #[default]
    Text,
    /// One JSON object per line, the serialized [`LogRecord`].
    Json,
}

impl std::str::FromStr for ConsoleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ConsoleFormat::Text),
            "json" => Ok(ConsoleFormat::Json),
            other => Err(format!("unknown console format: {:?}", other)),
        }
    }
}

/// Writes records to stdout, or any other writer.
pub struct ConsoleSink {
    format: ConsoleFormat,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout(format: ConsoleFormat) -> Self {
        Self::with_writer(format, Box::new(io::stdout()))
    }

    pub fn with_writer(format: ConsoleFormat, writer: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            writer: Mutex::new(writer),
        }
    }

    pub fn format(&self) -> ConsoleFormat {
        self.format
    }
}

/// Render a record the way [`ConsoleFormat::Text`] prints it.
pub fn format_text(record: &LogRecord) -> String {
    let mut line = format!(
        "{} {} [{}] ",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        record.level.short_name(),
        record.category,
    );
    if !record.scope_messages.is_empty() {
        line.push_str(&record.scope_messages.join(" => "));
        line.push_str(" => ");
    }
    line.push_str(&record.message);

    if !record.scope.is_empty() {
        let scope: Vec<String> = record.scope.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        line.push_str(&format!(" {{{}}}", scope.join(", ")));
    }
    if record.malformed {
        line.push_str(" (malformed template)");
    }

    if let Some(chain) = &record.error {
        for (depth, link) in chain.descriptors.iter().enumerate() {
            let arrow = "-".repeat(depth * 2 + 1);
            line.push_str(&format!("\n  {}> {}: {}", arrow, link.type_name, link.message));
            if !link.context.is_empty() {
                let context: Vec<String> = link.context.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                line.push_str(&format!(" [{}]", context.join(", ")));
            }
        }
        if chain.cycle_detected {
            line.push_str("\n  (error chain cycle detected)");
        }
        if chain.truncated {
            line.push_str("\n  (error chain truncated)");
        }
    }
    line
}

impl LogSink for ConsoleSink {
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let line = match self.format {
            ConsoleFormat::Text => format_text(record),
            ConsoleFormat::Json => serde_json::to_string(record)?,
        };
        let mut writer = self.writer.lock().map_err(|_| SinkError::Other("console writer poisoned".into()))?;
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().map_err(|_| SinkError::Other("console writer poisoned".into()))?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainError, ErrorChain};
    use crate::level::Severity;
    use crate::value::Value;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record() -> LogRecord {
        let mut scope = BTreeMap::new();
        scope.insert("OrderId".to_string(), Value::from("ORD456"));
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            level: Severity::Error,
            category: "Orders".into(),
            template: "Business logic error for {UserId}".into(),
            message: "Business logic error for USER123".into(),
            fields: Vec::new(),
            scope,
            scope_messages: vec!["SubOperation:Validation".into()],
            error: Some(ErrorChain::capture(
                &DomainError::generic("InvalidOperation", "Customer credit limit exceeded"),
            )),
            malformed: false,
        }
    }

    #[test]
    fn text_layout() {
        let text = format_text(&record());
        assert_eq!(
            text,
            "2024-05-01T12:00:00.000Z FAIL [Orders] SubOperation:Validation => \
             Business logic error for USER123 {OrderId=ORD456}\n  -> InvalidOperation: Customer credit limit exceeded"
        );
    }

    #[test]
    fn json_lines() {
        let buf = SharedBuf::default();
        let sink = ConsoleSink::with_writer(ConsoleFormat::Json, Box::new(buf.clone()));
        sink.emit(&record()).unwrap();
        sink.emit(&record()).unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["level"], "Error");
        assert_eq!(json["scope"]["OrderId"], "ORD456");
        assert_eq!(json["error"]["descriptors"][0]["type_name"], "InvalidOperation");
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("JSON".parse::<ConsoleFormat>().unwrap(), ConsoleFormat::Json);
        assert!("xml".parse::<ConsoleFormat>().is_err());
    }
}
