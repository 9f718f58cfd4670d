use crate::error::ErrorChain;
use crate::level::Severity;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// How a placeholder argument was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capture {
    /// No marker: scalars kept, nested structures stringified.
    Default,
    /// `{@Name}`: the argument is preserved as a structured value.
    Structured,
    /// `{$Name}`: the argument is always converted to its display text.
    Stringify,
}

/// One bound placeholder of a rendered template.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
    pub capture: Capture,
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Field", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", self.value.type_tag())?;
        state.serialize_field("value", &self.value)?;
        state.serialize_field("capture", &self.capture)?;
        state.end()
    }
}

/// A finished log event, as handed to every registered sink.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Severity,
    pub category: String,
    pub template: String,
    pub message: String,
    pub fields: Vec<Field>,
    pub scope: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scope_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorChain>,
    pub malformed: bool,
}

impl LogRecord {
    /// Value bound to the named placeholder, if any.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Value from the merged scope context.
    pub fn scope_value(&self, name: &str) -> Option<&Value> {
        self.scope.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_fields_with_type_tags() {
        let record = LogRecord {
            timestamp: Utc::now(),
            level: Severity::Warning,
            category: "tests".into(),
            template: "Took {Elapsed}ms".into(),
            message: "Took 1500ms".into(),
            fields: vec![Field { name: "Elapsed".into(), value: Value::Integer(1500), capture: Capture::Default }],
            scope: BTreeMap::new(),
            scope_messages: Vec::new(),
            error: None,
            malformed: false,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "Warning");
        assert_eq!(json["fields"][0]["type"], "integer");
        assert_eq!(json["fields"][0]["value"], 1500);
        assert_eq!(json["fields"][0]["capture"], "default");
        assert!(json.get("error").is_none());
        assert_eq!(record.field("Elapsed"), Some(&Value::Integer(1500)));
    }
}
