//! Error-chain capture.
//!
//! [`ErrorChain::capture`] walks `Error::source` links from the outermost
//! error to the root cause and records each link's type name, message and
//! structured context. Links that are a [`DomainError`] contribute their
//! validation errors or business-rule payload verbatim.

use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub value: String,
    pub error: String,
}

impl From<&FieldError> for Value {
    fn from(e: &FieldError) -> Self {
        Value::structured([
            ("Field", e.field.as_str()),
            ("Value", e.value.as_str()),
            ("Error", e.error.as_str()),
        ])
    }
}

/// What kind of domain error this is, with its structured payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Generic { type_name: String },
    Validation(Vec<FieldError>),
    BusinessRule { code: String, context: Vec<(String, Value)> },
}

impl ErrorKind {
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Generic { type_name } => type_name,
            ErrorKind::Validation(_) => "ValidationError",
            ErrorKind::BusinessRule { .. } => "BusinessRuleViolation",
        }
    }
}

/// Application error carrying a kind, a message and an optional cause.
#[derive(Debug, Clone)]
pub struct DomainError {
    kind: ErrorKind,
    message: String,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl DomainError {
    pub fn generic(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Generic { type_name: type_name.into() },
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation(Vec::new()),
            message: message.into(),
            source: None,
        }
    }

    pub fn business_rule<K, V, I>(code: impl Into<String>, message: impl Into<String>, context: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            kind: ErrorKind::BusinessRule {
                code: code.into(),
                context: context.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            },
            message: message.into(),
            source: None,
        }
    }

    /// Append a field error. Has no effect on non-validation errors.
    pub fn with_field_error(
        mut self,
        field: impl Into<String>,
        value: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        if let ErrorKind::Validation(errors) = &mut self.kind {
            errors.push(FieldError {
                field: field.into(),
                value: value.into(),
                error: error.into(),
            });
        }
        self
    }

    pub fn caused_by(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context for this link alone.
    pub fn context(&self) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        match &self.kind {
            ErrorKind::Generic { .. } => {}
            ErrorKind::Validation(errors) => {
                context.insert("ErrorCount".to_string(), Value::from(errors.len()));
                context.insert(
                    "ValidationErrors".to_string(),
                    Value::Sequence(errors.iter().map(Value::from).collect()),
                );
            }
            ErrorKind::BusinessRule { code, context: payload } => {
                context.insert("RuleCode".to_string(), Value::from(code.as_str()));
                context.insert("Context".to_string(), Value::Structured(payload.clone()));
            }
        }
        context
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for DomainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// One link of a captured chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDescriptor {
    pub type_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
}

/// Upper bound on captured links, whatever limit the caller asks for.
const MAX_LINKS: usize = 256;

/// Outermost error first, root cause last.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorChain {
    pub descriptors: Vec<ErrorDescriptor>,
    pub cycle_detected: bool,
    pub truncated: bool,
}

impl ErrorChain {
    pub fn capture(error: &(dyn Error + 'static)) -> Self {
        Self::walk(error, None, None)
    }

    /// Like [`capture`](Self::capture) but names the outermost link after
    /// its static type.
    pub fn capture_typed<E: Error + 'static>(error: &E) -> Self {
        Self::walk(error, Some(short_type_name::<E>()), None)
    }

    /// Capture at most `max_depth` links; `truncated` is set when more
    /// links were available.
    pub fn capture_with_limit(error: &(dyn Error + 'static), max_depth: usize) -> Self {
        Self::walk(error, None, Some(max_depth))
    }

    fn walk(error: &(dyn Error + 'static), outer_name: Option<String>, limit: Option<usize>) -> Self {
        let mut chain = ErrorChain::default();
        let mut seen: Vec<*const dyn Error> = Vec::new();
        let mut current = Some(error);
        let mut outer_name = outer_name;
        let limit = limit.unwrap_or(MAX_LINKS).min(MAX_LINKS);

        while let Some(err) = current {
            // A wrapper and the source stored at its offset 0 share an
            // address, so links are told apart by address and vtable.
            let link = err as *const dyn Error;
            if seen.iter().any(|s| std::ptr::eq(*s, link)) {
                chain.cycle_detected = true;
                break;
            }
            if chain.descriptors.len() >= limit {
                chain.truncated = true;
                break;
            }
            seen.push(link);
            chain.descriptors.push(describe(err, outer_name.take()));
            current = err.source();
        }
        chain
    }

    pub fn depth(&self) -> usize {
        self.descriptors.len()
    }

    pub fn outermost(&self) -> Option<&ErrorDescriptor> {
        self.descriptors.first()
    }

    pub fn root_cause(&self) -> Option<&ErrorDescriptor> {
        self.descriptors.last()
    }
}

fn describe(err: &(dyn Error + 'static), type_name: Option<String>) -> ErrorDescriptor {
    if let Some(domain) = err.downcast_ref::<DomainError>() {
        return ErrorDescriptor {
            type_name: domain.kind.name().to_string(),
            message: domain.message.clone(),
            context: domain.context(),
        };
    }

    let mut context = BTreeMap::new();
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        context.insert("Kind".to_string(), Value::from(format!("{:?}", io.kind())));
    }

    ErrorDescriptor {
        type_name: type_name.unwrap_or_else(|| debug_type_name(err)),
        message: err.to_string(),
        context,
    }
}

fn short_type_name<E>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Best-effort name for an opaque error: the leading identifier of its
/// `Debug` output, which for derived impls is the type or variant name.
fn debug_type_name(err: &dyn Error) -> String {
    let debug = format!("{:?}", err);
    let ident: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if ident.is_empty() || !ident.starts_with(|c: char| c.is_alphabetic()) {
        "Error".to_string()
    } else {
        ident
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("Invalid input parameter")]
    struct ArgumentError;

    #[test]
    fn nested_chain_is_outer_to_inner() {
        let err = DomainError::generic("ApplicationError", "Application operation failed").caused_by(
            DomainError::generic("InvalidOperation", "Data processing failed").caused_by(ArgumentError),
        );

        let chain = ErrorChain::capture(&err);
        assert_eq!(chain.depth(), 3);
        let names: Vec<_> = chain.descriptors.iter().map(|d| d.type_name.as_str()).collect();
        assert_eq!(names, ["ApplicationError", "InvalidOperation", "ArgumentError"]);
        assert_eq!(chain.root_cause().unwrap().message, "Invalid input parameter");
        assert!(!chain.cycle_detected);
    }

    #[test]
    fn preserves_validation_errors() {
        let err = DomainError::validation("Email address format is invalid")
            .with_field_error("Email", "john.doe@", "Invalid email format")
            .with_field_error("Age", "-5", "Age must be positive");

        let chain = ErrorChain::capture(&err);
        let link = chain.outermost().unwrap();
        assert_eq!(link.type_name, "ValidationError");
        assert_eq!(link.context["ErrorCount"], Value::Integer(2));
        match &link.context["ValidationErrors"] {
            Value::Sequence(items) => {
                assert_eq!(items[1].get("Field"), Some(&Value::from("Age")));
                assert_eq!(items[1].get("Error"), Some(&Value::from("Age must be positive")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn preserves_business_rule_payload() {
        let err = DomainError::business_rule(
            "INSUFFICIENT_FUNDS",
            "Account balance insufficient for transaction",
            [
                ("AccountId", Value::from("ACC123")),
                ("RequestedAmount", Value::from(1000.0)),
                ("AvailableBalance", Value::from(250.0)),
            ],
        );

        let link = ErrorChain::capture(&err).descriptors.remove(0);
        assert_eq!(link.context["RuleCode"], Value::from("INSUFFICIENT_FUNDS"));
        let payload = &link.context["Context"];
        assert_eq!(payload.get("AvailableBalance"), Some(&Value::Float(250.0)));
        assert_eq!(link.message, "Account balance insufficient for transaction");
    }

    #[derive(Debug)]
    struct Looping {
        name: &'static str,
        next: &'static Looping,
    }

    impl fmt::Display for Looping {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name)
        }
    }

    impl Error for Looping {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.next)
        }
    }

    static FIRST: Looping = Looping { name: "first", next: &SECOND };
    static SECOND: Looping = Looping { name: "second", next: &FIRST };

    #[test]
    fn cyclic_chain_terminates_and_is_marked() {
        let chain = ErrorChain::capture(&FIRST);
        assert!(chain.cycle_detected);
        assert_eq!(chain.depth(), 2);
        assert_eq!(chain.descriptors[1].message, "second");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped: {0}")]
    struct Wrapper(#[source] std::io::Error);

    #[derive(Debug, thiserror::Error)]
    enum AppError {
        #[error("i/o failed")]
        Io(#[from] std::io::Error),
    }

    #[test]
    fn wrapper_sharing_its_source_address_is_not_a_cycle() {
        let chain = ErrorChain::capture(&Wrapper(std::io::Error::new(std::io::ErrorKind::Other, "root")));
        assert_eq!(chain.depth(), 2);
        assert!(!chain.cycle_detected);
        assert_eq!(chain.root_cause().unwrap().message, "root");

        let err = AppError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let chain = ErrorChain::capture(&err);
        assert_eq!(chain.depth(), 2);
        assert!(!chain.cycle_detected);
        assert_eq!(chain.outermost().unwrap().message, "i/o failed");
        assert_eq!(chain.root_cause().unwrap().context["Kind"], Value::from("Other"));
    }

    #[test]
    fn depth_limit_truncates() {
        let err = DomainError::generic("A", "a")
            .caused_by(DomainError::generic("B", "b").caused_by(DomainError::generic("C", "c")));
        let chain = ErrorChain::capture_with_limit(&err, 2);
        assert_eq!(chain.depth(), 2);
        assert!(chain.truncated);
    }

    #[test]
    fn typed_capture_names_outermost_link() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "Configuration file not found");
        let chain = ErrorChain::capture_typed(&io);
        let link = chain.outermost().unwrap();
        assert_eq!(link.type_name, "Error");
        assert_eq!(link.context["Kind"], Value::from("NotFound"));

        let chain = ErrorChain::capture_typed(&ArgumentError);
        assert_eq!(chain.outermost().unwrap().type_name, "ArgumentError");
    }
}
