//! Message templates with named placeholders.
//!
//! A template such as `"Order {OrderId} paid {Amount:C} at {Timestamp:HH:mm}"`
//! is parsed once into literal text and holes. Holes bind to arguments by
//! position: the first distinct name takes `args[0]`, the second distinct
//! name `args[1]`, and a name that appears again reuses its value.
//!
//! Hole syntax: `{[@|$]Name[,alignment][:format]}`. `{{` and `}}` are
//! literal braces.

use crate::format::FormatterRegistry;
use crate::record::{Capture, Field};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hole {
    pub name: String,
    pub capture: Capture,
    pub alignment: Option<i32>,
    pub format: Option<String>,
    /// Index into the distinct-name list, i.e. the bound argument.
    pub slot: usize,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Hole(Hole),
}

/// A parsed message template. Parsing never fails; unusable holes are kept
/// as literal text and flag the template as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    text: String,
    segments: Vec<Segment>,
    names: Vec<String>,
    malformed: bool,
}

/// Output of [`MessageTemplate::render`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub text: String,
    pub fields: Vec<Field>,
    pub malformed: bool,
}

impl MessageTemplate {
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut malformed = false;
        let mut literal = String::new();
        let mut rest = text;

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                literal.push('{');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with("}}") {
                literal.push('}');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('}') {
                // A lone closing brace is kept as-is.
                literal.push('}');
                rest = &tail[1..];
                malformed = true;
                continue;
            }

            let Some(close) = tail.find('}') else {
                literal.push_str(tail);
                rest = "";
                malformed = true;
                break;
            };

            let raw = &tail[..=close];
            match parse_hole(&raw[1..raw.len() - 1]) {
                Some((name, capture, alignment, format)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    let slot = match names.iter().position(|n| *n == name) {
                        Some(i) => i,
                        None => {
                            names.push(name.clone());
                            names.len() - 1
                        }
                    };
                    segments.push(Segment::Hole(Hole {
                        name,
                        capture,
                        alignment,
                        format,
                        slot,
                        raw: raw.to_string(),
                    }));
                }
                None => {
                    literal.push_str(raw);
                    malformed = true;
                }
            }
            rest = &tail[close + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }

        MessageTemplate {
            text: text.to_string(),
            segments,
            names,
            malformed,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn placeholder_count(&self) -> usize {
        self.names.len()
    }

    pub fn holes(&self) -> impl Iterator<Item = &Hole> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Hole(h) => Some(h),
            Segment::Text(_) => None,
        })
    }

    /// Bind `args` and render the human text and the structured fields.
    ///
    /// Missing arguments leave their holes as literal text; surplus
    /// arguments are ignored. Either sets `malformed`.
    pub fn render(&self, args: &[Value], formatters: &FormatterRegistry) -> RenderedMessage {
        let bound: Vec<Option<Value>> = self
            .names
            .iter()
            .enumerate()
            .map(|(slot, _)| {
                let hole = self.holes().find(|h| h.slot == slot)?;
                args.get(slot).cloned().map(|v| capture_value(v, hole.capture))
            })
            .collect();

        let mut text = String::with_capacity(self.text.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => text.push_str(t),
                Segment::Hole(hole) => match &bound[hole.slot] {
                    Some(value) => text.push_str(&render_hole(hole, value, formatters)),
                    None => text.push_str(&hole.raw),
                },
            }
        }

        let fields = self
            .names
            .iter()
            .zip(bound)
            .enumerate()
            .filter_map(|(slot, (name, value))| {
                let capture = self.holes().find(|h| h.slot == slot).map(|h| h.capture)?;
                value.map(|value| Field {
                    name: name.clone(),
                    value,
                    capture,
                })
            })
            .collect();

        RenderedMessage {
            text,
            fields,
            malformed: self.malformed || args.len() != self.names.len(),
        }
    }
}

/// Parse and render in one step.
pub fn render(template: &str, args: &[Value], formatters: &FormatterRegistry) -> RenderedMessage {
    MessageTemplate::parse(template).render(args, formatters)
}

/// Widest alignment a hole may request; wider holes are unusable.
const MAX_ALIGNMENT: u32 = 1024;

fn parse_hole(inner: &str) -> Option<(String, Capture, Option<i32>, Option<String>)> {
    let (capture, body) = match inner.chars().next()? {
        '@' => (Capture::Structured, &inner[1..]),
        '$' => (Capture::Stringify, &inner[1..]),
        _ => (Capture::Default, inner),
    };

    let (head, format) = match body.find(':') {
        Some(i) => (&body[..i], Some(body[i + 1..].to_string())),
        None => (body, None),
    };
    let (name, alignment) = match head.find(',') {
        Some(i) => {
            let width = head[i + 1..].trim().parse::<i32>().ok()?;
            if width.unsigned_abs() > MAX_ALIGNMENT {
                return None;
            }
            (&head[..i], Some(width))
        }
        None => (head, None),
    };

    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !valid {
        return None;
    }
    Some((name.to_string(), capture, alignment, format.filter(|f| !f.is_empty())))
}

fn capture_value(value: Value, capture: Capture) -> Value {
    match capture {
        Capture::Structured => value,
        Capture::Stringify => match value {
            Value::String(_) => value,
            other => Value::String(other.to_string()),
        },
        Capture::Default => value.scalarize(),
    }
}

fn render_hole(hole: &Hole, value: &Value, formatters: &FormatterRegistry) -> String {
    let text = hole
        .format
        .as_deref()
        .and_then(|spec| formatters.format(spec, value))
        .unwrap_or_else(|| value.to_string());

    match hole.alignment {
        Some(width) if width < 0 => format!("{:<w$}", text, w = width.unsigned_abs() as usize),
        Some(width) => format!("{:>w$}", text, w = width as usize),
        None => text,
    }
}
