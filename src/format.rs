//! Format-specifier registry used by the template renderer.
//!
//! A specifier such as `F2`, `C`, `N0` or `yyyy-MM-dd HH:mm:ss` is resolved
//! by exact key first, then by its leading letter (the "family", with the
//! rest passed to the formatter as an argument), then by the registry
//! fallback. Nothing here is locale-aware; currency symbol and separators
//! are plain configuration on the formatters.

use crate::value::Value;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};

/// Renders a value for a given format specifier.
///
/// Returning `None` means "not applicable"; the renderer then falls back to
/// the value's plain display text.
pub trait ValueFormatter: Send + Sync {
    fn format(&self, spec: &str, value: &Value) -> Option<String>;
}

impl<F> ValueFormatter for F
where
    F: Fn(&str, &Value) -> Option<String> + Send + Sync,
{
    fn format(&self, spec: &str, value: &Value) -> Option<String> {
        self(spec, value)
    }
}

#[derive(Clone, Default)]
pub struct FormatterRegistry {
    exact: HashMap<String, Arc<dyn ValueFormatter>>,
    families: HashMap<char, Arc<dyn ValueFormatter>>,
    fallback: Option<Arc<dyn ValueFormatter>>,
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<_> = self.families.keys().collect();
        families.sort();
        f.debug_struct("FormatterRegistry")
            .field("exact", &self.exact.keys().collect::<Vec<_>>())
            .field("families", &families)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl FormatterRegistry {
    /// Registry with no formatters at all; every specifier renders as plain
    /// display text.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default table: numeric, currency, percent, hex and date/time
    /// patterns.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .register_family('F', NumberFormatter { grouped: false })
            .register_family('f', NumberFormatter { grouped: false })
            .register_family('N', NumberFormatter { grouped: true })
            .register_family('n', NumberFormatter { grouped: true })
            .register_family('C', CurrencyFormatter::default())
            .register_family('c', CurrencyFormatter::default())
            .register_family('P', PercentFormatter)
            .register_family('p', PercentFormatter)
            .register_family('D', IntegerFormatter)
            .register_family('d', IntegerFormatter)
            .register_family('X', HexFormatter { upper: true })
            .register_family('x', HexFormatter { upper: false })
            .register_family('E', ExponentFormatter)
            .register_family('e', ExponentFormatter)
            .set_fallback(DatePatternFormatter);
        registry
    }

    /// Process-wide shared copy of [`FormatterRegistry::standard`].
    pub fn shared_standard() -> &'static FormatterRegistry {
        static STANDARD: OnceLock<FormatterRegistry> = OnceLock::new();
        STANDARD.get_or_init(FormatterRegistry::standard)
    }

    /// Register a formatter for one exact specifier string.
    pub fn register(&mut self, spec: impl Into<String>, formatter: impl ValueFormatter + 'static) -> &mut Self {
        self.exact.insert(spec.into(), Arc::new(formatter));
        self
    }

    /// Register a formatter for every specifier starting with `letter`.
    ///
    /// Family formatters only apply when the remainder of the specifier is
    /// empty or all digits, so date patterns like `dd/MM` are not captured
    /// by the `d` family.
    pub fn register_family(&mut self, letter: char, formatter: impl ValueFormatter + 'static) -> &mut Self {
        self.families.insert(letter, Arc::new(formatter));
        self
    }

    pub fn set_fallback(&mut self, formatter: impl ValueFormatter + 'static) -> &mut Self {
        self.fallback = Some(Arc::new(formatter));
        self
    }

    /// Format `value` with `spec`, or `None` when no formatter applies.
    pub fn format(&self, spec: &str, value: &Value) -> Option<String> {
        if let Some(formatter) = self.exact.get(spec) {
            if let Some(out) = formatter.format(spec, value) {
                return Some(out);
            }
        }

        let mut chars = spec.chars();
        if let Some(letter) = chars.next() {
            let rest = chars.as_str();
            if rest.chars().all(|c| c.is_ascii_digit()) {
                if let Some(formatter) = self.families.get(&letter) {
                    if let Some(out) = formatter.format(rest, value) {
                        return Some(out);
                    }
                }
            }
        }

        self.fallback.as_ref().and_then(|f| f.format(spec, value))
    }
}

fn precision(arg: &str, default: usize) -> usize {
    // Capped so a hostile specifier cannot request a huge allocation.
    arg.parse::<usize>().map(|p| p.min(32)).unwrap_or(default)
}

/// Insert `separator` every three digits of the integer part.
fn group_thousands(fixed: &str, separator: char) -> String {
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (int_part, frac_part) = match digits.find('.') {
        Some(i) => digits.split_at(i),
        None => (digits, ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(ch);
    }
    format!("{}{}{}", sign, grouped, frac_part)
}

/// `F<n>` fixed-point and `N<n>` grouped numbers. Precision defaults to 2.
#[derive(Debug, Clone, Copy)]
pub struct NumberFormatter {
    pub grouped: bool,
}

impl ValueFormatter for NumberFormatter {
    fn format(&self, arg: &str, value: &Value) -> Option<String> {
        let n = value.as_f64()?;
        let fixed = format!("{:.*}", precision(arg, 2), n);
        Some(if self.grouped { group_thousands(&fixed, ',') } else { fixed })
    }
}

/// `C<n>` currency: grouped with a leading symbol, sign in front.
#[derive(Debug, Clone)]
pub struct CurrencyFormatter {
    pub symbol: String,
}

impl Default for CurrencyFormatter {
    fn default() -> Self {
        Self { symbol: "$".to_string() }
    }
}

impl ValueFormatter for CurrencyFormatter {
    fn format(&self, arg: &str, value: &Value) -> Option<String> {
        let n = value.as_f64()?;
        let grouped = group_thousands(&format!("{:.*}", precision(arg, 2), n.abs()), ',');
        let sign = if n < 0.0 { "-" } else { "" };
        Some(format!("{}{}{}", sign, self.symbol, grouped))
    }
}

/// `P<n>` percent: the value is a ratio, multiplied by 100.
#[derive(Debug, Clone, Copy)]
pub struct PercentFormatter;

impl ValueFormatter for PercentFormatter {
    fn format(&self, arg: &str, value: &Value) -> Option<String> {
        let n = value.as_f64()? * 100.0;
        Some(format!("{}%", group_thousands(&format!("{:.*}", precision(arg, 2), n), ',')))
    }
}

/// `D<n>` zero-padded integers.
#[derive(Debug, Clone, Copy)]
pub struct IntegerFormatter;

impl ValueFormatter for IntegerFormatter {
    fn format(&self, arg: &str, value: &Value) -> Option<String> {
        let n = value.as_i64()?;
        let width = precision(arg, 0);
        if n < 0 {
            Some(format!("-{:0width$}", n.unsigned_abs(), width = width))
        } else {
            Some(format!("{:0width$}", n, width = width))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HexFormatter {
    pub upper: bool,
}

impl ValueFormatter for HexFormatter {
    fn format(&self, arg: &str, value: &Value) -> Option<String> {
        let n = value.as_i64()?;
        let width = precision(arg, 0);
        Some(if self.upper {
            format!("{:0width$X}", n, width = width)
        } else {
            format!("{:0width$x}", n, width = width)
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentFormatter;

impl ValueFormatter for ExponentFormatter {
    fn format(&self, arg: &str, value: &Value) -> Option<String> {
        let n = value.as_f64()?;
        Some(format!("{:.*e}", precision(arg, 6), n))
    }
}

/// Custom date/time patterns over timestamp values.
///
/// Supported tokens: `yyyy`, `yy`, `MMMM`, `MMM`, `MM`, `M`, `dddd`, `ddd`,
/// `dd`, `d`, `HH`, `H`, `hh`, `h`, `mm`, `m`, `ss`, `s`, `f`..`fffffffff`,
/// `tt`, `zzz`. Text in single quotes is copied literally, any other
/// character is copied as-is.
#[derive(Debug, Clone, Copy)]
pub struct DatePatternFormatter;

impl DatePatternFormatter {
    pub fn render(pattern: &str, ts: &DateTime<Utc>) -> String {
        let chars: Vec<char> = pattern.chars().collect();
        let mut out = String::with_capacity(pattern.len() + 8);
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                let mut j = i + 1;
                while j < chars.len() && chars[j] != '\'' {
                    out.push(chars[j]);
                    j += 1;
                }
                i = j + 1;
                continue;
            }

            let mut run = 1;
            while i + run < chars.len() && chars[i + run] == c {
                run += 1;
            }

            let _ = match (c, run) {
                ('y', 1..=3) => write!(out, "{:02}", ts.year().rem_euclid(100)),
                ('y', _) => write!(out, "{:04}", ts.year()),
                ('M', 1) => write!(out, "{}", ts.month()),
                ('M', 2) => write!(out, "{:02}", ts.month()),
                ('M', 3) => write!(out, "{}", ts.format("%b")),
                ('M', _) => write!(out, "{}", ts.format("%B")),
                ('d', 1) => write!(out, "{}", ts.day()),
                ('d', 2) => write!(out, "{:02}", ts.day()),
                ('d', 3) => write!(out, "{}", ts.format("%a")),
                ('d', _) => write!(out, "{}", ts.format("%A")),
                ('H', 1) => write!(out, "{}", ts.hour()),
                ('H', _) => write!(out, "{:02}", ts.hour()),
                ('h', 1) => write!(out, "{}", ts.hour12().1),
                ('h', _) => write!(out, "{:02}", ts.hour12().1),
                ('m', 1) => write!(out, "{}", ts.minute()),
                ('m', _) => write!(out, "{:02}", ts.minute()),
                ('s', 1) => write!(out, "{}", ts.second()),
                ('s', _) => write!(out, "{:02}", ts.second()),
                ('f', n) => {
                    let digits = n.min(9);
                    let scaled = ts.nanosecond() % 1_000_000_000 / 10u32.pow(9 - digits as u32);
                    write!(out, "{:0width$}", scaled, width = digits)
                }
                ('t', _) => write!(out, "{}", if ts.hour12().0 { "PM" } else { "AM" }),
                ('z', _) => write!(out, "{}", ts.format("%:z")),
                _ => {
                    for _ in 0..run {
                        out.push(c);
                    }
                    Ok(())
                }
            };
            i += run;
        }
        out
    }
}

impl ValueFormatter for DatePatternFormatter {
    fn format(&self, spec: &str, value: &Value) -> Option<String> {
        match value {
            Value::Timestamp(ts) => Some(Self::render(spec, ts)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_and_grouped_numbers() {
        let reg = FormatterRegistry::standard();
        assert_eq!(reg.format("F2", &Value::Float(5555.5556)).as_deref(), Some("5555.56"));
        assert_eq!(reg.format("F1", &Value::Float(94.0)).as_deref(), Some("94.0"));
        assert_eq!(reg.format("N0", &Value::Integer(104857600)).as_deref(), Some("104,857,600"));
        assert_eq!(reg.format("N", &Value::Float(-1234.5)).as_deref(), Some("-1,234.50"));
    }

    #[test]
    fn currency_and_percent() {
        let reg = FormatterRegistry::standard();
        assert_eq!(reg.format("C", &Value::Float(99.99)).as_deref(), Some("$99.99"));
        assert_eq!(reg.format("C0", &Value::Float(-1250.4)).as_deref(), Some("-$1,250"));
        assert_eq!(reg.format("P1", &Value::Float(0.94)).as_deref(), Some("94.0%"));
    }

    #[test]
    fn integers_and_hex() {
        let reg = FormatterRegistry::standard();
        assert_eq!(reg.format("D5", &Value::Integer(42)).as_deref(), Some("00042"));
        assert_eq!(reg.format("X", &Value::Integer(255)).as_deref(), Some("FF"));
        assert_eq!(reg.format("x4", &Value::Integer(255)).as_deref(), Some("00ff"));
    }

    #[test]
    fn date_patterns() {
        let reg = FormatterRegistry::standard();
        let ts = Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap());
        assert_eq!(
            reg.format("yyyy-MM-dd HH:mm:ss", &ts).as_deref(),
            Some("2024-03-07 14:05:09")
        );
        assert_eq!(reg.format("dd/MM/yy", &ts).as_deref(), Some("07/03/24"));
        assert_eq!(reg.format("HH:mm:ss.fff", &ts).as_deref(), Some("14:05:09.000"));
        assert_eq!(reg.format("HH:mm:ss.f", &ts).as_deref(), Some("14:05:09.0"));
        assert_eq!(reg.format("h:mm tt", &ts).as_deref(), Some("2:05 PM"));
        assert_eq!(reg.format("'Day' d", &ts).as_deref(), Some("Day 7"));
    }

    #[test]
    fn inapplicable_specifier_yields_none() {
        let reg = FormatterRegistry::standard();
        assert_eq!(reg.format("F2", &Value::from("text")), None);
        assert_eq!(reg.format("yyyy", &Value::Integer(1)), None);
    }

    #[test]
    fn custom_exact_formatter_wins() {
        let mut reg = FormatterRegistry::standard();
        reg.register("C", |_: &str, v: &Value| v.as_f64().map(|n| format!("EUR {:.2}", n)));
        assert_eq!(reg.format("C", &Value::Float(3.5)).as_deref(), Some("EUR 3.50"));
        // Only the exact key is overridden; the family still handles C0.
        assert_eq!(reg.format("C0", &Value::Float(3.5)).as_deref(), Some("$4"));
    }
}
