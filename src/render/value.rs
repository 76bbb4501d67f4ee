//! Value coercions used by the renderer.

use serde_json::{Number, Value};

/// The empty-string result every failure path resolves to.
pub(crate) fn empty() -> Value {
    Value::String(String::new())
}

/// Converts a value to its rendered text.
///
/// `null` renders as nothing, primitives as their plain text, arrays and
/// objects as JSON.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_text(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn number_text(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Truthiness: `false`, `0`, `""` and `null` are falsy, everything else is truthy.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Builds a number value, preferring an integer representation.
pub(crate) fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() <= 9_007_199_254_740_992.0 {
        #[allow(clippy::cast_possible_truncation)]
        return Value::Number(Number::from(f as i64));
    }
    Number::from_f64(f).map_or_else(empty, Value::Number)
}

/// Loose numeric coercion for call arguments.
pub(crate) fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Some(0.0)
            } else {
                t.parse::<f64>().ok()
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Integer coercion for index-like arguments; non-numeric input becomes 0.
pub(crate) fn to_index(value: &Value) -> i64 {
    match to_f64(value) {
        Some(f) if f.is_finite() => {
            #[allow(clippy::cast_possible_truncation)]
            let i = f.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64;
            i
        }
        Some(f) if f == f64::INFINITY => i64::MAX,
        Some(f) if f == f64::NEG_INFINITY => i64::MIN,
        _ => 0,
    }
}
