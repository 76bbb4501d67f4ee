//! Allow-listed string and array methods callable from templates.

use serde_json::Value;

use super::value::{stringify, to_index};

/// Longest string a method may produce.
pub const MAX_METHOD_OUTPUT: usize = 64 * 1024;

/// Methods a template may call. Anything else renders as `""`.
pub const ALLOWED_METHODS: &[&str] = &[
    "substring",
    "slice",
    "toLowerCase",
    "toUpperCase",
    "trim",
    "trimStart",
    "trimEnd",
    "replace",
    "split",
    "indexOf",
    "lastIndexOf",
    "startsWith",
    "endsWith",
    "includes",
    "charAt",
    "padStart",
    "padEnd",
    "repeat",
    "toString",
];

/// True if `method` is on the allow-list.
#[must_use]
pub fn is_allowed(method: &str) -> bool {
    ALLOWED_METHODS.contains(&method)
}

/// Invokes `method` on `target`. `None` when the method does not apply.
pub(crate) fn call(target: &Value, method: &str, args: &[Value]) -> Option<Value> {
    if method == "toString" {
        return Some(Value::String(stringify(target)));
    }
    match target {
        Value::String(s) => call_string(s, method, args),
        Value::Array(items) => call_array(items, method, args),
        _ => None,
    }
}

fn arg(args: &[Value], idx: usize) -> Option<&Value> {
    args.get(idx)
}

fn arg_text(args: &[Value], idx: usize) -> Option<String> {
    arg(args, idx).map(stringify)
}

/// Clamps a possibly negative index into `0..=len`, counting negatives from the end.
fn relative_index(idx: i64, len: usize) -> usize {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if idx < 0 { (len_i + idx).max(0) } else { idx.min(len_i) };
    usize::try_from(resolved).unwrap_or(0)
}

fn clamp_index(idx: i64, len: usize) -> usize {
    usize::try_from(idx.max(0)).map_or(len, |i| i.min(len))
}

fn char_offset(s: &str, byte_idx: usize) -> i64 {
    i64::try_from(s[..byte_idx].chars().count()).unwrap_or(-1)
}

fn text(s: String) -> Option<Value> {
    Some(Value::String(s))
}

fn call_string(s: &str, method: &str, args: &[Value]) -> Option<Value> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();

    match method {
        "substring" => {
            let start = clamp_index(arg(args, 0).map_or(0, to_index), len);
            let end = arg(args, 1).map_or(len, |v| clamp_index(to_index(v), len));
            let (lo, hi) = if start > end { (end, start) } else { (start, end) };
            text(chars[lo..hi].iter().collect())
        }
        "slice" => {
            let start = relative_index(arg(args, 0).map_or(0, to_index), len);
            let end = arg(args, 1).map_or(len, |v| relative_index(to_index(v), len));
            if start >= end {
                return text(String::new());
            }
            text(chars[start..end].iter().collect())
        }
        "toLowerCase" => text(s.to_lowercase()),
        "toUpperCase" => text(s.to_uppercase()),
        "trim" => text(s.trim().to_string()),
        "trimStart" => text(s.trim_start().to_string()),
        "trimEnd" => text(s.trim_end().to_string()),
        "replace" => {
            let pattern = arg_text(args, 0)?;
            let replacement = arg_text(args, 1).unwrap_or_default();
            text(s.replacen(&pattern, &replacement, 1))
        }
        "split" => {
            let parts: Vec<Value> = match arg_text(args, 0) {
                None => vec![Value::String(s.to_string())],
                Some(sep) if sep.is_empty() => chars.iter().map(|c| Value::String(c.to_string())).collect(),
                Some(sep) => s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect(),
            };
            let limit = arg(args, 1).map_or(parts.len(), |v| clamp_index(to_index(v), parts.len()));
            Some(Value::Array(parts.into_iter().take(limit).collect()))
        }
        "indexOf" => {
            let needle = arg_text(args, 0)?;
            let idx = s.find(needle.as_str()).map_or(-1, |b| char_offset(s, b));
            Some(Value::from(idx))
        }
        "lastIndexOf" => {
            let needle = arg_text(args, 0)?;
            let idx = s.rfind(needle.as_str()).map_or(-1, |b| char_offset(s, b));
            Some(Value::from(idx))
        }
        "startsWith" => Some(Value::Bool(s.starts_with(arg_text(args, 0)?.as_str()))),
        "endsWith" => Some(Value::Bool(s.ends_with(arg_text(args, 0)?.as_str()))),
        "includes" => Some(Value::Bool(s.contains(arg_text(args, 0)?.as_str()))),
        "charAt" => {
            let idx = arg(args, 0).map_or(0, to_index);
            let c = usize::try_from(idx).ok().and_then(|i| chars.get(i));
            text(c.map(char::to_string).unwrap_or_default())
        }
        "padStart" | "padEnd" => {
            let target = usize::try_from(arg(args, 0).map_or(0, to_index)).unwrap_or(0);
            let filler: Vec<char> = arg_text(args, 1).unwrap_or_else(|| " ".to_string()).chars().collect();
            if target <= len || filler.is_empty() {
                return text(s.to_string());
            }
            if target > MAX_METHOD_OUTPUT {
                return None;
            }
            let pad: String = filler.iter().cycle().take(target - len).collect();
            if method == "padStart" {
                text(format!("{pad}{s}"))
            } else {
                text(format!("{s}{pad}"))
            }
        }
        "repeat" => {
            let count = usize::try_from(arg(args, 0).map_or(0, to_index)).ok()?;
            if s.len().saturating_mul(count) > MAX_METHOD_OUTPUT {
                return None;
            }
            text(s.repeat(count))
        }
        _ => None,
    }
}

fn call_array(items: &[Value], method: &str, args: &[Value]) -> Option<Value> {
    let len = items.len();
    match method {
        "slice" => {
            let start = relative_index(arg(args, 0).map_or(0, to_index), len);
            let end = arg(args, 1).map_or(len, |v| relative_index(to_index(v), len));
            if start >= end {
                return Some(Value::Array(Vec::new()));
            }
            Some(Value::Array(items[start..end].to_vec()))
        }
        "indexOf" => {
            let needle = arg(args, 0)?;
            let idx = items.iter().position(|v| v == needle);
            Some(idx.map_or(Value::from(-1), Value::from))
        }
        "lastIndexOf" => {
            let needle = arg(args, 0)?;
            let idx = items.iter().rposition(|v| v == needle);
            Some(idx.map_or(Value::from(-1), Value::from))
        }
        "includes" => {
            let needle = arg(args, 0)?;
            Some(Value::Bool(items.contains(needle)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s(v: &str) -> Value {
        json!(v)
    }

    #[test]
    fn substring_swaps_and_clamps() {
        assert_eq!(call(&s("abcdef"), "substring", &[json!(1), json!(3)]), Some(s("bc")));
        assert_eq!(call(&s("abcdef"), "substring", &[json!(3), json!(1)]), Some(s("bc")));
        assert_eq!(call(&s("abcdef"), "substring", &[json!(-4)]), Some(s("abcdef")));
    }

    #[test]
    fn slice_counts_negative_from_end() {
        assert_eq!(call(&s("sha256:abcdef"), "slice", &[json!(-6)]), Some(s("abcdef")));
        assert_eq!(call(&s("abc"), "slice", &[json!(2), json!(1)]), Some(s("")));
        assert_eq!(call(&json!([1, 2, 3]), "slice", &[json!(1)]), Some(json!([2, 3])));
    }

    #[test]
    fn string_helpers() {
        assert_eq!(call(&s(" Ab "), "trim", &[]), Some(s("Ab")));
        assert_eq!(call(&s("Ab"), "toUpperCase", &[]), Some(s("AB")));
        assert_eq!(call(&s("a-b-c"), "replace", &[s("-"), s("+")]), Some(s("a+b-c")));
        assert_eq!(call(&s("a.b.c"), "split", &[s(".")]), Some(json!(["a", "b", "c"])));
        assert_eq!(call(&s("a.b.c"), "split", &[s("."), json!(2)]), Some(json!(["a", "b"])));
        assert_eq!(call(&s("héllo"), "indexOf", &[s("l")]), Some(json!(2)));
        assert_eq!(call(&s("hello"), "lastIndexOf", &[s("l")]), Some(json!(3)));
        assert_eq!(call(&s("hello"), "indexOf", &[s("z")]), Some(json!(-1)));
        assert_eq!(call(&s("hello"), "charAt", &[json!(1)]), Some(s("e")));
        assert_eq!(call(&s("hello"), "charAt", &[json!(9)]), Some(s("")));
        assert_eq!(call(&s("7"), "padStart", &[json!(3), s("0")]), Some(s("007")));
        assert_eq!(call(&s("7"), "padEnd", &[json!(3)]), Some(s("7  ")));
        assert_eq!(call(&s("ab"), "repeat", &[json!(2)]), Some(s("abab")));
        assert_eq!(call(&json!(12), "toString", &[]), Some(s("12")));
    }

    #[test]
    fn oversized_output_is_refused() {
        assert_eq!(call(&s("ab"), "repeat", &[json!(1_000_000)]), None);
        assert_eq!(call(&s("ab"), "repeat", &[json!(-1)]), None);
        assert_eq!(call(&s("a"), "padStart", &[json!(10_000_000)]), None);
    }

    #[test]
    fn methods_do_not_apply_to_wrong_types() {
        assert_eq!(call(&json!(5), "trim", &[]), None);
        assert_eq!(call(&json!({"a": 1}), "includes", &[s("a")]), None);
        assert!(!is_allowed("constructor"));
        assert!(is_allowed("padStart"));
    }
}
