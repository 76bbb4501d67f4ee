//! Safe rendering of notification templates.
//!
//! Templates contain `${expr}` placeholders evaluated against a fixed set of
//! variables. The expression language is deliberately tiny:
//!
//! - ternary `cond ? a : b`
//! - logical AND `a && b` (returns the first falsy operand, else the last)
//! - concatenation `a + b` (always string concatenation)
//! - string literals (`'..'` or `".."` with `\n`, `\t`, `\"`, `\'` escapes)
//! - number literals (`-1`, `2.5`)
//! - allow-listed method calls on a dotted path (`container.name.toUpperCase()`)
//! - dotted property paths (`container.updateKind.kind`)
//!
//! Rules are tried in that order; each returns `None` when it does not apply.
//! Anything unrecognized evaluates to `""`. Evaluation never fails and never
//! panics: every failure path renders as an empty string.
//!
//! # Examples
//!
//! ```
//! use driftwatch::render::{render, Scope};
//! use serde_json::json;
//!
//! let scope = Scope::new().with("container", json!({"name": "web", "tag": "1.2"}));
//! assert_eq!(render("${container.name}:${container.tag}", &scope), "web:1.2");
//! assert_eq!(render("${container.missing.deep}!", &scope), "!");
//! ```

mod methods;
mod scan;
mod value;

use serde_json::{Map, Value};

use crate::container::Container;

pub use methods::{is_allowed, ALLOWED_METHODS, MAX_METHOD_OUTPUT};
pub use value::{stringify, truthy};

use value::{empty, number};

/// Default title for per-container notifications.
pub const DEFAULT_SIMPLE_TITLE: &str =
    "New ${container.updateKind.kind} found for container ${container.name}";

/// Default body for per-container notifications.
pub const DEFAULT_SIMPLE_BODY: &str = "Container ${container.name} running with ${container.updateKind.kind} ${container.updateKind.localValue} can be updated to ${container.updateKind.kind} ${container.updateKind.remoteValue}${container.result.link ? \"\\n\" + container.result.link : \"\"}";

/// Default title for batch notifications.
pub const DEFAULT_BATCH_TITLE: &str = "${count} updates available";

/// Nesting bound for sub-expression evaluation.
const MAX_DEPTH: usize = 64;

/// Variables visible to an expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: Map<String, Value>,
}

impl Scope {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    /// Binds `name` to `value` in place.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Looks up a top-level variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Scope for a single-container notification.
    ///
    /// Binds `container` plus the flat aliases `id`, `name`, `watcher`,
    /// `kind`, `semver`, `local`, `remote` and `link`.
    #[must_use]
    pub fn for_container(container: &Container) -> Self {
        let kind = &container.update_kind;
        let opt = |v: Option<&str>| v.map_or(Value::Null, |s| Value::String(s.to_string()));
        Self::new()
            .with("container", container.to_template_value())
            .with("id", Value::String(container.id.clone()))
            .with("name", Value::String(container.name.clone()))
            .with("watcher", Value::String(container.watcher.clone()))
            .with("kind", Value::String(kind.kind.as_str().to_string()))
            .with("semver", Value::String(kind.semver_diff.as_str().to_string()))
            .with("local", opt(kind.local_value.as_deref()))
            .with("remote", opt(kind.remote_value.as_deref()))
            .with(
                "link",
                opt(container.result.as_ref().and_then(|r| r.link.as_deref())),
            )
    }

    /// Scope for a batch notification: `containers` and `count`.
    #[must_use]
    pub fn for_batch(containers: &[Container]) -> Self {
        Self::new()
            .with(
                "containers",
                Value::Array(containers.iter().map(Container::to_template_value).collect()),
            )
            .with("count", Value::from(containers.len()))
    }
}

/// Renders every `${...}` placeholder in `template`.
///
/// An unterminated placeholder is copied through literally.
#[must_use]
pub fn render(template: &str, scope: &Scope) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let Some(end) = scan::placeholder_end(body) else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&stringify(&evaluate(&body[..end], scope)));
        rest = &body[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Renders `template` for one container.
#[must_use]
pub fn render_simple(template: &str, container: &Container) -> String {
    render(template, &Scope::for_container(container))
}

/// Renders `template` for a batch of containers.
#[must_use]
pub fn render_batch(template: &str, containers: &[Container]) -> String {
    render(template, &Scope::for_batch(containers))
}

/// Evaluates a single expression (the text between `${` and `}`).
#[must_use]
pub fn evaluate(expr: &str, scope: &Scope) -> Value {
    eval(expr, scope, 0)
}

fn eval(expr: &str, scope: &Scope, depth: usize) -> Value {
    let expr = expr.trim();
    if expr.is_empty() || depth > MAX_DEPTH {
        return empty();
    }
    eval_ternary(expr, scope, depth)
        .or_else(|| eval_logical_and(expr, scope, depth))
        .or_else(|| eval_concat(expr, scope, depth))
        .or_else(|| eval_string_literal(expr))
        .or_else(|| eval_number_literal(expr))
        .or_else(|| eval_method_call(expr, scope, depth))
        .or_else(|| eval_path(expr, scope))
        .unwrap_or_else(empty)
}

fn eval_ternary(expr: &str, scope: &Scope, depth: usize) -> Option<Value> {
    let (q, c) = scan::find_ternary(expr)?;
    let cond = eval(&expr[..q], scope, depth + 1);
    let branch = if truthy(&cond) {
        &expr[q + 1..c]
    } else {
        &expr[c + 1..]
    };
    Some(eval(branch, scope, depth + 1))
}

fn eval_logical_and(expr: &str, scope: &Scope, depth: usize) -> Option<Value> {
    let parts = scan::split_logical_and(expr);
    if parts.len() < 2 {
        return None;
    }
    let mut last = empty();
    for part in parts {
        last = eval(part, scope, depth + 1);
        if !truthy(&last) {
            break;
        }
    }
    Some(last)
}

fn eval_concat(expr: &str, scope: &Scope, depth: usize) -> Option<Value> {
    let parts = scan::split_concat(expr);
    if parts.len() < 2 {
        return None;
    }
    let joined: String = parts
        .into_iter()
        .map(|part| stringify(&eval(part, scope, depth + 1)))
        .collect();
    Some(Value::String(joined))
}

fn eval_string_literal(expr: &str) -> Option<Value> {
    let quote = expr.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    if expr.len() < 2 || !expr.ends_with(quote) {
        return None;
    }
    let inner = &expr[1..expr.len() - 1];

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            // An unescaped quote inside means this is not a single literal.
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            // Trailing backslash escaped the closing quote.
            None => return None,
        }
    }
    Some(Value::String(out))
}

fn eval_number_literal(expr: &str) -> Option<Value> {
    let unsigned = expr.strip_prefix(['+', '-']).unwrap_or(expr);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
        return None;
    }
    if frac_part.is_none() {
        if let Ok(i) = expr.parse::<i64>() {
            return Some(Value::from(i));
        }
    }
    expr.parse::<f64>().ok().map(number)
}

fn eval_method_call(expr: &str, scope: &Scope, depth: usize) -> Option<Value> {
    if !expr.ends_with(')') {
        return None;
    }
    let open = expr.find('(')?;
    let (path, method) = expr[..open].rsplit_once('.')?;
    if !scan::is_path(path) || !scan::is_identifier(method) {
        return None;
    }
    if scan::matching_paren(expr, open)? != expr.len() - 1 {
        return None;
    }

    let Some(target) = resolve_path(path, scope) else {
        return Some(empty());
    };
    if !is_allowed(method) {
        return Some(empty());
    }

    let inner = &expr[open + 1..expr.len() - 1];
    let args: Vec<Value> = if inner.trim().is_empty() {
        Vec::new()
    } else {
        scan::split_args(inner)
            .into_iter()
            .map(|arg| eval(arg, scope, depth + 1))
            .collect()
    };
    Some(methods::call(&target, method, &args).unwrap_or_else(empty))
}

fn eval_path(expr: &str, scope: &Scope) -> Option<Value> {
    if !scan::is_path(expr) {
        return None;
    }
    Some(resolve_path(expr, scope).unwrap_or_else(empty))
}

/// Walks a dotted path. `None` as soon as any step is missing or null.
fn resolve_path(path: &str, scope: &Scope) -> Option<Value> {
    let mut segments = path.split('.').peekable();
    let mut current = scope.get(segments.next()?)?;
    while let Some(segment) = segments.next() {
        let length = match (current, segment) {
            (Value::Object(map), _) => {
                current = map.get(segment)?;
                None
            }
            (Value::Array(items), "length") => Some(items.len()),
            (Value::String(s), "length") => Some(s.chars().count()),
            _ => return None,
        };
        if let Some(len) = length {
            // A length is a number, so nothing can follow it.
            return segments.peek().is_none().then(|| Value::from(len));
        }
        if current.is_null() {
            return None;
        }
    }
    if current.is_null() {
        None
    } else {
        Some(current.clone())
    }
}
