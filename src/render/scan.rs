//! Single-pass lexical scanning for template expressions.
//!
//! Every operator search in the renderer goes through this module. Each scan
//! walks the input once, tracking quote state, backslash escapes and bracket
//! depth, so operators inside string literals or nested calls are never
//! picked up and no input can trigger super-linear work.

/// Quote/escape state machine shared by every scan.
#[derive(Debug, Default, Clone, Copy)]
struct QuoteState {
    single: bool,
    double: bool,
    escaped: bool,
}

impl QuoteState {
    /// Feeds one character; returns true if it is unquoted code.
    ///
    /// Quote characters, escaped characters and backslashes themselves
    /// are never code.
    fn feed(&mut self, c: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match c {
            '\\' => {
                self.escaped = true;
                false
            }
            '\'' if !self.double => {
                self.single = !self.single;
                false
            }
            '"' if !self.single => {
                self.double = !self.double;
                false
            }
            _ => !(self.single || self.double),
        }
    }
}

/// Iterator over `(byte_index, char)` pairs that sit at parenthesis depth 0
/// outside any quoted string.
struct TopLevel<'a> {
    chars: std::str::CharIndices<'a>,
    quotes: QuoteState,
    depth: i64,
}

impl<'a> TopLevel<'a> {
    fn new(expr: &'a str) -> Self {
        Self {
            chars: expr.char_indices(),
            quotes: QuoteState::default(),
            depth: 0,
        }
    }
}

impl Iterator for TopLevel<'_> {
    type Item = (usize, char);

    fn next(&mut self) -> Option<Self::Item> {
        for (idx, c) in self.chars.by_ref() {
            if !self.quotes.feed(c) {
                continue;
            }
            match c {
                '(' => self.depth += 1,
                ')' => self.depth -= 1,
                _ if self.depth == 0 => return Some((idx, c)),
                _ => {}
            }
        }
        None
    }
}

/// Position of the first top-level `?` and its matching top-level `:`.
pub(crate) fn find_ternary(expr: &str) -> Option<(usize, usize)> {
    let mut question = None;
    let mut nested = 0usize;
    for (idx, c) in TopLevel::new(expr) {
        match (c, question) {
            ('?', None) => question = Some(idx),
            ('?', Some(_)) => nested += 1,
            (':', Some(q)) if nested == 0 => return Some((q, idx)),
            (':', Some(_)) => nested -= 1,
            _ => {}
        }
    }
    None
}

/// Splits `expr` at every top-level `&&`.
///
/// Returns a single element when there is no top-level `&&`.
pub(crate) fn split_logical_and(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_amp: Option<usize> = None;
    for (idx, c) in TopLevel::new(expr) {
        if c != '&' {
            prev_amp = None;
            continue;
        }
        match prev_amp {
            Some(first) if first + 1 == idx => {
                parts.push(&expr[start..first]);
                start = idx + 1;
                prev_amp = None;
            }
            _ => prev_amp = Some(idx),
        }
    }
    parts.push(&expr[start..]);
    parts
}

/// Splits `expr` at every top-level binary `+`.
///
/// A `+` only counts as an operator when the operand text before it (since
/// the previous split) is non-empty, so sign prefixes stay with their
/// operand.
pub(crate) fn split_concat(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, c) in TopLevel::new(expr) {
        if c == '+' && !expr[start..idx].trim().is_empty() {
            parts.push(&expr[start..idx]);
            start = idx + 1;
        }
    }
    parts.push(&expr[start..]);
    parts
}

/// Splits a call's argument list at top-level commas.
pub(crate) fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, c) in TopLevel::new(args) {
        if c == ',' {
            parts.push(&args[start..idx]);
            start = idx + 1;
        }
    }
    parts.push(&args[start..]);
    parts
}

/// Byte index of the `)` closing the `(` at `open`.
pub(crate) fn matching_paren(expr: &str, open: usize) -> Option<usize> {
    let mut quotes = QuoteState::default();
    let mut depth = 0i64;
    for (idx, c) in expr[open..].char_indices() {
        if !quotes.feed(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Length of a placeholder body, i.e. the byte offset of the unquoted `}`
/// that closes it. `body` starts right after `${`.
pub(crate) fn placeholder_end(body: &str) -> Option<usize> {
    let mut quotes = QuoteState::default();
    let mut depth = 0usize;
    for (idx, c) in body.char_indices() {
        if !quotes.feed(c) {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// `[A-Za-z_]\w*`
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Dot-separated identifier chain.
pub(crate) fn is_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}
