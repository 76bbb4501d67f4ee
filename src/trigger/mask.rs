//! Masking of secret configuration values.

use serde_json::{Map, Value};

/// Key fragments that mark a setting as secret.
pub const SECRET_HINTS: &[&str] = &["password", "pass", "token", "secret", "apikey", "key", "auth"];

/// Keeps the first and last `keep` characters of `value` and replaces the
/// rest with `ch`. Values too short to keep anything are fully masked.
///
/// ```
/// use driftwatch::trigger::mask::mask;
///
/// assert_eq!(mask("supersecret", 1, '*'), "s*********t");
/// assert_eq!(mask("ab", 1, '*'), "**");
/// ```
#[must_use]
pub fn mask(value: &str, keep: usize, ch: char) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= keep.saturating_mul(2) {
        return std::iter::repeat(ch).take(chars.len()).collect();
    }
    let hidden = chars.len() - 2 * keep;
    chars[..keep]
        .iter()
        .copied()
        .chain(std::iter::repeat(ch).take(hidden))
        .chain(chars[chars.len() - keep..].iter().copied())
        .collect()
}

/// True if `key` looks like it holds a secret.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_HINTS.iter().any(|hint| key.contains(hint))
}

/// Copy of `config` with secret-looking scalar values masked, recursively.
#[must_use]
pub fn mask_configuration(config: &Map<String, Value>) -> Map<String, Value> {
    config
        .iter()
        .map(|(key, value)| {
            let masked = match value {
                Value::Object(inner) => Value::Object(mask_configuration(inner)),
                Value::String(s) if is_secret_key(key) => Value::String(mask(s, 1, '*')),
                Value::Number(n) if is_secret_key(key) => Value::String(mask(&n.to_string(), 1, '*')),
                other => other.clone(),
            };
            (key.clone(), masked)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mask_keeps_edges() {
        assert_eq!(mask("abcdef", 2, '#'), "ab##ef");
        assert_eq!(mask("abcd", 2, '*'), "****");
        assert_eq!(mask("", 1, '*'), "");
        assert_eq!(mask("pässwörd", 1, '*'), "p******d");
        assert_eq!(mask("abc", 0, '*'), "***");
    }

    #[test]
    fn configuration_masks_secret_keys_only() {
        let Value::Object(config) = json!({
            "url": "https://hooks.example.com",
            "token": "xoxb-123456",
            "smtp": {"user": "me", "password": "hunter22"},
            "order": 5,
        }) else {
            unreachable!()
        };
        let masked = mask_configuration(&config);
        assert_eq!(masked["url"], json!("https://hooks.example.com"));
        assert_eq!(masked["token"], json!("x*********6"));
        assert_eq!(masked["smtp"]["password"], json!("h******2"));
        assert_eq!(masked["smtp"]["user"], json!("me"));
        assert_eq!(masked["order"], json!(5));
    }
}
