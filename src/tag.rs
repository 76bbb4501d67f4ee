//! Tag parsing, comparison and transformation.
//!
//! Image tags are loosely semver-shaped (`1.2.3`, `v2.0`, `1.25.3-alpine`,
//! `2024.1.0.3.7`). This module coerces them into a [`Version`], compares and
//! diffs them, and rewrites them through user formulas of the form
//! `<pattern> => <replacement>`.
//!
//! All functions here are pure. Parsing is a hand-written linear scan and
//! formulas are compiled with the `regex` crate, which never backtracks.

use std::cmp::Ordering;
use std::fmt;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Patterns longer than this are rejected outright.
pub const MAX_TRANSFORM_PATTERN_LEN: usize = 1024;

/// Upper bound on the compiled size of a transform pattern.
const TRANSFORM_REGEX_SIZE_LIMIT: usize = 1 << 20;

/// One dot-separated prerelease identifier.
///
/// Numeric identifiers sort before alphanumeric ones (variant order).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrereleaseId {
    Numeric(u64),
    Alpha(String),
}

impl fmt::Display for PrereleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Alpha(s) => f.write_str(s),
        }
    }
}

/// A parsed tag.
///
/// # Examples
///
/// ```
/// use driftwatch::tag::{PrereleaseId, Version};
///
/// let v = Version::parse("1.2.3.4.5").unwrap();
/// assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
/// assert_eq!(v.prerelease, vec![PrereleaseId::Numeric(4), PrereleaseId::Numeric(5)]);
///
/// assert!(Version::parse("latest").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<PrereleaseId>,
}

impl Version {
    /// Coerces a tag into a version, or `None` when it carries no numeric run.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let bytes = tag.trim().as_bytes();
        let start = bytes.iter().position(u8::is_ascii_digit)?;

        let mut numbers = Vec::new();
        let mut i = start;
        loop {
            let run_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i == run_start {
                break;
            }
            // Slice is ASCII digits only, so this is valid UTF-8.
            let run = std::str::from_utf8(&bytes[run_start..i]).ok()?;
            numbers.push(run.parse::<u64>().ok()?);

            let continues = i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit();
            if !continues {
                break;
            }
            i += 1;
        }

        let mut prerelease: Vec<PrereleaseId> = numbers
            .iter()
            .skip(3)
            .copied()
            .map(PrereleaseId::Numeric)
            .collect();

        if i < bytes.len() && bytes[i] == b'-' {
            let rest = std::str::from_utf8(&bytes[i + 1..]).ok()?;
            let pre = rest.split('+').next().unwrap_or_default();
            prerelease.extend(
                pre.split('.')
                    .filter(|ident| !ident.is_empty())
                    .map(parse_prerelease_id),
            );
        }

        Some(Self {
            major: numbers.first().copied().unwrap_or(0),
            minor: numbers.get(1).copied().unwrap_or(0),
            patch: numbers.get(2).copied().unwrap_or(0),
            prerelease,
        })
    }

    /// True when this version carries no prerelease identifiers.
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.prerelease.is_empty()
    }
}

fn parse_prerelease_id(ident: &str) -> PrereleaseId {
    if ident.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = ident.parse::<u64>() {
            return PrereleaseId::Numeric(n);
        }
    }
    PrereleaseId::Alpha(ident.to_string())
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.is_release(), other.is_release()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.prerelease.cmp(&other.prerelease),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for (idx, id) in self.prerelease.iter().enumerate() {
            let sep = if idx == 0 { '-' } else { '.' };
            write!(f, "{sep}{id}")?;
        }
        Ok(())
    }
}

/// Severity label describing the magnitude of a tag change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemverDiff {
    Major,
    Minor,
    Patch,
    Prerelease,
    Unknown,
}

impl SemverDiff {
    /// The lowercase label used in templates and configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
            Self::Prerelease => "prerelease",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SemverDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a possibly-absent tag.
///
/// # Errors
///
/// Returns `ValidationError::MissingTag` when `tag` is `None`. A present
/// but unparsable tag (`""`, `"latest"`) is `Ok(None)`.
pub fn parse(tag: Option<&str>) -> Result<Option<Version>, ValidationError> {
    let tag = tag.ok_or(ValidationError::MissingTag)?;
    Ok(Version::parse(tag))
}

/// Greater-or-equal comparison: `is_greater(x, x)` holds for any parseable `x`.
///
/// Returns `false` whenever either side fails to parse.
#[must_use]
pub fn is_greater(a: &str, b: &str) -> bool {
    match (Version::parse(a), Version::parse(b)) {
        (Some(a), Some(b)) => a >= b,
        _ => false,
    }
}

/// The first level at which `a` and `b` differ.
///
/// A release compared with a prerelease of the same core reports `Patch`;
/// two different prereleases report `Prerelease`.
#[must_use]
pub fn diff(a: &str, b: &str) -> Option<SemverDiff> {
    let a = Version::parse(a)?;
    let b = Version::parse(b)?;

    if a.major != b.major {
        return Some(SemverDiff::Major);
    }
    if a.minor != b.minor {
        return Some(SemverDiff::Minor);
    }
    if a.patch != b.patch {
        return Some(SemverDiff::Patch);
    }
    match (a.is_release(), b.is_release()) {
        (true, true) => None,
        (true, false) | (false, true) => Some(SemverDiff::Patch),
        (false, false) if a.prerelease == b.prerelease => None,
        (false, false) => Some(SemverDiff::Prerelease),
    }
}

/// Rewrites `tag` through a `<pattern> => <replacement>` formula.
///
/// The result is the replacement with `$N` expanded to capture group `N`
/// (`$0` is the whole match, a group that did not participate expands to
/// nothing). The original tag is returned unchanged when the formula is
/// empty, malformed, oversized, fails to compile, or does not match.
///
/// ```
/// use driftwatch::tag::transform;
///
/// assert_eq!(transform("^v(.+)$ => $1", "v1.2.3"), "1.2.3");
/// assert_eq!(transform("^(\\d+)\\.(\\d+)-(.*)$=>$1.$2.0-$3", "1.4-ls12"), "1.4.0-ls12");
/// assert_eq!(transform("no-match => x", "1.2.3"), "1.2.3");
/// ```
#[must_use]
pub fn transform(formula: &str, tag: &str) -> String {
    let Some((pattern, replacement)) = formula.split_once("=>") else {
        return tag.to_string();
    };
    let pattern = pattern.trim();
    let replacement = replacement.trim();

    if pattern.is_empty() || pattern.chars().count() > MAX_TRANSFORM_PATTERN_LEN {
        return tag.to_string();
    }

    let Ok(re) = RegexBuilder::new(pattern)
        .size_limit(TRANSFORM_REGEX_SIZE_LIMIT)
        .build()
    else {
        return tag.to_string();
    };

    let Some(caps) = re.captures(tag) else {
        return tag.to_string();
    };

    let mut out = String::with_capacity(replacement.len() + tag.len());
    let mut chars = replacement.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let digits_start = idx + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        if digits_end == digits_start {
            out.push('$');
            continue;
        }
        let group = replacement[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|n| caps.get(n));
        if let Some(m) = group {
            out.push_str(m.as_str());
        }
    }
    out
}
