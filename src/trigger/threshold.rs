//! Severity threshold filtering.

use crate::config::Threshold;
use crate::container::{UpdateKind, UpdateKindType};
use crate::tag::SemverDiff;

/// Severity rank of an update: digest < prerelease < patch < minor < major.
///
/// `None` when there is no update or a tag changed with unknown severity.
#[must_use]
pub fn severity(kind: &UpdateKind) -> Option<u8> {
    match kind.kind {
        UpdateKindType::Unknown => None,
        UpdateKindType::Digest => Some(0),
        UpdateKindType::Tag => match kind.semver_diff {
            SemverDiff::Prerelease => Some(1),
            SemverDiff::Patch => Some(2),
            SemverDiff::Minor => Some(3),
            SemverDiff::Major => Some(4),
            SemverDiff::Unknown => None,
        },
    }
}

const fn rank(threshold: Threshold) -> u8 {
    match threshold {
        Threshold::All | Threshold::Digest => 0,
        Threshold::Prerelease => 1,
        Threshold::Patch => 2,
        Threshold::Minor => 3,
        Threshold::Major => 4,
    }
}

/// True if `kind` meets or exceeds `threshold`.
///
/// `All` accepts every real update, including unknown-severity tag changes.
#[must_use]
pub fn meets(threshold: Threshold, kind: &UpdateKind) -> bool {
    if kind.kind == UpdateKindType::Unknown {
        return false;
    }
    if threshold == Threshold::All {
        return true;
    }
    severity(kind).is_some_and(|s| s >= rank(threshold))
}
