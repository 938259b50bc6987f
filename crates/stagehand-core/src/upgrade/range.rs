//! Version ranges for upgrade preconditions.
//!
//! Ranges use the npm-style syntax upgrade authors already write:
//! whitespace-separated comparators that must all hold, with `||` between
//! alternatives. A bare version means exactly that version; a bare partial
//! version such as `1.2` means `1.2.x`.
//!
//! Matching differs from [`semver::VersionReq::matches`] in one respect:
//! pre-release versions are ordered normally instead of being excluded, so
//! `1.7.0-rc.0` satisfies `>=1.3.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid version range '{range}': {source}")]
pub struct RangeError {
    range: String,
    #[source]
    source: semver::Error,
}

impl VersionRange {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `version` satisfies any alternative, pre-releases included.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| {
            req.comparators
                .iter()
                .all(|comparator| comparator_matches(comparator, version))
        })
    }
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut alternatives = Vec::new();
        for alternative in raw.split("||") {
            let normalized = normalize(alternative);
            let req = VersionReq::parse(&normalized).map_err(|source| RangeError {
                range: raw.to_string(),
                source,
            })?;
            alternatives.push(req);
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            alternatives,
        })
    }
}

impl TryFrom<String> for VersionRange {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.raw
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Rewrite one npm-style comparator set into `semver` syntax.
///
/// `>= 1.2.0 <2` becomes `>=1.2.0, <2`; a bare full version gets `=` and a
/// bare partial one becomes a wildcard (`1.2` to `1.2.*`).
fn normalize(alternative: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alternative.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        let token = token.trim_start_matches('v');
        let mut comparator = std::mem::take(&mut pending_op);
        let partial = comparator.is_empty() && is_partial_version(token);
        if comparator.is_empty() && is_full_version(token) {
            comparator.push('=');
        }
        comparator.push_str(token);
        if partial {
            comparator.push_str(".*");
        }
        comparators.push(comparator);
    }
    if comparators.is_empty() {
        return "*".to_string();
    }
    comparators.join(", ")
}

fn is_full_version(token: &str) -> bool {
    let core = token.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// `1` or `1.2`: numeric components only, fewer than three.
fn is_partial_version(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() < 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn comparator_matches(comparator: &Comparator, version: &Version) -> bool {
    let major = comparator.major;
    let exact = |minor: u64, patch: u64| {
        compare_release(version, major, minor, patch, &comparator.pre)
    };
    let release = (version.major, version.minor, version.patch);

    match comparator.op {
        Op::Exact | Op::Wildcard => match (comparator.minor, comparator.patch) {
            (None, _) => version.major == major,
            (Some(minor), None) => version.major == major && version.minor == minor,
            (Some(minor), Some(patch)) => exact(minor, patch) == Ordering::Equal,
        },
        Op::Greater => match (comparator.minor, comparator.patch) {
            (None, _) => version.major > major,
            (Some(minor), None) => (version.major, version.minor) > (major, minor),
            (Some(minor), Some(patch)) => exact(minor, patch) == Ordering::Greater,
        },
        Op::GreaterEq => match (comparator.minor, comparator.patch) {
            (None, _) => version.major >= major,
            (Some(minor), None) => (version.major, version.minor) >= (major, minor),
            (Some(minor), Some(patch)) => exact(minor, patch) != Ordering::Less,
        },
        Op::Less => match (comparator.minor, comparator.patch) {
            (None, _) => version.major < major,
            (Some(minor), None) => (version.major, version.minor) < (major, minor),
            (Some(minor), Some(patch)) => exact(minor, patch) == Ordering::Less,
        },
        Op::LessEq => match (comparator.minor, comparator.patch) {
            (None, _) => version.major <= major,
            (Some(minor), None) => (version.major, version.minor) <= (major, minor),
            (Some(minor), Some(patch)) => exact(minor, patch) != Ordering::Greater,
        },
        Op::Tilde => {
            let lower = exact(comparator.minor.unwrap_or(0), comparator.patch.unwrap_or(0));
            let upper = match comparator.minor {
                Some(minor) => (major, minor + 1, 0),
                None => (major + 1, 0, 0),
            };
            lower != Ordering::Less && release < upper
        }
        Op::Caret => {
            let minor = comparator.minor.unwrap_or(0);
            let patch = comparator.patch.unwrap_or(0);
            let lower = exact(minor, patch);
            let upper = if major > 0 || comparator.minor.is_none() {
                (major + 1, 0, 0)
            } else if minor > 0 || comparator.patch.is_none() {
                (0, minor + 1, 0)
            } else {
                (0, 0, patch + 1)
            };
            lower != Ordering::Less && release < upper
        }
        _ => false,
    }
}

/// Order `version` against `major.minor.patch-pre`, ignoring build metadata.
fn compare_release(
    version: &Version,
    major: u64,
    minor: u64,
    patch: u64,
    pre: &Prerelease,
) -> Ordering {
    (version.major, version.minor, version.patch)
        .cmp(&(major, minor, patch))
        .then_with(|| version.pre.cmp(pre))
}

/// Whether two versions name the same release, ignoring build metadata.
pub fn same_release(a: &Version, b: &Version) -> bool {
    compare_release(a, b.major, b.minor, b.patch, &b.pre) == Ordering::Equal
}
