//! Lenient semantic versions and version constraints.
//!
//! Registry tags are rarely strict semver: they carry a `v` prefix and
//! sometimes omit the minor or patch component (`v1`, `v1.2`). [`Version`]
//! accepts those forms and keeps the original tag text so that a resolved
//! version can be used verbatim as a registry reference.
//!
//! [`Constraint`] understands the range syntax found in package metadata:
//! comparators (`=`, `!=`, `>`, `>=`, `<`, `<=`, `~`, `^`), wildcards
//! (`1.2.x`, `*`), comma or space separated conjunctions and `||`
//! alternatives, all with optional `v` prefixes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::VersionReq;
use thiserror::Error;

/// Errors from parsing versions and constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The text is not a semantic version.
    #[error("invalid semantic version: {0}")]
    InvalidVersion(String),

    /// The text is not a version constraint.
    #[error("improper constraint: {0}")]
    InvalidConstraint(String),
}

/// A semantic version parsed from a registry tag.
#[derive(Debug, Clone)]
pub struct Version {
    semver: semver::Version,
    original: String,
}

impl Version {
    /// Parse a tag such as `v1.2.3`, `1.2` or `v2.0.0-rc.1`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidVersion`] when the text has no numeric
    /// core, more than three components, or a malformed pre-release.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let semver = parse_lenient(s).ok_or_else(|| VersionError::InvalidVersion(s.to_string()))?;
        Ok(Self {
            semver,
            original: s.to_string(),
        })
    }

    /// The normalized strict semver value.
    pub fn semver(&self) -> &semver::Version {
        &self.semver
    }

    /// The tag text this version was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.semver == other.semver
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.semver.cmp(&other.semver)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_lenient(s: &str) -> Option<semver::Version> {
    let s = s.trim();
    let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
    let split = s.find(['-', '+']).unwrap_or(s.len());
    let (core, rest) = s.split_at(split);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut nums = [0u64; 3];
    for (slot, part) in nums.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }

    semver::Version::parse(&format!("{}.{}.{}{rest}", nums[0], nums[1], nums[2])).ok()
}

/// One `&&`-joined group of a constraint.
#[derive(Debug, Clone)]
struct Conjunction {
    req: VersionReq,
    excluded: Vec<semver::Version>,
}

impl Conjunction {
    fn matches(&self, v: &semver::Version) -> bool {
        self.req.matches(v) && !self.excluded.contains(v)
    }
}

/// A version range: one or more alternatives joined by `||`.
///
/// # Example
///
/// ```
/// use up_schema::{Constraint, Version};
///
/// let c = Constraint::parse(">=v1.0.0, <v2").unwrap();
/// assert!(c.matches(&Version::parse("v1.4.2").unwrap()));
/// assert!(!c.matches(&Version::parse("v2.0.0").unwrap()));
/// ```
#[derive(Debug, Clone)]
pub struct Constraint {
    original: String,
    alternatives: Vec<Conjunction>,
}

impl Constraint {
    /// Parse a constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidConstraint`] for empty input, unknown
    /// operators, or operands that are not versions.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let improper = || VersionError::InvalidConstraint(s.to_string());

        let mut alternatives = Vec::new();
        for alt in s.split("||") {
            let terms = tokenize(alt);
            if terms.is_empty() {
                return Err(improper());
            }

            let mut comparators = Vec::new();
            let mut excluded = Vec::new();
            for (op, operand) in terms {
                let operand = operand.strip_prefix(['v', 'V']).unwrap_or(operand);
                let starts_ok = operand
                    .starts_with(|c: char| c.is_ascii_digit() || matches!(c, '*' | 'x' | 'X'));
                if !starts_ok {
                    return Err(improper());
                }
                match op {
                    "!=" => {
                        let v = parse_lenient(operand).ok_or_else(improper)?;
                        excluded.push(v);
                    }
                    // A bare operand is an exact match, not cargo's caret default.
                    "" if !is_wildcard(operand) => comparators.push(format!("={operand}")),
                    "" => comparators.push(operand.to_string()),
                    "==" => comparators.push(format!("={operand}")),
                    op => comparators.push(format!("{op}{operand}")),
                }
            }

            let req = if comparators.is_empty() {
                VersionReq::STAR
            } else {
                VersionReq::parse(&comparators.join(", ")).map_err(|_| improper())?
            };
            alternatives.push(Conjunction { req, excluded });
        }

        Ok(Self {
            original: s.to_string(),
            alternatives,
        })
    }

    /// Whether `version` satisfies any alternative.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|a| a.matches(version.semver()))
    }

    /// The text this constraint was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for Constraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_wildcard(operand: &str) -> bool {
    operand.split('.').any(|p| matches!(p, "*" | "x" | "X"))
}

const OPERATORS: &[&str] = &[">=", "<=", "!=", "==", ">", "<", "=", "~", "^"];

/// Split one alternative into `(operator, operand)` pairs. Operators may be
/// separated from their operand by whitespace (`>= 1.0`).
fn tokenize(alt: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut pending: Option<&str> = None;

    for token in alt.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
        let op = OPERATORS
            .iter()
            .find(|op| token.starts_with(**op))
            .copied()
            .unwrap_or("");
        let operand = &token[op.len()..];

        match (pending.take(), op, operand.is_empty()) {
            (Some(prev), "", _) => out.push((prev, operand)),
            (Some(prev), _, _) => {
                // Dangling operator followed by another operator.
                out.push((prev, ""));
                if operand.is_empty() {
                    pending = Some(op);
                } else {
                    out.push((op, operand));
                }
            }
            (None, op, true) if !op.is_empty() => pending = Some(op),
            (None, op, _) => out.push((op, operand)),
        }
    }
    if let Some(op) = pending {
        out.push((op, ""));
    }
    out
}
