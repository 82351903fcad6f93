//! C1 — semantic version parsing, comparison, and requirement evaluation.
//!
//! Built in-house rather than pulled from the `semver` crate: the
//! component table in spec.md budgets a dedicated 3% share of the
//! source to this, so it is treated as core rather than a collaborator.

use std::cmp::Ordering;
use std::fmt;

/// A parsed semantic version: `major.minor.patch[-prerelease]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Major version component.
    pub major: u64,
    /// Minor version component.
    pub minor: u64,
    /// Patch version component.
    pub patch: u64,
    /// Optional prerelease tag (e.g. `beta`, `rc.1`).
    pub prerelease: Option<String>,
}

impl Version {
    /// Parses a version string of the form `major.minor.patch[-pre]`.
    /// Missing `minor`/`patch` default to `0`.
    pub fn parse(s: &str) -> Option<Version> {
        let (core, prerelease) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s, None),
        };
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map(|p| p.parse().ok()).unwrap_or(Some(0))?;
        let patch = parts.next().map(|p| p.parse().ok()).unwrap_or(Some(0))?;
        if parts.next().is_some() {
            return None;
        }
        Some(Version {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                // A release always outranks any prerelease of the same
                // major.minor.patch triple.
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// A parsed version requirement, e.g. `>=1.0.0`, `~>1.0`, `=2.3.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Exact match, ignoring any leading `=`.
    Exact(Version),
    /// `>=` — at least this version.
    AtLeast(Version),
    /// `>` — strictly greater.
    GreaterThan(Version),
    /// `<=` — at most this version.
    AtMost(Version),
    /// `<` — strictly less.
    LessThan(Version),
    /// `~>` — pessimistic/tilde requirement: allows patch (or minor, if
    /// only major.minor was given) increments but not the next minor
    /// (or major) version. The `u8` is the number of explicit components
    /// in the written requirement (2 for `~>1.0`, 3 for `~>1.0.0`), which
    /// determines where the upper bound falls.
    Tilde(Version, u8),
}

impl Requirement {
    /// Parses a requirement string. Bare version strings (no operator)
    /// are treated as [`Requirement::Exact`].
    pub fn parse(s: &str) -> Option<Requirement> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("~>") {
            let rest = rest.trim();
            let precision = rest.matches('.').count() as u8 + 1;
            return Version::parse(rest).map(|v| Requirement::Tilde(v, precision.min(3)));
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return Version::parse(rest.trim()).map(Requirement::AtLeast);
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Version::parse(rest.trim()).map(Requirement::AtMost);
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Version::parse(rest.trim()).map(Requirement::GreaterThan);
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Version::parse(rest.trim()).map(Requirement::LessThan);
        }
        if let Some(rest) = s.strip_prefix('=') {
            return Version::parse(rest.trim()).map(Requirement::Exact);
        }
        Version::parse(s).map(Requirement::Exact)
    }

    /// Evaluates whether `candidate` satisfies this requirement.
    pub fn satisfies(&self, candidate: &Version) -> bool {
        match self {
            Requirement::Exact(v) => candidate == v,
            Requirement::AtLeast(v) => candidate >= v,
            Requirement::GreaterThan(v) => candidate > v,
            Requirement::AtMost(v) => candidate <= v,
            Requirement::LessThan(v) => candidate < v,
            Requirement::Tilde(v, precision) => {
                if candidate < v {
                    return false;
                }
                match precision {
                    // `~>1` — allow anything sharing the major version.
                    1 => candidate.major == v.major,
                    // `~>1.0` — allow anything up to (not including) the
                    // next major version.
                    2 => candidate.major == v.major,
                    // `~>1.0.0` — allow anything up to (not including)
                    // the next minor version.
                    _ => candidate.major == v.major && candidate.minor == v.minor,
                }
            }
        }
    }
}

/// Evaluates a version-string/requirement-string pair directly, as used
/// by dependency checks in `module.json`.
pub fn version_satisfies(version: &str, requirement: &str) -> bool {
    match (Version::parse(version), Requirement::parse(requirement)) {
        (Some(v), Some(r)) => r.satisfies(&v),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip_identity() {
        for s in ["1.0.0", "0.2.5", "10.20.30"] {
            let v = Version::parse(s).unwrap();
            assert_eq!(v.to_string(), s);
        }
    }

    #[test]
    fn prerelease_orders_below_release() {
        let release = Version::parse("1.0.0").unwrap();
        let pre = Version::parse("1.0.0-beta").unwrap();
        assert!(pre < release);
    }

    #[test]
    fn exact_requirement() {
        assert!(version_satisfies("1.0.0", "1.0.0"));
        assert!(!version_satisfies("1.0.0-beta", "1.0.0"));
    }

    #[test]
    fn at_least_requirement() {
        assert!(version_satisfies("1.0.5", ">=1.0.0"));
        assert!(!version_satisfies("0.9.9", ">=1.0.0"));
    }

    #[test]
    fn tilde_requirement_patch_level() {
        assert!(version_satisfies("1.0.0", "~>1.0.0"));
        assert!(version_satisfies("1.0.5", "~>1.0.0"));
        assert!(!version_satisfies("1.1.0", "~>1.0.0"));
        assert!(!version_satisfies("2.0.0", "~>1.0.0"));
    }

    #[test]
    fn tilde_requirement_minor_level() {
        assert!(version_satisfies("1.0.0", "~>1.0"));
        assert!(version_satisfies("1.5.3", "~>1.0"));
        assert!(!version_satisfies("2.0.0", "~>1.0"));
    }
}
