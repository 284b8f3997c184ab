//! Version classification.
//!
//! A declared version string falls into one of three kinds:
//! - `exact`: a concrete version such as `1.25.6` or `v0.21.0`, compared
//!   byte-for-byte across applies
//! - `latest`: empty or the literal `latest`, re-resolved on demand and
//!   always eligible for upgrade under `--update-*`
//! - `alias`: a symbolic name such as `stable`; the alias string is what gets
//!   compared across applies, the resolved version is stored alongside

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    Exact,
    Latest,
    Alias,
}

impl VersionKind {
    /// Classifies a declared version string.
    ///
    /// Empty or `latest` is [`Latest`](Self::Latest); a leading digit, or a
    /// `v` followed by a digit, is [`Exact`](Self::Exact); anything else is a
    /// symbolic [`Alias`](Self::Alias).
    pub fn classify(version: &str) -> Self {
        let version = version.trim();
        if version.is_empty() || version == "latest" {
            return Self::Latest;
        }
        let mut chars = version.chars();
        match chars.next() {
            Some(c) if c.is_ascii_digit() => Self::Exact,
            Some('v') if chars.next().is_some_and(|c| c.is_ascii_digit()) => Self::Exact,
            _ => Self::Alias,
        }
    }
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Latest => write!(f, "latest"),
            Self::Alias => write!(f, "alias"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_exact() {
        assert_eq!(VersionKind::classify("1.25.6"), VersionKind::Exact);
        assert_eq!(VersionKind::classify("v0.21.0"), VersionKind::Exact);
        assert_eq!(VersionKind::classify("2.86.0"), VersionKind::Exact);
    }

    #[test]
    fn classify_latest() {
        assert_eq!(VersionKind::classify(""), VersionKind::Latest);
        assert_eq!(VersionKind::classify("latest"), VersionKind::Latest);
    }

    #[test]
    fn classify_alias() {
        assert_eq!(VersionKind::classify("stable"), VersionKind::Alias);
        assert_eq!(VersionKind::classify("lts"), VersionKind::Alias);
        // A bare `v` is not a version number.
        assert_eq!(VersionKind::classify("vnext"), VersionKind::Alias);
    }
}
