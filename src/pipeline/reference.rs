// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reflow contributors

//! Versioned references (`owner/name@version`)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::ReflowError;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<owner>[A-Za-z0-9][A-Za-z0-9._-]*)/(?P<name>[A-Za-z0-9._-]+(?:/[A-Za-z0-9._-]+)*)@(?P<version>[A-Za-z0-9][A-Za-z0-9._+-]*)$",
        )
        .expect("reference pattern is valid")
    })
}

/// Pointer to a published definition or bundle.
///
/// The location is `owner/name`, where `name` may contain further path
/// segments. The same reference always resolves to the same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    pub owner: String,
    pub name: String,
    pub version: String,
}

impl Reference {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// `owner/name` without the version
    pub fn location(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Check an `owner/name` pair against the same rules as a full reference
    pub fn check_location(owner: &str, name: &str) -> Result<(), ReflowError> {
        let location = format!("{}/{}", owner, name);
        let invalid = |reason: String| ReflowError::InvalidReference {
            reference: location.clone(),
            reason,
        };

        let parsed: Reference = format!("{}@0", location).parse().map_err(|e| match e {
            ReflowError::InvalidReference { reason, .. } => invalid(reason),
            other => other,
        })?;
        if parsed.owner != owner || parsed.name != name {
            return Err(invalid("expected 'owner/name'".into()));
        }
        Ok(())
    }

    /// Same location pinned at another version
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            owner: self.owner.clone(),
            name: self.name.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.version)
    }
}

impl FromStr for Reference {
    type Err = ReflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.contains('@') {
            return Err(ReflowError::InvalidReference {
                reference: s.to_string(),
                reason: "missing '@version'".into(),
            });
        }

        let caps = reference_pattern()
            .captures(s)
            .ok_or_else(|| ReflowError::InvalidReference {
                reference: s.to_string(),
                reason: "expected 'owner/name@version'".into(),
            })?;

        if caps["name"].split('/').any(|seg| seg == "." || seg == "..") {
            return Err(ReflowError::InvalidReference {
                reference: s.to_string(),
                reason: "relative path segments are not allowed".into(),
            });
        }

        Ok(Self::new(&caps["owner"], &caps["name"], &caps["version"]))
    }
}

impl TryFrom<String> for Reference {
    type Error = ReflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_reference() {
        let r: Reference = "acme/ci@v1".parse().unwrap();
        assert_eq!(r.owner, "acme");
        assert_eq!(r.name, "ci");
        assert_eq!(r.version, "v1");
        assert_eq!(r.to_string(), "acme/ci@v1");
    }

    #[test]
    fn test_parse_nested_path() {
        let r: Reference = "acme/workflows/rust-ci@v2.1.0".parse().unwrap();
        assert_eq!(r.name, "workflows/rust-ci");
        assert_eq!(r.location(), "acme/workflows/rust-ci");
    }

    #[test]
    fn test_reject_malformed() {
        for bad in ["acme/ci", "ci@v1", "acme/ci@", "/ci@v1", "acme/../x@v1", "a b/c@v1"] {
            assert!(
                matches!(bad.parse::<Reference>(), Err(ReflowError::InvalidReference { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_check_location() {
        assert!(Reference::check_location("acme", "workflows/rust-ci").is_ok());
        for (owner, name) in [("acme", "*"), ("acme", "../other"), ("acme/x", "y"), (" acme", "ci"), ("acme", "")] {
            assert!(
                matches!(
                    Reference::check_location(owner, name),
                    Err(ReflowError::InvalidReference { .. })
                ),
                "{owner}/{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_as_string() {
        let r = Reference::new("acme", "setup", "v3");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"acme/setup@v3\"");
        let back: Reference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
