//! Role pattern matching
//!
//! A role pattern is either an exact role name or a prefix ending in `*`.
//! Matching is prefix-only: `Regio_*` matches `Regio_Oost` but never
//! `Regionaal_Oost`, and a `*` anywhere but the end is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AuthzError, Result};

/// Compiled role pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RolePattern {
    /// Exact role name
    Exact(String),
    /// Any role starting with the prefix
    Prefix(String),
}

impl RolePattern {
    /// Parse a pattern string
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidPattern`] for empty patterns, a bare `*`,
    /// or a `*` that is not the final character.
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AuthzError::InvalidPattern("pattern cannot be empty".to_string()));
        }

        match raw.strip_suffix('*') {
            Some(prefix) => {
                if prefix.is_empty() {
                    return Err(AuthzError::InvalidPattern(
                        "bare '*' would match every role".to_string(),
                    ));
                }
                if prefix.contains('*') {
                    return Err(AuthzError::InvalidPattern(format!(
                        "wildcard must be the final character: '{}'",
                        raw
                    )));
                }
                Ok(Self::Prefix(prefix.to_string()))
            }
            None if raw.contains('*') => Err(AuthzError::InvalidPattern(format!(
                "wildcard must be the final character: '{}'",
                raw
            ))),
            None => Ok(Self::Exact(raw.to_string())),
        }
    }

    /// Whether `role` matches this pattern
    pub fn matches(&self, role: &str) -> bool {
        match self {
            Self::Exact(name) => role == name,
            Self::Prefix(prefix) => role.starts_with(prefix.as_str()),
        }
    }

    /// Whether any of `roles` matches this pattern
    pub fn matches_any<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.matches(role.as_ref()))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }
}

impl FromStr for RolePattern {
    type Err = AuthzError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for RolePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

impl Serialize for RolePattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RolePattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}
