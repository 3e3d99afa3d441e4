//! Immutable rule snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::RoleCatalog;
use crate::error::{AuthzError, Result};
use crate::pattern::RolePattern;
use crate::types::{Action, Resource};

/// One `(resource, action) -> role patterns` entry as served by the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfigEntry {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl RuleConfigEntry {
    pub fn new<I, S>(resource: impl Into<String>, action: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource: resource.into(),
            action: action.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Rule entry with parsed resource, action and patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    pub resource: Resource,
    pub action: Action,
    pub patterns: Vec<RolePattern>,
}

impl CompiledRule {
    /// Whether any of `roles` matches any pattern of this rule
    pub fn matches<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches_any(roles))
    }
}

/// Where a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Successfully fetched from the rule endpoint
    Fetched,
    /// Hard-coded fallback used until the first successful fetch
    Fallback,
}

/// Immutable, versioned set of rules
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    entries: Vec<RuleConfigEntry>,
    rules: Vec<CompiledRule>,
    defects: Vec<String>,
    origin: SnapshotOrigin,
    generation: u64,
    version: String,
    fetched_at: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Compile raw entries into a snapshot
    ///
    /// Entries with an unknown resource or action are dropped; invalid role
    /// patterns are dropped from their entry. Each drop is logged as a
    /// configuration defect and kept in [`RuleSnapshot::defects`].
    pub fn compile(entries: Vec<RuleConfigEntry>, origin: SnapshotOrigin, generation: u64) -> Self {
        let mut rules = Vec::with_capacity(entries.len());
        let mut defects = Vec::new();

        for entry in &entries {
            match Self::compile_entry(entry, &mut defects) {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    warn!(
                        target: "authz::config_defect",
                        resource = %entry.resource,
                        action = %entry.action,
                        "Skipping rule entry: {}",
                        err
                    );
                    defects.push(err.to_string());
                }
            }
        }

        Self {
            version: Self::digest(&entries),
            entries,
            rules,
            defects,
            origin,
            generation,
            fetched_at: Utc::now(),
        }
    }

    fn compile_entry(entry: &RuleConfigEntry, defects: &mut Vec<String>) -> Result<CompiledRule> {
        let resource: Resource = entry.resource.parse()?;
        let action: Action = entry.action.parse()?;

        let mut patterns = Vec::with_capacity(entry.roles.len());
        for raw in &entry.roles {
            match RolePattern::new(raw) {
                Ok(pattern) => patterns.push(pattern),
                Err(err) => {
                    warn!(
                        target: "authz::config_defect",
                        resource = %resource,
                        action = %action,
                        pattern = %raw,
                        "Ignoring role pattern: {}",
                        err
                    );
                    defects.push(err.to_string());
                }
            }
        }

        Ok(CompiledRule { resource, action, patterns })
    }

    /// Snapshot used before any fetch succeeded
    ///
    /// Only the explicitly recognized administrative roles are granted, and
    /// only what the role catalog already gives them.
    pub fn fallback() -> Self {
        let admins = RoleCatalog::administrative_role_names();
        let mut entries = Vec::new();
        for resource in Resource::ALL {
            for action in Action::ALL {
                entries.push(RuleConfigEntry::new(resource.as_str(), action.as_str(), admins.clone()));
            }
        }
        Self::compile(entries, SnapshotOrigin::Fallback, 0)
    }

    /// Stable digest over the canonicalized entries
    fn digest(entries: &[RuleConfigEntry]) -> String {
        let mut canonical: Vec<(&str, &str, Vec<&str>)> = entries
            .iter()
            .map(|e| {
                let mut roles: Vec<&str> = e.roles.iter().map(String::as_str).collect();
                roles.sort_unstable();
                roles.dedup();
                (e.resource.as_str(), e.action.as_str(), roles)
            })
            .collect();
        canonical.sort();

        let mut hasher = blake3::Hasher::new();
        for (resource, action, roles) in canonical {
            hasher.update(resource.as_bytes());
            hasher.update(b"\0");
            hasher.update(action.as_bytes());
            for role in roles {
                hasher.update(b"\0");
                hasher.update(role.as_bytes());
            }
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// Raw entries as fetched
    pub fn entries(&self) -> &[RuleConfigEntry] {
        &self.entries
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Configuration defects found while compiling
    pub fn defects(&self) -> &[String] {
        &self.defects
    }

    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == SnapshotOrigin::Fallback
    }

    /// Monotonic install counter, 0 for the fallback
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content digest, equal for snapshots with the same rules
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// `(resource, action)` pairs granted to `roles` by this snapshot
    pub fn matching_pairs<'a, S: AsRef<str> + 'a>(
        &'a self,
        roles: &'a [S],
    ) -> impl Iterator<Item = (Resource, Action)> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.matches(roles))
            .map(|rule| (rule.resource, rule.action))
    }
}

/// Decode a rule document
///
/// Accepts a bare JSON array of entries or an object wrapping it in `rules`.
pub fn parse_rule_document(bytes: &[u8]) -> Result<Vec<RuleConfigEntry>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RuleDocument {
        List(Vec<RuleConfigEntry>),
        Wrapped { rules: Vec<RuleConfigEntry> },
    }

    match serde_json::from_slice::<RuleDocument>(bytes) {
        Ok(RuleDocument::List(entries)) | Ok(RuleDocument::Wrapped { rules: entries }) => Ok(entries),
        Err(_) => {
            // Re-decode as a plain list for a precise error location
            serde_json::from_slice::<Vec<RuleConfigEntry>>(bytes).map_err(AuthzError::from)
        }
    }
}
