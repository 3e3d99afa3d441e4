//! External rule configuration
//!
//! `(resource, action) -> role patterns` entries are fetched from a read-only
//! endpoint, compiled into an immutable [`RuleSnapshot`] and swapped in
//! atomically by the [`RuleConfigSource`].

pub mod fetcher;
pub mod snapshot;
pub mod source;

pub use fetcher::{FileRuleFetcher, HttpRuleFetcher, RuleFetcher, StaticRuleFetcher};
pub use snapshot::{parse_rule_document, CompiledRule, RuleConfigEntry, RuleSnapshot, SnapshotOrigin};
pub use source::{RefreshOutcome, RefreshStats, RuleConfigSource, RuleSourceConfig};
