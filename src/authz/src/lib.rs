//! # HDCN Authorization Engine
//!
//! Role-based, region-scoped authorization for the member administration.
//!
//! ## Features
//!
//! - **Closed role catalog** with per-role grants, unioned across every role a subject holds
//! - **Region scoping** via `Regio_*` roles, with a fixed region table
//! - **Field-level visibility** per field class, including the membership-type motor gate
//! - **Remote rule configuration** with atomic snapshot swap, TTL refresh and a fail-closed fallback
//! - **LRU caching** of effective permission sets per role combination
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use hdcn_authz::{AuthorizationEngine, EngineConfig, StaticRuleFetcher, Subject};
//!
//! let engine = AuthorizationEngine::with_fetcher(
//!     EngineConfig::default(),
//!     Arc::new(StaticRuleFetcher::new(Vec::new())),
//! );
//!
//! let subject = Subject::new(["Members_Read", "Regio_Limburg"]);
//! assert!(engine.can_perform(&subject, "members", "read", Some("limburg")));
//! assert!(!engine.can_perform(&subject, "members", "write", Some("limburg")));
//! assert!(!engine.can_perform(&subject, "members", "read", Some("utrecht")));
//! ```

pub mod catalog;
pub mod engine;
pub mod error;
pub mod pattern;
pub mod permissions;
pub mod region;
pub mod rules;
pub mod types;

// Re-export commonly used types
pub use catalog::{Role, RoleCatalog, RoleClass};
pub use engine::{AuthDecision, AuthorizationEngine, CacheConfig, DecisionCache, DecisionReason, EngineConfig};
pub use error::{AuthzError, Result};
pub use pattern::RolePattern;
pub use permissions::{EffectivePermissionSet, PermissionCalculator};
pub use region::{AccessibleRegions, Region, RegionMapper, RegionToken};
pub use rules::{
    FileRuleFetcher, HttpRuleFetcher, RefreshOutcome, RuleConfigEntry, RuleConfigSource, RuleFetcher,
    RuleSnapshot, RuleSourceConfig, StaticRuleFetcher,
};
pub use types::{AccessRequest, Action, FieldClass, PermissionGrant, RecordContext, Resource, Scope, Subject};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
