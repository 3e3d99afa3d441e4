//! Authorization decision types

use serde::{Deserialize, Serialize};

use crate::types::Scope;

/// Authorization decision with the reason behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDecision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Reason for the decision
    pub reason: DecisionReason,

    /// Rule snapshot generation the decision was made against
    pub generation: u64,
}

impl AuthDecision {
    /// Create an allow decision
    pub fn allow(scope: Scope, generation: u64) -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::Granted { scope },
            generation,
        }
    }

    /// Create a deny decision
    pub fn deny(reason: DecisionReason, generation: u64) -> Self {
        Self {
            allowed: false,
            reason,
            generation,
        }
    }

    /// Whether the deny stems from a caller-side defect rather than
    /// missing permission
    pub fn is_config_defect(&self) -> bool {
        self.reason.is_config_defect()
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    /// A grant with this scope allowed the request
    Granted { scope: Scope },

    /// The subject lacks permission (normal access denial)
    NoMatchingGrant,

    /// Caller passed an unrecognized region
    InvalidRegion { region: String },

    /// Caller passed an unknown resource name
    UnknownResource { resource: String },

    /// Caller passed an unknown action name
    UnknownAction { action: String },

    /// Caller passed an unknown field class
    UnknownFieldClass { field_class: String },
}

impl DecisionReason {
    pub fn is_config_defect(&self) -> bool {
        !matches!(self, DecisionReason::Granted { .. } | DecisionReason::NoMatchingGrant)
    }
}
