//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
///
/// Decision calls never surface these; they are returned at the rule-source
/// boundary and used to classify denials that stem from caller defects.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// No rule snapshot could be fetched and none was installed before
    #[error("Rule configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// Region string is not a known canonical region identifier
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Resource name is not part of the closed resource set
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// Action name is not part of the closed action set
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Field class name is not part of the closed field class set
    #[error("Unknown field class: {0}")]
    UnknownFieldClass(String),

    /// Malformed role pattern in the rule configuration
    #[error("Invalid role pattern: {0}")]
    InvalidPattern(String),

    /// Transport failure while fetching the rule configuration
    #[error("Rule fetch failed: {0}")]
    Fetch(String),

    /// Rule document could not be decoded
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether this error is a caller/configuration defect rather than an outage
    pub fn is_config_defect(&self) -> bool {
        matches!(
            self,
            Self::InvalidRegion(_)
                | Self::UnknownResource(_)
                | Self::UnknownAction(_)
                | Self::UnknownFieldClass(_)
                | Self::InvalidPattern(_)
        )
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        AuthzError::Fetch(err.to_string())
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
