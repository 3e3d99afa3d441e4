//! Core authorization types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;
use crate::region::{RegionMapper, RegionToken};

/// Resource type an action is performed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Members,
    Events,
    Products,
    Orders,
    Communication,
    System,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::Members,
        Resource::Events,
        Resource::Products,
        Resource::Orders,
        Resource::Communication,
        Resource::System,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Members => "members",
            Resource::Events => "events",
            Resource::Products => "products",
            Resource::Orders => "orders",
            Resource::Communication => "communication",
            Resource::System => "system",
        }
    }
}

impl FromStr for Resource {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AuthzError::UnknownResource(s.to_string()))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::Read, Action::Write];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            other => Err(AuthzError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named bundle of record attributes gated together for visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    Personal,
    Address,
    Membership,
    Motor,
    Financial,
    Administrative,
    Status,
}

impl FieldClass {
    pub const ALL: [FieldClass; 7] = [
        FieldClass::Personal,
        FieldClass::Address,
        FieldClass::Membership,
        FieldClass::Motor,
        FieldClass::Financial,
        FieldClass::Administrative,
        FieldClass::Status,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldClass::Personal => "personal",
            FieldClass::Address => "address",
            FieldClass::Membership => "membership",
            FieldClass::Motor => "motor",
            FieldClass::Financial => "financial",
            FieldClass::Administrative => "administrative",
            FieldClass::Status => "status",
        }
    }

    /// Classes visible to record owners and regional readers
    pub fn is_member_class(self) -> bool {
        matches!(
            self,
            FieldClass::Personal | FieldClass::Address | FieldClass::Membership | FieldClass::Motor
        )
    }

    /// Classes that need an explicit elevated grant
    pub fn is_elevated(self) -> bool {
        matches!(self, FieldClass::Financial | FieldClass::Administrative)
    }
}

impl FromStr for FieldClass {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldClass::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AuthzError::UnknownFieldClass(s.to_string()))
    }
}

impl fmt::Display for FieldClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breadth of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Unrestricted, region independent
    All,
    /// The subject's own record only
    Own,
    /// Personal fields of the subject's own record only
    OwnPersonal,
    /// One region, or every region for `RegionToken::All`
    Region(RegionToken),
    /// A single field class
    Field(FieldClass),
}

impl Scope {
    /// Whether this scope is tied to the subject's own record
    pub fn is_self_scoped(self) -> bool {
        matches!(self, Scope::Own | Scope::OwnPersonal)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Own => f.write_str("own"),
            Scope::OwnPersonal => f.write_str("own_personal"),
            Scope::Region(token) => write!(f, "region:{}", token),
            Scope::Field(class) => f.write_str(class.as_str()),
        }
    }
}

impl FromStr for Scope {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => return Ok(Scope::All),
            "own" => return Ok(Scope::Own),
            "own_personal" => return Ok(Scope::OwnPersonal),
            _ => {}
        }

        if let Some(region) = s.strip_prefix("region:") {
            return RegionMapper::parse_region(region)
                .map(Scope::Region)
                .ok_or_else(|| AuthzError::InvalidRegion(region.to_string()));
        }

        s.parse().map(Scope::Field)
    }
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A `(resource, action, scope)` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub resource: Resource,
    pub action: Action,
    pub scope: Scope,
}

impl PermissionGrant {
    pub const fn new(resource: Resource, action: Action, scope: Scope) -> Self {
        Self { resource, action, scope }
    }
}

impl fmt::Display for PermissionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.scope)
    }
}

/// The role-carrying entity an authorization decision is made for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Role claims as issued by the identity provider
    #[serde(default)]
    pub roles: Vec<String>,

    /// Whether the record under consideration belongs to the subject
    #[serde(default)]
    pub is_own_record: bool,
}

impl Subject {
    /// Create a subject from role claims
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            is_own_record: false,
        }
    }

    /// Mark the target record as the subject's own
    pub fn with_own_record(mut self, is_own_record: bool) -> Self {
        self.is_own_record = is_own_record;
        self
    }
}

/// Per-record facts supplied by the resource-owning collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContext {
    /// Whether the subject owns the record
    #[serde(default)]
    pub is_own_record: bool,

    /// Record region, canonical id or display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Membership type, gates the `motor` field class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_type: Option<String>,
}

impl RecordContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive ownership by comparing owner and subject identities
    pub fn owned_by(owner_id: &str, subject_id: &str) -> Self {
        Self {
            is_own_record: !owner_id.is_empty() && owner_id == subject_id,
            ..Self::default()
        }
    }

    pub fn with_own_record(mut self, is_own_record: bool) -> Self {
        self.is_own_record = is_own_record;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_membership_type(mut self, membership_type: impl Into<String>) -> Self {
        self.membership_type = Some(membership_type.into());
        self
    }
}

/// Typed `can_perform` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub resource: Resource,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionToken>,
}

impl AccessRequest {
    pub fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action, region: None }
    }

    pub fn in_region(mut self, region: impl Into<RegionToken>) -> Self {
        self.region = Some(region.into());
        self
    }
}
