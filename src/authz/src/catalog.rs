//! Role catalog
//!
//! Static table of every role the identity provider issues and the grants
//! each contributes. Roles fall into four classes:
//!
//! - **full access** (`hdcnAdmins`): everything, unrestricted once combined
//!   with the `Regio_All` sentinel role
//! - **self-scoped** (`hdcnLeden`): the subject's own record only
//! - **regional** (`Regio_*`): no grants of their own, they supply the
//!   region coverage that permission grants are qualified with
//! - **permission** (`Members_CRUD`, `Events_Read`, ...): resource grants
//!   that need region coverage before they take effect
//!
//! Unknown role names are not an error; they contribute nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::region::{Region, RegionMapper, RegionToken};
use crate::types::{Action, FieldClass, PermissionGrant, Resource, Scope};
use crate::types::Action::{Read, Write};
use crate::types::Resource::{Communication, Events, Members, Orders, Products, System};

/// Membership types whose records expose the `motor` field class
pub const MOTOR_MEMBERSHIP_TYPES: [&str; 3] = ["Gewoon lid", "Gezins lid", "Erelid"];

/// Whether a record with this membership type exposes `motor` fields at all
pub fn motor_fields_exposed(membership_type: Option<&str>) -> bool {
    membership_type
        .map(|t| MOTOR_MEMBERSHIP_TYPES.contains(&t.trim()))
        .unwrap_or(false)
}

/// Every role known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    HdcnAdmins,
    HdcnLeden,
    MembersCrud,
    MembersRead,
    MembersStatusApprove,
    EventsCrud,
    EventsRead,
    ProductsCrud,
    ProductsRead,
    WebshopManagement,
    CommunicationCrud,
    CommunicationRead,
    SystemUserManagement,
    SystemLogsRead,
    AllRegions,
    Region(Region),
}

/// Classification of a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    FullAccess,
    SelfScoped,
    Regional,
    Permission,
}

impl Role {
    /// Every non-regional role
    pub const FUNCTIONAL: [Role; 14] = [
        Role::HdcnAdmins,
        Role::HdcnLeden,
        Role::MembersCrud,
        Role::MembersRead,
        Role::MembersStatusApprove,
        Role::EventsCrud,
        Role::EventsRead,
        Role::ProductsCrud,
        Role::ProductsRead,
        Role::WebshopManagement,
        Role::CommunicationCrud,
        Role::CommunicationRead,
        Role::SystemUserManagement,
        Role::SystemLogsRead,
    ];

    /// Role name as issued by the identity provider
    pub fn name(self) -> &'static str {
        match self {
            Role::HdcnAdmins => "hdcnAdmins",
            Role::HdcnLeden => "hdcnLeden",
            Role::MembersCrud => "Members_CRUD",
            Role::MembersRead => "Members_Read",
            Role::MembersStatusApprove => "Members_Status_Approve",
            Role::EventsCrud => "Events_CRUD",
            Role::EventsRead => "Events_Read",
            Role::ProductsCrud => "Products_CRUD",
            Role::ProductsRead => "Products_Read",
            Role::WebshopManagement => "Webshop_Management",
            Role::CommunicationCrud => "Communication_CRUD",
            Role::CommunicationRead => "Communication_Read",
            Role::SystemUserManagement => "System_User_Management",
            Role::SystemLogsRead => "System_Logs_Read",
            Role::AllRegions => RegionMapper::to_role_name(RegionToken::All),
            Role::Region(region) => region.role_name(),
        }
    }

    /// Look up a role by name
    pub fn parse(name: &str) -> Option<Role> {
        if let Some(token) = RegionMapper::to_region_token(name) {
            return Some(match token {
                RegionToken::All => Role::AllRegions,
                RegionToken::Region(region) => Role::Region(region),
            });
        }
        Role::FUNCTIONAL.iter().copied().find(|role| role.name() == name)
    }

    pub fn class(self) -> RoleClass {
        match self {
            Role::HdcnAdmins => RoleClass::FullAccess,
            Role::HdcnLeden => RoleClass::SelfScoped,
            Role::AllRegions | Role::Region(_) => RoleClass::Regional,
            _ => RoleClass::Permission,
        }
    }

    /// Region coverage supplied by a regional role
    pub fn region_token(self) -> Option<RegionToken> {
        match self {
            Role::AllRegions => Some(RegionToken::All),
            Role::Region(region) => Some(RegionToken::Region(region)),
            _ => None,
        }
    }

    /// Roles kept alive by the fallback rule snapshot during an outage
    pub fn is_administrative(self) -> bool {
        matches!(self, Role::HdcnAdmins)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn grant(resource: Resource, action: Action, scope: Scope) -> PermissionGrant {
    PermissionGrant::new(resource, action, scope)
}

const LEDEN: &[PermissionGrant] = &[
    grant(Members, Read, Scope::Own),
    grant(Members, Write, Scope::OwnPersonal),
    grant(Orders, Read, Scope::Own),
    grant(Orders, Write, Scope::Own),
];

const MEMBERS_CRUD: &[PermissionGrant] = &[
    grant(Members, Read, Scope::All),
    grant(Members, Write, Scope::All),
    grant(Members, Read, Scope::Field(FieldClass::Financial)),
    grant(Members, Read, Scope::Field(FieldClass::Administrative)),
    grant(Members, Write, Scope::Field(FieldClass::Status)),
];

const MEMBERS_READ: &[PermissionGrant] = &[grant(Members, Read, Scope::All)];

const MEMBERS_STATUS_APPROVE: &[PermissionGrant] = &[
    grant(Members, Read, Scope::All),
    grant(Members, Write, Scope::Field(FieldClass::Status)),
];

const EVENTS_CRUD: &[PermissionGrant] = &[grant(Events, Read, Scope::All), grant(Events, Write, Scope::All)];

const EVENTS_READ: &[PermissionGrant] = &[grant(Events, Read, Scope::All)];

const PRODUCTS_CRUD: &[PermissionGrant] =
    &[grant(Products, Read, Scope::All), grant(Products, Write, Scope::All)];

const PRODUCTS_READ: &[PermissionGrant] = &[grant(Products, Read, Scope::All)];

const WEBSHOP_MANAGEMENT: &[PermissionGrant] = &[
    grant(Orders, Read, Scope::All),
    grant(Orders, Write, Scope::All),
    grant(Products, Read, Scope::All),
];

const COMMUNICATION_CRUD: &[PermissionGrant] = &[
    grant(Communication, Read, Scope::All),
    grant(Communication, Write, Scope::All),
];

const COMMUNICATION_READ: &[PermissionGrant] = &[grant(Communication, Read, Scope::All)];

const SYSTEM_USER_MANAGEMENT: &[PermissionGrant] = &[
    grant(System, Read, Scope::All),
    grant(System, Write, Scope::All),
    grant(Members, Read, Scope::Field(FieldClass::Administrative)),
];

const SYSTEM_LOGS_READ: &[PermissionGrant] = &[grant(System, Read, Scope::All)];

/// Static role -> grant table
pub struct RoleCatalog;

impl RoleCatalog {
    /// Grants contributed by a role name; empty for unknown and regional roles
    pub fn grants_for(role: &str) -> Vec<PermissionGrant> {
        Role::parse(role).map(Self::grants_for_role).unwrap_or_default()
    }

    /// Grants contributed by a known role
    pub fn grants_for_role(role: Role) -> Vec<PermissionGrant> {
        let table: &[PermissionGrant] = match role {
            Role::HdcnAdmins => return Self::full_access_grants(),
            Role::HdcnLeden => LEDEN,
            Role::MembersCrud => MEMBERS_CRUD,
            Role::MembersRead => MEMBERS_READ,
            Role::MembersStatusApprove => MEMBERS_STATUS_APPROVE,
            Role::EventsCrud => EVENTS_CRUD,
            Role::EventsRead => EVENTS_READ,
            Role::ProductsCrud => PRODUCTS_CRUD,
            Role::ProductsRead => PRODUCTS_READ,
            Role::WebshopManagement => WEBSHOP_MANAGEMENT,
            Role::CommunicationCrud => COMMUNICATION_CRUD,
            Role::CommunicationRead => COMMUNICATION_READ,
            Role::SystemUserManagement => SYSTEM_USER_MANAGEMENT,
            Role::SystemLogsRead => SYSTEM_LOGS_READ,
            Role::AllRegions | Role::Region(_) => &[],
        };
        table.to_vec()
    }

    /// Every resource and action at `all`, plus every field class on members
    pub fn full_access_grants() -> Vec<PermissionGrant> {
        let mut grants = Vec::with_capacity(Resource::ALL.len() * 2 + FieldClass::ALL.len() * 2);
        for resource in Resource::ALL {
            for action in Action::ALL {
                grants.push(grant(resource, action, Scope::All));
            }
        }
        for class in FieldClass::ALL {
            for action in Action::ALL {
                grants.push(grant(Members, action, Scope::Field(class)));
            }
        }
        grants
    }

    pub fn class_of(role: &str) -> Option<RoleClass> {
        Role::parse(role).map(Role::class)
    }

    pub fn is_full_access(role: &str) -> bool {
        Self::class_of(role) == Some(RoleClass::FullAccess)
    }

    pub fn is_self_scoped(role: &str) -> bool {
        Self::class_of(role) == Some(RoleClass::SelfScoped)
    }

    pub fn is_regional(role: &str) -> bool {
        Self::class_of(role) == Some(RoleClass::Regional)
    }

    /// Names of the roles the fallback snapshot keeps working
    pub fn administrative_role_names() -> Vec<&'static str> {
        Role::FUNCTIONAL
            .iter()
            .filter(|role| role.is_administrative())
            .map(|role| role.name())
            .collect()
    }
}
