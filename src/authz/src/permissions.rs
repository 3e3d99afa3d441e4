//! Permission calculation
//!
//! Turns a subject's role claims into an [`EffectivePermissionSet`] by
//! unioning the role catalog with the installed rule snapshot.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::catalog::{Role, RoleCatalog, RoleClass};
use crate::region::{AccessibleRegions, Region, RegionToken};
use crate::rules::{RuleConfigSource, RuleSnapshot};
use crate::types::{Action, PermissionGrant, Resource, Scope};

/// Fully resolved grants for one role combination
///
/// Immutable once built; two sets built from the same roles and snapshot
/// compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectivePermissionSet {
    grants: BTreeMap<Resource, BTreeSet<(Action, Scope)>>,
    coverage: BTreeSet<RegionToken>,
    full_access: bool,
    self_scoped: bool,
}

impl EffectivePermissionSet {
    fn insert(&mut self, resource: Resource, action: Action, scope: Scope) {
        self.grants.entry(resource).or_default().insert((action, scope));
    }

    /// Whether the exact `(resource, action, scope)` grant is present
    pub fn contains(&self, resource: Resource, action: Action, scope: Scope) -> bool {
        self.grants
            .get(&resource)
            .map(|set| set.contains(&(action, scope)))
            .unwrap_or(false)
    }

    /// Scopes granted for `(resource, action)`
    pub fn scopes(&self, resource: Resource, action: Action) -> impl Iterator<Item = Scope> + '_ {
        self.grants
            .get(&resource)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter(move |(a, _)| *a == action)
            .map(|(_, scope)| *scope)
    }

    /// The scope that allows `action` on `resource`, if any
    ///
    /// `all` and `region:all` satisfy every request. A specific region needs
    /// an exact `region:<token>` grant; without a region any regional grant
    /// counts as "some regional access". `own`/`own_personal` apply only to
    /// the subject's own record.
    pub fn allows(
        &self,
        resource: Resource,
        action: Action,
        region: Option<RegionToken>,
        own_record: bool,
    ) -> Option<Scope> {
        let mut matched = None;
        for scope in self.scopes(resource, action) {
            let hit = match scope {
                Scope::All | Scope::Region(RegionToken::All) => return Some(scope),
                Scope::Region(granted) => match region {
                    Some(requested) => granted == requested,
                    None => true,
                },
                Scope::Own | Scope::OwnPersonal => own_record,
                Scope::Field(_) => false,
            };
            if hit && matched.is_none() {
                matched = Some(scope);
            }
        }
        matched
    }

    /// Whether the subject's regional roles cover `region`
    pub fn covers_region(&self, region: Region) -> bool {
        self.coverage.iter().any(|token| token.covers(region))
    }

    /// Region tokens supplied by the subject's regional roles
    pub fn coverage(&self) -> &BTreeSet<RegionToken> {
        &self.coverage
    }

    pub fn accessible_regions(&self) -> AccessibleRegions {
        if self.full_access || self.coverage.contains(&RegionToken::All) {
            return AccessibleRegions::All;
        }
        AccessibleRegions::Regions(
            self.coverage
                .iter()
                .filter_map(|token| match token {
                    RegionToken::Region(region) => Some(*region),
                    RegionToken::All => None,
                })
                .collect(),
        )
    }

    /// Full-access role combined with the all-regions sentinel
    pub fn is_full_access(&self) -> bool {
        self.full_access
    }

    /// Holds a self-scoped role
    pub fn is_self_scoped(&self) -> bool {
        self.self_scoped
    }

    pub fn is_empty(&self) -> bool {
        self.grants.values().all(BTreeSet::is_empty)
    }

    /// Every grant as a flat list
    pub fn grants(&self) -> impl Iterator<Item = PermissionGrant> + '_ {
        self.grants.iter().flat_map(|(resource, set)| {
            set.iter()
                .map(move |(action, scope)| PermissionGrant::new(*resource, *action, *scope))
        })
    }

    /// Whether this set grants at least everything `other` does
    pub fn is_superset_of(&self, other: &EffectivePermissionSet) -> bool {
        other
            .grants()
            .all(|g| self.contains(g.resource, g.action, g.scope))
            && other.coverage.is_subset(&self.coverage)
            && (!other.full_access || self.full_access)
            && (!other.self_scoped || self.self_scoped)
    }
}

/// Sorted, deduplicated role names with empty claims dropped
pub fn canonical_roles<S: AsRef<str>>(roles: &[S]) -> BTreeSet<&str> {
    roles
        .iter()
        .map(AsRef::as_ref)
        .filter(|role| !role.is_empty())
        .collect()
}

/// Computes effective permissions from role claims
pub struct PermissionCalculator {
    source: Arc<RuleConfigSource>,
}

impl PermissionCalculator {
    pub fn new(source: Arc<RuleConfigSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<RuleConfigSource> {
        &self.source
    }

    /// Calculate against the currently installed snapshot
    pub fn calculate<S: AsRef<str>>(&self, roles: &[S]) -> EffectivePermissionSet {
        Self::calculate_with(roles, &self.source.current_snapshot())
    }

    /// Calculate against a given snapshot
    ///
    /// Catalog grants at `all` are narrowed to `region:<token>` for every
    /// region the subject covers; without coverage they contribute nothing.
    /// The full-access combination additionally gets them unqualified, so a
    /// larger role set never loses a grant a smaller one had. Matching
    /// config entries add a coarse `all` grant, except for the fallback
    /// snapshot whose grants are qualified like the catalog's.
    pub fn calculate_with<S: AsRef<str>>(roles: &[S], snapshot: &RuleSnapshot) -> EffectivePermissionSet {
        let names = canonical_roles(roles);
        let known: BTreeSet<Role> = names.iter().filter_map(|name| Role::parse(name)).collect();

        let coverage: BTreeSet<RegionToken> = known.iter().filter_map(|role| role.region_token()).collect();
        let full_access = coverage.contains(&RegionToken::All)
            && known.iter().any(|role| role.class() == RoleClass::FullAccess);
        let self_scoped = known.iter().any(|role| role.class() == RoleClass::SelfScoped);

        let mut set = EffectivePermissionSet {
            grants: BTreeMap::new(),
            coverage,
            full_access,
            self_scoped,
        };

        for role in &known {
            for grant in RoleCatalog::grants_for_role(*role) {
                set.add_catalog_grant(grant);
            }
        }

        let names: Vec<&str> = names.into_iter().collect();
        for (resource, action) in snapshot.matching_pairs(names.as_slice()) {
            if snapshot.is_fallback() {
                set.add_catalog_grant(PermissionGrant::new(resource, action, Scope::All));
            } else {
                set.insert(resource, action, Scope::All);
            }
        }

        debug!(
            roles = names.len(),
            known = known.len(),
            full_access = set.full_access,
            generation = snapshot.generation(),
            "Calculated effective permissions"
        );

        set
    }
}

impl EffectivePermissionSet {
    fn add_catalog_grant(&mut self, grant: PermissionGrant) {
        let PermissionGrant { resource, action, scope } = grant;
        match scope {
            Scope::All => {
                let tokens: Vec<RegionToken> = self.coverage.iter().copied().collect();
                for token in tokens {
                    self.insert(resource, action, Scope::Region(token));
                }
                if self.full_access {
                    self.insert(resource, action, Scope::All);
                }
            }
            Scope::Field(_) if self.coverage.is_empty() => {}
            scope => self.insert(resource, action, scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleConfigEntry, SnapshotOrigin};
    use crate::types::FieldClass;

    fn empty() -> RuleSnapshot {
        RuleSnapshot::compile(Vec::new(), SnapshotOrigin::Fetched, 1)
    }

    fn calc(roles: &[&str]) -> EffectivePermissionSet {
        PermissionCalculator::calculate_with(roles, &empty())
    }

    #[test]
    fn test_permission_role_needs_region() {
        let set = calc(&["Members_CRUD"]);
        assert!(set.is_empty());
        assert_eq!(set.allows(Resource::Members, Action::Read, None, false), None);
    }

    #[test]
    fn test_region_role_alone_grants_nothing() {
        let set = calc(&["Regio_Utrecht"]);
        assert!(set.is_empty());
        assert!(set.covers_region(Region::Utrecht));
    }

    #[test]
    fn test_permission_qualified_by_region() {
        let set = calc(&["Members_CRUD", "Regio_Utrecht"]);
        let utrecht = Some(RegionToken::Region(Region::Utrecht));
        let limburg = Some(RegionToken::Region(Region::Limburg));

        assert_eq!(
            set.allows(Resource::Members, Action::Write, utrecht, false),
            Some(Scope::Region(RegionToken::Region(Region::Utrecht)))
        );
        assert_eq!(set.allows(Resource::Members, Action::Write, limburg, false), None);
        assert!(set.allows(Resource::Members, Action::Write, None, false).is_some());
        assert!(set.contains(Resource::Members, Action::Read, Scope::Field(FieldClass::Financial)));
        assert!(!set.contains(Resource::Members, Action::Read, Scope::All));
    }

    #[test]
    fn test_full_access_combination() {
        let set = calc(&["hdcnAdmins", "Regio_All"]);
        assert!(set.is_full_access());
        assert_eq!(set.accessible_regions(), AccessibleRegions::All);
        for resource in Resource::ALL {
            for action in Action::ALL {
                assert_eq!(set.allows(resource, action, None, false), Some(Scope::All));
            }
        }

        let partial = calc(&["hdcnAdmins", "Regio_Oost"]);
        assert!(!partial.is_full_access());
        assert_eq!(partial.accessible_regions(), AccessibleRegions::Regions(vec![Region::Oost]));
    }

    #[test]
    fn test_full_access_keeps_regional_grants() {
        let regional = calc(&["Members_CRUD", "Regio_Oost"]);
        let combined = calc(&["Members_CRUD", "Regio_Oost", "hdcnAdmins", "Regio_All"]);

        assert!(combined.is_full_access());
        assert!(combined.contains(
            Resource::Members,
            Action::Write,
            Scope::Region(RegionToken::Region(Region::Oost))
        ));
        assert!(combined.contains(Resource::Members, Action::Write, Scope::All));
        assert!(combined.is_superset_of(&regional));
    }

    #[test]
    fn test_self_scoped_grants_need_no_region() {
        let set = calc(&["hdcnLeden"]);
        assert!(set.is_self_scoped());
        assert_eq!(set.allows(Resource::Members, Action::Read, None, true), Some(Scope::Own));
        assert_eq!(set.allows(Resource::Members, Action::Read, None, false), None);
        assert_eq!(
            set.allows(Resource::Members, Action::Write, None, true),
            Some(Scope::OwnPersonal)
        );
    }

    #[test]
    fn test_self_scoped_and_regional_are_unioned() {
        let set = calc(&["hdcnLeden", "Members_Read", "Regio_Utrecht"]);
        assert!(set.is_self_scoped());
        assert!(set.contains(Resource::Members, Action::Read, Scope::Own));
        assert!(set.contains(
            Resource::Members,
            Action::Read,
            Scope::Region(RegionToken::Region(Region::Utrecht))
        ));
    }

    #[test]
    fn test_duplicates_and_empty_roles_ignored() {
        let a = calc(&["Members_Read", "Regio_Oost"]);
        let b = calc(&["Regio_Oost", "", "Members_Read", "Regio_Oost", "Members_Read"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_config_grants_are_coarse() {
        let snapshot = RuleSnapshot::compile(
            vec![RuleConfigEntry::new("events", "read", ["Regio_*"])],
            SnapshotOrigin::Fetched,
            1,
        );
        let set = PermissionCalculator::calculate_with(&["Regio_Oost"], &snapshot);
        assert_eq!(set.allows(Resource::Events, Action::Read, None, false), Some(Scope::All));

        let set = PermissionCalculator::calculate_with(&["Regionaal_Oost"], &snapshot);
        assert!(set.is_empty());
    }

    #[test]
    fn test_fallback_adds_nothing_beyond_catalog() {
        let fallback = RuleSnapshot::fallback();

        let admin = PermissionCalculator::calculate_with(&["hdcnAdmins"], &fallback);
        assert!(admin.is_empty());

        let regional_admin = PermissionCalculator::calculate_with(&["hdcnAdmins", "Regio_Oost"], &fallback);
        assert_eq!(regional_admin, calc(&["hdcnAdmins", "Regio_Oost"]));

        let member = PermissionCalculator::calculate_with(&["Members_CRUD", "Regio_Oost"], &fallback);
        assert_eq!(member, calc(&["Members_CRUD", "Regio_Oost"]));
    }

    #[test]
    fn test_superset() {
        let small = calc(&["Members_Read", "Regio_Oost"]);
        let big = calc(&["Members_Read", "Regio_Oost", "Regio_Limburg", "Events_CRUD"]);
        assert!(big.is_superset_of(&small));
        assert!(!small.is_superset_of(&big));
    }

    #[test]
    fn test_two_regions() {
        let set = calc(&["Regio_Noord-Holland", "Regio_Zuid-Holland"]);
        assert_eq!(
            set.accessible_regions(),
            AccessibleRegions::Regions(vec![Region::ZuidHolland, Region::NoordHolland])
        );
    }
}
