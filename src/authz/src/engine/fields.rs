//! Field-class visibility and editability
//!
//! Pure functions of an effective permission set and the record facts
//! supplied by the resource-owning collaborator.

use crate::catalog::motor_fields_exposed;
use crate::permissions::EffectivePermissionSet;
use crate::region::{RegionMapper, RegionToken};
use crate::types::{Action, FieldClass, RecordContext, Resource, Scope};

/// Whether `action` on the record is covered by the subject's grants
///
/// Records without a region need region-independent access. A region that
/// does not parse is never covered by regional grants.
pub(crate) fn record_reachable(
    perms: &EffectivePermissionSet,
    resource: Resource,
    action: Action,
    record_region: Option<&str>,
) -> bool {
    match record_region.map(str::trim).filter(|r| !r.is_empty()) {
        None => perms.allows(resource, action, Some(RegionToken::All), false).is_some(),
        Some(raw) => match RegionMapper::parse_record_region(raw) {
            Some(region) => perms.allows(resource, action, Some(region.into()), false).is_some(),
            None => perms.contains(resource, action, Scope::All),
        },
    }
}

fn motor_gate_passes(class: FieldClass, record: &RecordContext) -> bool {
    class != FieldClass::Motor || motor_fields_exposed(record.membership_type.as_deref())
}

/// Decision order: full access, motor gate, own record, region coverage,
/// then explicit grants for the elevated and status classes
pub(crate) fn is_visible(
    perms: &EffectivePermissionSet,
    own_record: bool,
    resource: Resource,
    class: FieldClass,
    record: &RecordContext,
) -> bool {
    if perms.is_full_access() {
        return true;
    }
    if !motor_gate_passes(class, record) {
        return false;
    }

    let reachable = record_reachable(perms, resource, Action::Read, record.region.as_deref());

    if class.is_member_class() {
        let own = own_record && perms.is_self_scoped() && perms.contains(resource, Action::Read, Scope::Own);
        return own || reachable;
    }

    let granted = Action::ALL
        .iter()
        .any(|action| perms.contains(resource, *action, Scope::Field(class)));
    granted && reachable
}

pub(crate) fn is_editable(
    perms: &EffectivePermissionSet,
    own_record: bool,
    resource: Resource,
    class: FieldClass,
    record: &RecordContext,
) -> bool {
    if perms.is_full_access() {
        return true;
    }
    if !motor_gate_passes(class, record) {
        return false;
    }

    let region = record.region.as_deref();
    if perms.contains(resource, Action::Write, Scope::Field(class))
        && record_reachable(perms, resource, Action::Read, region)
    {
        return true;
    }
    if !class.is_member_class() {
        return false;
    }

    if own_record {
        if perms.contains(resource, Action::Write, Scope::Own) {
            return true;
        }
        if perms.contains(resource, Action::Write, Scope::OwnPersonal)
            && matches!(class, FieldClass::Personal | FieldClass::Address)
        {
            return true;
        }
    }

    record_reachable(perms, resource, Action::Write, region)
}
