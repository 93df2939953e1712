//! Organization membership and the active selection.
//!
//! The selection always points at an organization in the loaded list. The
//! remembered id lives in client-local storage and is written there before
//! memory changes, so a reload mid-session keeps the user's choice.

use serde::Serialize;
use uuid::Uuid;

use crate::core_state::{CoreState, ViewScope};
use crate::db;
use crate::error::ServiceError;
use crate::models::{sort_by_creation, Organization};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrgSelection {
    pub organizations: Vec<Organization>,
    pub active: Option<Uuid>,
}

impl OrgSelection {
    pub fn contains(&self, org_id: Uuid) -> bool {
        self.organizations.iter().any(|o| o.id == org_id)
    }
}

/// Keep the remembered organization when it is still listed, otherwise
/// take the first one (the list is already in creation order).
pub fn resolve_active(organizations: &[Organization], remembered: Option<Uuid>) -> Option<Uuid> {
    remembered
        .filter(|id| organizations.iter().any(|o| o.id == *id))
        .or_else(|| organizations.first().map(|o| o.id))
}

/// Fetch the organizations for the signed-in user and settle the active one.
pub fn load(state: &CoreState) -> Result<OrgSelection, ServiceError> {
    let scope = state.scope();
    let session = state.require_session()?;
    let gateway = state.gateway();

    let mut organizations = gateway.member_organizations(session.user.id)?;
    if organizations.is_empty() {
        organizations = match gateway.visible_organizations() {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::warn!(error = %e, "fallback organization listing failed");
                Vec::new()
            }
        };
    }
    sort_by_creation(&mut organizations);

    let conn = state.open_preferences()?;
    let remembered = db::get_active_org(&conn)?;
    let active = resolve_active(&organizations, remembered);
    let selection = OrgSelection { organizations, active };

    if !state.is_current(scope) {
        tracing::debug!("stale organization load discarded");
        return Ok(state.read_orgs()?.clone());
    }
    if active != remembered {
        db::set_active_org(&conn, active)?;
    }
    commit(state, scope, selection.clone())?;
    tracing::info!(
        count = selection.organizations.len(),
        active = ?selection.active,
        "organizations loaded"
    );
    Ok(selection)
}

/// Re-run the load, e.g. after accepting an invite.
pub fn refresh(state: &CoreState) -> Result<OrgSelection, ServiceError> {
    load(state)
}

/// Install `selection` unless `scope` went stale. A different active id
/// invalidates every load still running for the old one.
fn commit(state: &CoreState, scope: ViewScope, selection: OrgSelection) -> Result<bool, ServiceError> {
    let changed = {
        let mut slot = state.write_orgs()?;
        if !state.is_current(scope) {
            return Ok(false);
        }
        let changed = slot.active != selection.active;
        *slot = selection;
        changed
    };
    if changed {
        state.invalidate();
    }
    Ok(true)
}

/// Make `org_id` the active organization. Storage first, then memory.
pub fn switch_active(state: &CoreState, org_id: Uuid) -> Result<(), ServiceError> {
    if !state.read_orgs()?.contains(org_id) {
        tracing::warn!(org_id = %org_id, "switch to a non-member organization refused");
        return Err(ServiceError::Refused(
            "You are not a member of this organization".into(),
        ));
    }
    let conn = state.open_preferences()?;
    db::set_active_org(&conn, Some(org_id))?;

    let changed = {
        let mut slot = state.write_orgs()?;
        let changed = slot.active != Some(org_id);
        slot.active = Some(org_id);
        changed
    };
    if changed {
        state.invalidate();
        state.set_role_state(crate::access::RoleState::Unresolved)?;
        tracing::info!(org_id = %org_id, "active organization switched");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::testing::state_over;
    use crate::gateway::local::testing::{Fixture, PASSWORD};
    use crate::models::MemberRole;
    use chrono::{TimeZone, Utc};

    fn org(name: &str, day: u32) -> Organization {
        Organization {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Some(Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn remembered_org_is_kept_when_listed() {
        let orgs = vec![org("A", 1), org("B", 2)];
        assert_eq!(resolve_active(&orgs, Some(orgs[1].id)), Some(orgs[1].id));
    }

    #[test]
    fn unknown_remembered_org_falls_back_to_first() {
        let orgs = vec![org("A", 1), org("B", 2)];
        assert_eq!(resolve_active(&orgs, Some(Uuid::new_v4())), Some(orgs[0].id));
        assert_eq!(resolve_active(&[], Some(Uuid::new_v4())), None);
    }

    #[test]
    fn load_replaces_stale_stored_selection() {
        let fx = Fixture::new();
        let org_id = fx.org_id;
        let second = fx.gw.create_organization("Clinic Y").unwrap();
        fx.gw.add_member(second, fx.owner, MemberRole::Admin).unwrap();
        let t = state_over(fx.gw);

        let conn = t.state.open_preferences().unwrap();
        db::set_active_org(&conn, Some(Uuid::new_v4())).unwrap();

        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        let selection = load(&t.state).unwrap();
        assert_eq!(selection.organizations.len(), 2);
        assert_eq!(selection.active, Some(org_id));
        assert_eq!(db::get_active_org(&conn).unwrap(), Some(org_id));
        assert_eq!(t.state.active_org().unwrap(), Some(org_id));
    }

    #[test]
    fn empty_membership_clears_storage() {
        let fx = Fixture::new();
        fx.gw.register_user("nobody@clinic.com", PASSWORD).unwrap();
        let t = state_over(fx.gw);
        let conn = t.state.open_preferences().unwrap();
        db::set_active_org(&conn, Some(Uuid::new_v4())).unwrap();

        t.state.sign_in("nobody@clinic.com", PASSWORD).unwrap();
        let selection = load(&t.state).unwrap();
        assert!(selection.organizations.is_empty());
        assert_eq!(selection.active, None);
        assert_eq!(db::get_active_org(&conn).unwrap(), None);
    }

    #[test]
    fn vendor_staff_falls_back_to_visible_orgs() {
        let fx = Fixture::new();
        let org_id = fx.org_id;
        let t = state_over(fx.gw);
        t.state.sign_in("root@vendor.com", PASSWORD).unwrap();
        let selection = load(&t.state).unwrap();
        assert_eq!(selection.active, Some(org_id));
    }

    #[test]
    fn switch_writes_through_and_refuses_strangers() {
        let fx = Fixture::new();
        let org_id = fx.org_id;
        let second = fx.gw.create_organization("Clinic Y").unwrap();
        fx.gw.add_member(second, fx.owner, MemberRole::Viewer).unwrap();
        let t = state_over(fx.gw);
        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        load(&t.state).unwrap();
        assert_eq!(t.state.active_org().unwrap(), Some(org_id));

        let scope = t.state.scope();
        switch_active(&t.state, second).unwrap();
        assert!(!t.state.is_current(scope));
        let conn = t.state.open_preferences().unwrap();
        assert_eq!(db::get_active_org(&conn).unwrap(), Some(second));

        let err = switch_active(&t.state, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ServiceError::Refused(_)));
        assert_eq!(t.state.active_org().unwrap(), Some(second));

        // a reload keeps the switched choice
        assert_eq!(refresh(&t.state).unwrap().active, Some(second));
    }

    #[test]
    fn stale_commit_is_discarded() {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        let scope = t.state.scope();
        t.state.invalidate();
        let selection = OrgSelection {
            organizations: vec![org("A", 1)],
            active: None,
        };
        assert!(!commit(&t.state, scope, selection).unwrap());
        assert!(t.state.read_orgs().unwrap().organizations.is_empty());
    }

    #[test]
    fn load_requires_session() {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        assert!(matches!(load(&t.state), Err(ServiceError::NoSession)));
    }
}
