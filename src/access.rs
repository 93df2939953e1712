//! Role and capability derivation for the active organization.
//!
//! Two lookups feed the capabilities: the membership role in the active
//! organization and the global vendor-staff flag keyed by e-mail. Any
//! lookup failure resolves to no elevated access.

use serde::Serialize;
use uuid::Uuid;

use crate::core_state::{CoreError, CoreState};
use crate::gateway::DirectoryGateway;
use crate::models::MemberRole;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub can_manage_clients: bool,
    pub can_write_appointments: bool,
    /// Owners and admins of the organization. Vendor staff get no bypass.
    pub can_override_holidays: bool,
    pub read_only: bool,
}

impl Capabilities {
    pub fn derive(role: Option<MemberRole>, staff: bool) -> Self {
        Self {
            can_manage_clients: staff || role.is_some_and(|r| r.is_admin()),
            can_write_appointments: staff
                || matches!(
                    role,
                    Some(MemberRole::Owner | MemberRole::Admin | MemberRole::Staff)
                ),
            can_override_holidays: role.is_some_and(|r| r.is_admin()),
            read_only: role == Some(MemberRole::Viewer) && !staff,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoleState {
    #[default]
    Unresolved,
    Resolving {
        org_id: Uuid,
    },
    Resolved {
        org_id: Uuid,
        role: Option<MemberRole>,
        staff: bool,
        capabilities: Capabilities,
    },
}

impl RoleState {
    /// Least privilege until resolved.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Resolved { capabilities, .. } => *capabilities,
            _ => Capabilities::default(),
        }
    }

    pub fn is_resolved_for(&self, org: Uuid) -> bool {
        matches!(self, Self::Resolved { org_id, .. } if *org_id == org)
    }
}

/// Global staff lookup by e-mail; failures and unknown addresses are `false`.
pub fn resolve_staff<G: DirectoryGateway + ?Sized>(gateway: &G, email: Option<&str>) -> bool {
    let Some(email) = email.filter(|e| !e.trim().is_empty()) else {
        return false;
    };
    match gateway.system_user_by_email(email) {
        Ok(user) => user.is_some_and(|u| u.is_admin()),
        Err(e) => {
            tracing::warn!(error = %e, "staff lookup failed");
            false
        }
    }
}

/// Membership role lookup; failures resolve to no role.
pub fn resolve_role<G: DirectoryGateway + ?Sized>(
    gateway: &G,
    org_id: Uuid,
    user_id: Uuid,
) -> Option<MemberRole> {
    match gateway.member_role(org_id, user_id) {
        Ok(role) => role,
        Err(e) => {
            tracing::warn!(org_id = %org_id, error = %e, "role lookup failed");
            None
        }
    }
}

/// Staff flag for the signed-in user, resolved once per session.
pub fn staff(state: &CoreState) -> Result<bool, CoreError> {
    if let Some(flag) = state.staff_flag()? {
        return Ok(flag);
    }
    let scope = state.scope();
    let session = state.require_session()?;
    let flag = resolve_staff(state.gateway(), session.email());
    if state.is_current(scope) {
        state.set_staff_flag(flag)?;
    }
    Ok(flag)
}

/// Re-resolve the role for the active organization.
pub fn refresh(state: &CoreState) -> Result<RoleState, CoreError> {
    let scope = state.scope();
    let session = state.require_session()?;
    let Some(org_id) = state.active_org()? else {
        state.set_role_state(RoleState::Unresolved)?;
        return Ok(RoleState::Unresolved);
    };
    state.set_role_state(RoleState::Resolving { org_id })?;

    let staff = staff(state)?;
    let role = resolve_role(state.gateway(), org_id, session.user.id);
    let resolved = RoleState::Resolved {
        org_id,
        role,
        staff,
        capabilities: Capabilities::derive(role, staff),
    };

    if state.is_current(scope) && state.active_org()? == Some(org_id) {
        state.set_role_state(resolved.clone())?;
        tracing::debug!(org_id = %org_id, role = ?role, staff, "role resolved");
        Ok(resolved)
    } else {
        tracing::debug!(org_id = %org_id, "stale role resolution discarded");
        state.role_state()
    }
}

/// Capabilities for the active organization, resolving them if needed.
pub fn current(state: &CoreState) -> Result<Capabilities, CoreError> {
    let org_id = state.require_active_org()?;
    let role = state.role_state()?;
    if role.is_resolved_for(org_id) {
        return Ok(role.capabilities());
    }
    Ok(refresh(state)?.capabilities())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::testing::state_over;
    use crate::gateway::local::testing::{Fixture, PASSWORD};
    use crate::gateway::IdentityProvider;
    use crate::orgs;

    #[test]
    fn staff_member_writes_but_does_not_manage() {
        let caps = Capabilities::derive(Some(MemberRole::Staff), false);
        assert!(caps.can_write_appointments);
        assert!(!caps.can_manage_clients);
        assert!(!caps.read_only);
    }

    #[test]
    fn global_staff_overrides_read_only() {
        let caps = Capabilities::derive(Some(MemberRole::Viewer), true);
        assert!(!caps.read_only);
        assert!(caps.can_manage_clients);
        assert!(caps.can_write_appointments);
    }

    #[test]
    fn vendor_staff_cannot_override_holidays() {
        assert!(!Capabilities::derive(None, true).can_override_holidays);
        assert!(!Capabilities::derive(Some(MemberRole::Staff), true).can_override_holidays);
        assert!(Capabilities::derive(Some(MemberRole::Admin), true).can_override_holidays);
    }

    #[test]
    fn viewer_is_read_only() {
        let caps = Capabilities::derive(Some(MemberRole::Viewer), false);
        assert!(caps.read_only);
        assert!(!caps.can_write_appointments);
        assert!(!caps.can_override_holidays);
    }

    #[test]
    fn no_role_means_nothing() {
        assert_eq!(Capabilities::derive(None, false), Capabilities::default());
        assert!(Capabilities::derive(Some(MemberRole::Owner), false).can_override_holidays);
    }

    #[test]
    fn unresolved_state_grants_nothing() {
        assert_eq!(RoleState::Unresolved.capabilities(), Capabilities::default());
        let resolving = RoleState::Resolving { org_id: Uuid::new_v4() };
        assert!(!resolving.capabilities().can_write_appointments);
    }

    #[test]
    fn staff_lookup_defaults_to_false() {
        let fx = Fixture::new();
        fx.as_owner();
        assert!(!resolve_staff(&fx.gw, Some("owner@clinicx.com")));
        assert!(resolve_staff(&fx.gw, Some("root@vendor.com")));
        assert!(!resolve_staff(&fx.gw, None));
        fx.gw.sign_out().ok();
        // signed-out lookups fail and resolve to false
        assert!(!resolve_staff(&fx.gw, Some("root@vendor.com")));
    }

    #[test]
    fn refresh_resolves_for_active_org() {
        let fx = Fixture::new();
        let org_id = fx.org_id;
        let t = state_over(fx.gw);
        t.state.sign_in("staff@clinicx.com", PASSWORD).unwrap();
        orgs::load(&t.state).unwrap();

        let state = refresh(&t.state).unwrap();
        assert!(state.is_resolved_for(org_id));
        let caps = state.capabilities();
        assert!(caps.can_write_appointments);
        assert!(!caps.can_manage_clients);
        assert_eq!(t.state.staff_flag().unwrap(), Some(false));
        assert_eq!(current(&t.state).unwrap(), caps);
    }

    #[test]
    fn refresh_without_active_org_is_unresolved() {
        let fx = Fixture::new();
        fx.gw.register_user("nobody@clinic.com", PASSWORD).unwrap();
        let t = state_over(fx.gw);
        t.state.sign_in("nobody@clinic.com", PASSWORD).unwrap();
        orgs::load(&t.state).unwrap();
        assert_eq!(refresh(&t.state).unwrap(), RoleState::Unresolved);
        assert!(current(&t.state).is_err());
    }
}
