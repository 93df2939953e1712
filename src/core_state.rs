//! Explicit application state.
//!
//! `CoreState` is the single owner of everything that outlives one request:
//! the gateway, the session, the organization selection, the resolved role
//! and the last committed agenda month. Each piece has one writer path.
//! Loads capture a `ViewScope` before their first gateway call and commit
//! only while it is still current; switching organization or signing out
//! bumps the epoch so late results are dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::FixedOffset;
use uuid::Uuid;

use crate::access::RoleState;
use crate::agenda::AgendaMonth;
use crate::db::{self, DatabaseError};
use crate::gateway::{Gateway, GatewayError};
use crate::models::Session;
use crate::orgs::OrgSelection;
use crate::session::SessionStore;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("No active session")]
    NoActiveSession,
    #[error("No active organization selected")]
    NoActiveOrganization,
    #[error("Internal lock poisoned")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Token captured at the start of a load. Its result may be committed only
/// while `CoreState::is_current` still holds for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewScope {
    epoch: u64,
}

pub struct CoreState {
    gateway: Arc<dyn Gateway>,
    session: SessionStore,
    orgs: RwLock<OrgSelection>,
    role: RwLock<RoleState>,
    /// Global vendor-staff flag; `None` until resolved for this session.
    staff: RwLock<Option<bool>>,
    agenda: RwLock<Option<AgendaMonth>>,
    epoch: AtomicU64,
    preferences_path: PathBuf,
    utc_offset: FixedOffset,
}

impl CoreState {
    pub fn new(gateway: Arc<dyn Gateway>, preferences_path: PathBuf, utc_offset: FixedOffset) -> Self {
        Self {
            gateway,
            session: SessionStore::new(),
            orgs: RwLock::new(OrgSelection::default()),
            role: RwLock::new(RoleState::Unresolved),
            staff: RwLock::new(None),
            agenda: RwLock::new(None),
            epoch: AtomicU64::new(0),
            preferences_path,
            utc_offset,
        }
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Open the client-local preference store.
    pub fn open_preferences(&self) -> Result<rusqlite::Connection, CoreError> {
        Ok(db::open_database(&self.preferences_path)?)
    }

    // ── Cancellation scopes ─────────────────────────────────

    pub fn scope(&self) -> ViewScope {
        ViewScope {
            epoch: self.epoch.load(Ordering::SeqCst),
        }
    }

    pub fn is_current(&self, scope: ViewScope) -> bool {
        self.epoch.load(Ordering::SeqCst) == scope.epoch
    }

    /// Make every outstanding scope stale.
    pub fn invalidate(&self) {
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(epoch = next, "view scopes invalidated");
    }

    // ── Session ─────────────────────────────────────────────

    pub fn require_session(&self) -> Result<Session, CoreError> {
        self.session.current().ok_or(CoreError::NoActiveSession)
    }

    /// Restore a provider session at startup.
    pub fn restore_session(&self) -> Option<Session> {
        self.session.init(self.gateway())
    }

    /// Sign in and reset everything derived from the previous user.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<Session, String> {
        let session = self.session.sign_in(self.gateway(), email, password)?;
        self.reset_derived();
        Ok(session)
    }

    /// Always ends with no session, whatever the provider says.
    pub fn sign_out(&self) {
        self.session.sign_out(self.gateway());
        self.reset_derived();
    }

    /// The provider no longer honours the session: drop it locally and
    /// forget everything derived from it.
    pub fn expire_session(&self) {
        if self.session.expire(&GatewayError::NotAuthenticated) {
            self.reset_derived();
        }
    }

    fn reset_derived(&self) {
        self.invalidate();
        if let Ok(mut orgs) = self.orgs.write() {
            *orgs = OrgSelection::default();
        }
        if let Ok(mut role) = self.role.write() {
            *role = RoleState::Unresolved;
        }
        if let Ok(mut staff) = self.staff.write() {
            *staff = None;
        }
        if let Ok(mut agenda) = self.agenda.write() {
            *agenda = None;
        }
    }

    // ── Organization selection ──────────────────────────────

    pub fn read_orgs(&self) -> Result<RwLockReadGuard<'_, OrgSelection>, CoreError> {
        self.orgs.read().map_err(|_| CoreError::LockPoisoned)
    }

    pub(crate) fn write_orgs(&self) -> Result<RwLockWriteGuard<'_, OrgSelection>, CoreError> {
        self.orgs.write().map_err(|_| CoreError::LockPoisoned)
    }

    pub fn active_org(&self) -> Result<Option<Uuid>, CoreError> {
        Ok(self.read_orgs()?.active)
    }

    pub fn require_active_org(&self) -> Result<Uuid, CoreError> {
        self.active_org()?.ok_or(CoreError::NoActiveOrganization)
    }

    // ── Role and staff flag ─────────────────────────────────

    pub fn role_state(&self) -> Result<RoleState, CoreError> {
        Ok(self.role.read().map_err(|_| CoreError::LockPoisoned)?.clone())
    }

    pub(crate) fn set_role_state(&self, state: RoleState) -> Result<(), CoreError> {
        *self.role.write().map_err(|_| CoreError::LockPoisoned)? = state;
        Ok(())
    }

    pub fn staff_flag(&self) -> Result<Option<bool>, CoreError> {
        Ok(*self.staff.read().map_err(|_| CoreError::LockPoisoned)?)
    }

    pub(crate) fn set_staff_flag(&self, staff: bool) -> Result<(), CoreError> {
        *self.staff.write().map_err(|_| CoreError::LockPoisoned)? = Some(staff);
        Ok(())
    }

    // ── Agenda month ────────────────────────────────────────

    pub fn agenda_month(&self) -> Result<Option<AgendaMonth>, CoreError> {
        Ok(self.agenda.read().map_err(|_| CoreError::LockPoisoned)?.clone())
    }

    /// Keep `month` as the loaded agenda unless `scope` went stale.
    /// Returns whether it was committed.
    pub(crate) fn commit_agenda(&self, scope: ViewScope, month: AgendaMonth) -> Result<bool, CoreError> {
        let mut slot = self.agenda.write().map_err(|_| CoreError::LockPoisoned)?;
        if !self.is_current(scope) {
            tracing::debug!(month = %month.window.first, "stale agenda load discarded");
            return Ok(false);
        }
        *slot = Some(month);
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::gateway::LocalGateway;

    /// State over an in-memory local gateway and a throwaway preference file.
    pub struct TestState {
        pub state: Arc<CoreState>,
        pub gw: Arc<LocalGateway>,
        _dir: tempfile::TempDir,
    }

    pub fn state_over(gw: LocalGateway) -> TestState {
        let dir = tempfile::tempdir().unwrap();
        let offset = gw.utc_offset();
        let gw = Arc::new(gw);
        let state = Arc::new(CoreState::new(
            gw.clone(),
            dir.path().join("preferences.db"),
            offset,
        ));
        TestState { state, gw, _dir: dir }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::state_over;
    use super::*;
    use crate::gateway::local::testing::{brt, Fixture, PASSWORD};
    use crate::gateway::LocalGateway;

    #[test]
    fn invalidate_makes_old_scopes_stale() {
        let t = state_over(LocalGateway::open_in_memory(brt()).unwrap());
        let scope = t.state.scope();
        assert!(t.state.is_current(scope));
        t.state.invalidate();
        assert!(!t.state.is_current(scope));
        assert!(t.state.is_current(t.state.scope()));
    }

    #[test]
    fn require_session_and_org_fail_when_empty() {
        let t = state_over(LocalGateway::open_in_memory(brt()).unwrap());
        assert!(matches!(t.state.require_session(), Err(CoreError::NoActiveSession)));
        assert!(matches!(t.state.require_active_org(), Err(CoreError::NoActiveOrganization)));
    }

    #[test]
    fn sign_in_then_out_resets_derived_state() {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        t.state.set_staff_flag(true).unwrap();
        t.state.write_orgs().unwrap().active = Some(fx.org_id);
        let scope = t.state.scope();

        t.state.sign_out();
        assert!(t.state.session().current().is_none());
        assert_eq!(t.state.staff_flag().unwrap(), None);
        assert_eq!(t.state.active_org().unwrap(), None);
        assert!(!t.state.is_current(scope));
    }

    #[test]
    fn expiry_clears_session_and_derived_state() {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        t.state.write_orgs().unwrap().active = Some(fx.org_id);
        let scope = t.state.scope();

        t.state.expire_session();
        assert!(t.state.session().current().is_none());
        assert_eq!(t.state.active_org().unwrap(), None);
        assert!(!t.state.is_current(scope));

        // nothing left to expire
        let scope = t.state.scope();
        t.state.expire_session();
        assert!(t.state.is_current(scope));
    }

    #[test]
    fn failed_sign_in_keeps_state() {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        let scope = t.state.scope();
        assert!(t.state.sign_in("owner@clinicx.com", "nope").is_err());
        assert!(t.state.is_current(scope));
    }

    #[test]
    fn preferences_open_on_disk() {
        let t = state_over(LocalGateway::open_in_memory(brt()).unwrap());
        let conn = t.state.open_preferences().unwrap();
        db::set_active_org(&conn, Some(Uuid::new_v4())).unwrap();
        drop(conn);
        let conn = t.state.open_preferences().unwrap();
        assert!(db::get_active_org(&conn).unwrap().is_some());
    }
}
