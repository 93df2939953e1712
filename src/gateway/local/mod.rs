//! Embedded SQLite system of record.
//!
//! Implements every gateway trait against a local database and enforces the
//! rules the managed backend owns: tenant scoping, role checks, the holiday
//! block on appointment writes, referential delete refusals and billing math.
//! One signed-in user per instance, like the browser session it replaces.

mod agenda;
mod billing;
mod directory;
mod identity;
mod registry;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::GatewayError;
use crate::db::{configure_pragmas, run_migrations, Migration};
use crate::models::{MemberRole, Session, SystemRole};

const GATEWAY_MIGRATIONS: &[Migration] = &[(
    1,
    include_str!("../../../resources/gateway_migrations/001_schema.sql"),
)];

/// Invite lifetime when none is given.
pub const DEFAULT_INVITE_TTL_DAYS: i64 = 7;

pub struct LocalGateway {
    conn: Mutex<Connection>,
    session: Mutex<Option<Session>>,
    /// Offset that decides which calendar day an instant falls on.
    utc_offset: FixedOffset,
}

/// What an operation on one organization requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Need {
    Read,
    /// Appointments and patients: owner, admin or staff.
    Write,
    /// Organization setup: owner or admin.
    Manage,
}

/// The signed-in user as seen by the authorization checks.
#[derive(Debug, Clone)]
pub(crate) struct Actor {
    pub user_id: Uuid,
    pub email: String,
    pub system_role: Option<SystemRole>,
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        matches!(self.system_role, Some(SystemRole::Admin | SystemRole::SuperAdmin))
    }

    pub fn is_super(&self) -> bool {
        self.system_role == Some(SystemRole::SuperAdmin)
    }
}

impl LocalGateway {
    pub fn open(path: &Path, utc_offset: FixedOffset) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| GatewayError::Transport(format!("{}: {e}", parent.display())))?;
            }
        }
        Self::from_connection(Connection::open(path)?, utc_offset)
    }

    pub fn open_in_memory(utc_offset: FixedOffset) -> Result<Self, GatewayError> {
        Self::from_connection(Connection::open_in_memory()?, utc_offset)
    }

    fn from_connection(conn: Connection, utc_offset: FixedOffset) -> Result<Self, GatewayError> {
        configure_pragmas(&conn)?;
        run_migrations(&conn, GATEWAY_MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            session: Mutex::new(None),
            utc_offset,
        })
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored_session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    pub(crate) fn actor(&self, conn: &Connection) -> Result<Actor, GatewayError> {
        let session = self.stored_session().ok_or(GatewayError::NotAuthenticated)?;
        let user_id = session.user.id;
        let system_role = conn
            .query_row(
                "SELECT role FROM system_users WHERE user_id = ?1 AND is_active = 1",
                [user_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|r| r.parse().ok());
        Ok(Actor {
            user_id,
            email: session.user.email.unwrap_or_default(),
            system_role,
        })
    }

    /// Check the signed-in user may act on `org_id`; returns the actor and
    /// their membership role.
    pub(crate) fn authorize(
        &self,
        conn: &Connection,
        org_id: Uuid,
        need: Need,
    ) -> Result<(Actor, Option<MemberRole>), GatewayError> {
        let actor = self.actor(conn)?;
        let role = member_role(conn, org_id, actor.user_id)?;
        if actor.is_staff() {
            return Ok((actor, role));
        }
        let Some(r) = role else {
            tracing::warn!(org_id = %org_id, user_id = %actor.user_id, "access outside membership refused");
            return Err(GatewayError::Forbidden(
                "You do not have access to this organization".into(),
            ));
        };
        let allowed = match need {
            Need::Read => true,
            Need::Write => r != MemberRole::Viewer,
            Need::Manage => r.is_admin(),
        };
        if allowed {
            Ok((actor, role))
        } else {
            Err(GatewayError::Forbidden(
                "Your role does not allow this action".into(),
            ))
        }
    }

    /// Vendor back-office access.
    pub(crate) fn require_staff(&self, conn: &Connection) -> Result<Actor, GatewayError> {
        let actor = self.actor(conn)?;
        if actor.is_staff() {
            Ok(actor)
        } else {
            Err(GatewayError::Forbidden("Vendor staff only".into()))
        }
    }

    // ── Provisioning (bootstrap and tests) ──────────────────

    /// Create an identity with a password. E-mails are unique, case-insensitive.
    pub fn register_user(&self, email: &str, password: &str) -> Result<Uuid, GatewayError> {
        let conn = self.conn();
        identity::insert_user(&conn, email, password)
    }

    pub fn create_organization(&self, name: &str) -> Result<Uuid, GatewayError> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name.trim(), ts(Utc::now())],
        )?;
        Ok(id)
    }

    pub fn add_member(&self, org_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<(), GatewayError> {
        insert_member(&self.conn(), org_id, user_id, role)
    }

    /// Grant a vendor role to an existing identity, bypassing the
    /// super-admin check (used to seed the first administrator).
    pub fn grant_system_role(&self, user_id: Uuid, role: SystemRole) -> Result<(), GatewayError> {
        let conn = self.conn();
        let email: String = conn
            .query_row(
                "SELECT email FROM users WHERE id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(GatewayError::NotFound { entity: "user" })?;
        conn.execute(
            "INSERT INTO system_users (user_id, email, role, is_active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(user_id) DO UPDATE SET role = ?3, is_active = 1",
            params![user_id.to_string(), email, role.as_str(), ts(Utc::now())],
        )?;
        Ok(())
    }

    pub fn create_org_type(&self, key: &str, name: &str) -> Result<Uuid, GatewayError> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO org_types (id, key, name) VALUES (?1, ?2, ?3)",
            params![id.to_string(), key, name],
        )?;
        Ok(id)
    }

    /// Issue an invite token for `email` to join `org_id`.
    pub fn create_invite(
        &self,
        org_id: Uuid,
        email: &str,
        role: MemberRole,
        ttl: Duration,
    ) -> Result<String, GatewayError> {
        directory::insert_invite(&self.conn(), org_id, email, role, ttl)
    }

    /// Number of users; zero means a fresh database.
    pub fn user_count(&self) -> Result<i64, GatewayError> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }
}

pub(crate) fn member_role(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<Option<MemberRole>, GatewayError> {
    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM org_members WHERE org_id = ?1 AND user_id = ?2",
            params![org_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(role.and_then(|r| r.parse().ok()))
}

pub(crate) fn insert_member(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    role: MemberRole,
) -> Result<(), GatewayError> {
    conn.execute(
        "INSERT INTO org_members (org_id, user_id, role) VALUES (?1, ?2, ?3)
         ON CONFLICT(org_id, user_id) DO UPDATE SET role = ?3",
        params![org_id.to_string(), user_id.to_string(), role.as_str()],
    )?;
    Ok(())
}

/// Canonical instant text: fixed width, so string order is time order.
pub(crate) fn ts(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn col_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn col_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn col_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn col_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

pub(crate) fn col_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

/// Collect a mapped query into a Vec, converting the error type.
pub(crate) fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, GatewayError> {
    rows.collect::<rusqlite::Result<Vec<T>>>()
        .map_err(GatewayError::from)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the local gateway tests and the service tests.

    use super::*;
    use crate::gateway::IdentityProvider;

    pub const PASSWORD: &str = "s3cret-pass";

    /// UTC-3, the offset used by the scenarios.
    pub fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    pub struct Fixture {
        pub gw: LocalGateway,
        pub org_id: Uuid,
        pub owner: Uuid,
        pub staff: Uuid,
        pub viewer: Uuid,
        pub vendor: Uuid,
    }

    impl Fixture {
        /// Organization "Clinic X" with an owner, a staff member, a viewer
        /// and a vendor super admin outside the organization.
        pub fn new() -> Self {
            let gw = LocalGateway::open_in_memory(brt()).unwrap();
            let org_id = gw.create_organization("Clinic X").unwrap();
            let owner = gw.register_user("owner@clinicx.com", PASSWORD).unwrap();
            let staff = gw.register_user("staff@clinicx.com", PASSWORD).unwrap();
            let viewer = gw.register_user("viewer@clinicx.com", PASSWORD).unwrap();
            let vendor = gw.register_user("root@vendor.com", PASSWORD).unwrap();
            gw.add_member(org_id, owner, MemberRole::Owner).unwrap();
            gw.add_member(org_id, staff, MemberRole::Staff).unwrap();
            gw.add_member(org_id, viewer, MemberRole::Viewer).unwrap();
            gw.grant_system_role(vendor, SystemRole::SuperAdmin).unwrap();
            Self { gw, org_id, owner, staff, viewer, vendor }
        }

        pub fn login(&self, email: &str) {
            self.gw.sign_in(email, PASSWORD).unwrap();
        }

        pub fn as_owner(&self) -> &Self {
            self.login("owner@clinicx.com");
            self
        }

        pub fn as_staff(&self) -> &Self {
            self.login("staff@clinicx.com");
            self
        }

        pub fn as_viewer(&self) -> &Self {
            self.login("viewer@clinicx.com");
            self
        }

        pub fn as_vendor(&self) -> &Self {
            self.login("root@vendor.com");
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::get_current_version;

    #[test]
    fn schema_migrates_once() {
        let gw = LocalGateway::open_in_memory(brt()).unwrap();
        let conn = gw.conn();
        assert_eq!(get_current_version(&conn), 1);
        assert!(run_migrations(&conn, GATEWAY_MIGRATIONS).is_ok());
    }

    #[test]
    fn on_disk_database_keeps_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.db");
        {
            let gw = LocalGateway::open(&path, brt()).unwrap();
            gw.register_user("a@b.com", PASSWORD).unwrap();
        }
        let gw = LocalGateway::open(&path, brt()).unwrap();
        assert_eq!(gw.user_count().unwrap(), 1);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc::now();
        let b = a + Duration::milliseconds(1500);
        assert!(ts(a) < ts(b));
        assert!(ts(a).ends_with('Z'));
    }

    #[test]
    fn authorization_by_role() {
        let f = Fixture::new();
        let check = |need| {
            let conn = f.gw.conn();
            f.gw.authorize(&conn, f.org_id, need).map(|_| ())
        };

        f.as_viewer();
        assert!(check(Need::Read).is_ok());
        assert!(matches!(check(Need::Write), Err(GatewayError::Forbidden(_))));

        f.as_staff();
        assert!(check(Need::Write).is_ok());
        assert!(matches!(check(Need::Manage), Err(GatewayError::Forbidden(_))));

        f.as_owner();
        assert!(check(Need::Manage).is_ok());

        // Vendor staff reach every tenant without a membership.
        f.as_vendor();
        assert!(check(Need::Manage).is_ok());
    }

    #[test]
    fn non_member_is_refused() {
        let f = Fixture::new();
        f.gw.register_user("other@clinic.com", PASSWORD).unwrap();
        f.login("other@clinic.com");
        let conn = f.gw.conn();
        assert!(matches!(
            f.gw.authorize(&conn, f.org_id, Need::Read),
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[test]
    fn anonymous_calls_are_unauthenticated() {
        let f = Fixture::new();
        let conn = f.gw.conn();
        assert!(matches!(f.gw.actor(&conn), Err(GatewayError::NotAuthenticated)));
    }
}
