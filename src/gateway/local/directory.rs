use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::identity::random_token;
use super::{col_enum, col_opt_ts, col_ts, col_uuid, collect, insert_member, ts, LocalGateway};
use crate::gateway::{DirectoryGateway, GatewayError};
use crate::models::{InviteVerification, MemberRole, NewSystemUser, Organization, SystemUser};

const SYSTEM_USER_COLUMNS: &str = "user_id, email, role, is_active, created_at";

fn system_user_from_row(row: &Row<'_>) -> rusqlite::Result<SystemUser> {
    Ok(SystemUser {
        user_id: col_uuid(row, 0)?,
        email: row.get(1)?,
        role: col_enum(row, 2)?,
        is_active: row.get(3)?,
        created_at: Some(col_ts(row, 4)?),
    })
}

fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: col_uuid(row, 0)?,
        name: row.get(1)?,
        created_at: col_opt_ts(row, 2)?,
    })
}

pub(crate) fn insert_invite(
    conn: &Connection,
    org_id: Uuid,
    email: &str,
    role: MemberRole,
    ttl: Duration,
) -> Result<String, GatewayError> {
    let token = random_token();
    conn.execute(
        "INSERT INTO invites (token, org_id, email, role, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![token, org_id.to_string(), email.trim(), role.as_str(), ts(Utc::now() + ttl)],
    )?;
    tracing::info!(org_id = %org_id, role = %role, "invite issued");
    Ok(token)
}

struct InviteRow {
    org_id: Uuid,
    org_name: String,
    email: String,
    role: String,
    expires_at: chrono::DateTime<Utc>,
    accepted: bool,
}

fn find_invite(conn: &Connection, token: &str) -> Result<Option<InviteRow>, GatewayError> {
    Ok(conn
        .query_row(
            "SELECT i.org_id, o.name, i.email, i.role, i.expires_at, i.accepted_at
             FROM invites i JOIN organizations o ON o.id = i.org_id
             WHERE i.token = ?1",
            [token],
            |row| {
                Ok(InviteRow {
                    org_id: col_uuid(row, 0)?,
                    org_name: row.get(1)?,
                    email: row.get(2)?,
                    role: row.get(3)?,
                    expires_at: col_ts(row, 4)?,
                    accepted: col_opt_ts(row, 5)?.is_some(),
                })
            },
        )
        .optional()?)
}

impl DirectoryGateway for LocalGateway {
    fn member_organizations(&self, user_id: Uuid) -> Result<Vec<Organization>, GatewayError> {
        let conn = self.conn();
        let actor = self.actor(&conn)?;
        if actor.user_id != user_id && !actor.is_staff() {
            return Err(GatewayError::Forbidden(
                "Memberships of other users are not visible".into(),
            ));
        }
        let mut stmt = conn.prepare(
            "SELECT o.id, o.name, o.created_at
             FROM org_members m JOIN organizations o ON o.id = m.org_id
             WHERE m.user_id = ?1",
        )?;
        let rows = stmt.query_map([user_id.to_string()], organization_from_row)?;
        collect(rows)
    }

    /// Vendor staff see every tenant; everyone else sees their memberships.
    fn visible_organizations(&self) -> Result<Vec<Organization>, GatewayError> {
        let conn = self.conn();
        let actor = self.actor(&conn)?;
        if actor.is_staff() {
            let mut stmt =
                conn.prepare("SELECT id, name, created_at FROM organizations ORDER BY created_at")?;
            let rows = stmt.query_map([], organization_from_row)?;
            return collect(rows);
        }
        let mut stmt = conn.prepare(
            "SELECT o.id, o.name, o.created_at
             FROM org_members m JOIN organizations o ON o.id = m.org_id
             WHERE m.user_id = ?1 ORDER BY o.created_at",
        )?;
        let rows = stmt.query_map([actor.user_id.to_string()], organization_from_row)?;
        collect(rows)
    }

    fn member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>, GatewayError> {
        let conn = self.conn();
        self.actor(&conn)?;
        super::member_role(&conn, org_id, user_id)
    }

    fn system_user_by_email(&self, email: &str) -> Result<Option<SystemUser>, GatewayError> {
        let conn = self.conn();
        self.actor(&conn)?;
        Ok(conn
            .query_row(
                &format!("SELECT {SYSTEM_USER_COLUMNS} FROM system_users WHERE email = ?1"),
                [email.trim()],
                system_user_from_row,
            )
            .optional()?)
    }

    fn list_system_users(&self) -> Result<Vec<SystemUser>, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYSTEM_USER_COLUMNS} FROM system_users ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], system_user_from_row)?;
        collect(rows)
    }

    fn add_system_user(&self, user: &NewSystemUser) -> Result<(), GatewayError> {
        let conn = self.conn();
        let actor = self.require_staff(&conn)?;
        if !actor.is_super() {
            return Err(GatewayError::Forbidden(
                "Only a super admin can manage system users".into(),
            ));
        }
        let email = user.email.trim();
        let user_id = conn
            .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| col_uuid(row, 0))
            .optional()?
            .ok_or_else(|| GatewayError::Rejected(format!("No account registered for {email}")))?;
        conn.execute(
            "INSERT INTO system_users (user_id, email, role, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET role = ?3, is_active = ?4",
            params![user_id.to_string(), email, user.role.as_str(), user.active, ts(Utc::now())],
        )?;
        tracing::info!(user_id = %user_id, role = %user.role, "system user saved");
        Ok(())
    }

    fn remove_system_user(&self, user_id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        let actor = self.require_staff(&conn)?;
        if !actor.is_super() {
            return Err(GatewayError::Forbidden(
                "Only a super admin can manage system users".into(),
            ));
        }
        if actor.user_id == user_id {
            return Err(GatewayError::Rejected("You cannot remove your own access".into()));
        }
        let removed = conn.execute(
            "DELETE FROM system_users WHERE user_id = ?1",
            [user_id.to_string()],
        )?;
        if removed == 0 {
            return Err(GatewayError::NotFound { entity: "system user" });
        }
        tracing::info!(user_id = %user_id, "system user removed");
        Ok(())
    }

    /// Unknown tokens verify as an empty record rather than an error.
    fn verify_invite(&self, token: &str) -> Result<InviteVerification, GatewayError> {
        let conn = self.conn();
        let Some(invite) = find_invite(&conn, token)? else {
            return Ok(InviteVerification::default());
        };
        Ok(InviteVerification {
            org_id: Some(invite.org_id),
            org_name: Some(invite.org_name),
            email: Some(invite.email),
            role: Some(invite.role),
            is_valid: Some(!invite.accepted),
            is_expired: Some(invite.expires_at <= Utc::now()),
        })
    }

    fn accept_invite(&self, token: &str) -> Result<Uuid, GatewayError> {
        let conn = self.conn();
        let actor = match self.actor(&conn) {
            Ok(actor) => actor,
            Err(GatewayError::NotAuthenticated) => {
                return Err(GatewayError::Rejected("not_authenticated".into()))
            }
            Err(e) => return Err(e),
        };
        let invite = find_invite(&conn, token)?
            .ok_or_else(|| GatewayError::Rejected("invalid_token".into()))?;
        if invite.accepted {
            return Err(GatewayError::Rejected("already_accepted".into()));
        }
        if invite.expires_at <= Utc::now() {
            return Err(GatewayError::Rejected("expired_token".into()));
        }
        if !invite.email.eq_ignore_ascii_case(actor.email.trim()) {
            return Err(GatewayError::Rejected("email_mismatch".into()));
        }
        let role: MemberRole = invite.role.parse().unwrap_or(MemberRole::Staff);

        let tx = conn.unchecked_transaction()?;
        insert_member(&tx, invite.org_id, actor.user_id, role)?;
        tx.execute(
            "UPDATE invites SET accepted_at = ?1 WHERE token = ?2",
            params![ts(Utc::now()), token],
        )?;
        tx.commit()?;
        tracing::info!(org_id = %invite.org_id, user_id = %actor.user_id, "invite accepted");
        Ok(invite.org_id)
    }
}
