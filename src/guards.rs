//! Route guards: whole route subtrees gated on "has session" and "is admin".

use serde::Serialize;

use crate::models::Session;

pub const LOGIN_PATH: &str = "/login";
pub const APP_PATH: &str = "/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "to", rename_all = "snake_case")]
pub enum GuardOutcome {
    Allow,
    /// The staff check has not finished; render nothing yet.
    Pending,
    Redirect(&'static str),
}

pub fn require_auth(session: Option<&Session>) -> GuardOutcome {
    match session {
        Some(_) => GuardOutcome::Allow,
        None => GuardOutcome::Redirect(LOGIN_PATH),
    }
}

/// `staff` is `None` while the lookup is in flight.
pub fn require_admin(session: Option<&Session>, staff: Option<bool>) -> GuardOutcome {
    if session.is_none() {
        return GuardOutcome::Redirect(LOGIN_PATH);
    }
    match staff {
        None => GuardOutcome::Pending,
        Some(true) => GuardOutcome::Allow,
        Some(false) => GuardOutcome::Redirect(APP_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthUser;
    use uuid::Uuid;

    fn session() -> Session {
        Session {
            access_token: "t".into(),
            user: AuthUser { id: Uuid::new_v4(), email: Some("a@b.com".into()) },
            expires_at: None,
        }
    }

    #[test]
    fn auth_guard_redirects_to_login() {
        assert_eq!(require_auth(None), GuardOutcome::Redirect(LOGIN_PATH));
        assert_eq!(require_auth(Some(&session())), GuardOutcome::Allow);
    }

    #[test]
    fn admin_guard_states() {
        let s = session();
        assert_eq!(require_admin(None, Some(true)), GuardOutcome::Redirect(LOGIN_PATH));
        assert_eq!(require_admin(Some(&s), None), GuardOutcome::Pending);
        assert_eq!(require_admin(Some(&s), Some(false)), GuardOutcome::Redirect(APP_PATH));
        assert_eq!(require_admin(Some(&s), Some(true)), GuardOutcome::Allow);
    }
}
