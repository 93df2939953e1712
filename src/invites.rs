//! Invite acceptance: verify a token, then join its organization.

use serde::Serialize;
use uuid::Uuid;

use crate::core_state::CoreState;
use crate::error::ServiceError;
use crate::gateway::{backend_message, GatewayError};
use crate::models::InviteVerification;
use crate::orgs;

/// What the accept screen shows for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InviteView {
    NotFound,
    Expired,
    /// Already used or revoked.
    Invalid,
    Usable {
        verification: InviteVerification,
        /// Signed-in address, if any.
        session_email: Option<String>,
        /// The signed-in address is the invited one.
        email_matches: bool,
    },
}

pub fn verify(state: &CoreState, token: &str) -> Result<InviteView, ServiceError> {
    let token = token.trim();
    let verification = state.gateway().verify_invite(token)?;
    if verification.org_id.is_none() {
        tracing::info!("invite token not found");
        return Ok(InviteView::NotFound);
    }
    if verification.is_expired == Some(true) {
        return Ok(InviteView::Expired);
    }
    if !verification.is_usable() {
        return Ok(InviteView::Invalid);
    }
    let session_email = state
        .session()
        .current()
        .and_then(|s| s.email().map(str::to_string));
    let email_matches = session_email
        .as_deref()
        .is_some_and(|e| verification.email_matches(e));
    Ok(InviteView::Usable { verification, session_email, email_matches })
}

/// Message for a refusal code returned by the accept call.
pub fn accept_error_message(code: &str) -> &'static str {
    if code.contains("email_mismatch") {
        "You are signed in with a different e-mail than the invite."
    } else if code.contains("expired_token") {
        "This invite has expired."
    } else if code.contains("already_accepted") {
        "This invite was already accepted."
    } else if code.contains("invalid_token") {
        "Invalid invite."
    } else if code.contains("not_authenticated") {
        "You need to be signed in to accept the invite."
    } else {
        "Could not accept the invite."
    }
}

fn refusal(err: GatewayError) -> ServiceError {
    let code = match &err {
        GatewayError::Rejected(code) => code.clone(),
        GatewayError::Http { body, .. } => backend_message(body).unwrap_or_default(),
        GatewayError::NotAuthenticated => "not_authenticated".to_string(),
        _ => return ServiceError::Gateway(err),
    };
    tracing::info!(code = %code, "invite refused");
    ServiceError::Refused(accept_error_message(&code).to_string())
}

/// Join the invited organization and make it the active one.
pub fn accept(state: &CoreState, token: &str) -> Result<Uuid, ServiceError> {
    if state.session().current().is_none() {
        return Err(ServiceError::Refused(accept_error_message("not_authenticated").to_string()));
    }
    let org_id = state.gateway().accept_invite(token.trim()).map_err(refusal)?;
    tracing::info!(org_id = %org_id, "invite accepted");

    orgs::refresh(state)?;
    orgs::switch_active(state, org_id)?;
    Ok(org_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::testing::{state_over, TestState};
    use crate::gateway::local::testing::{Fixture, PASSWORD};
    use crate::models::MemberRole;

    struct Invited {
        t: TestState,
        org_id: Uuid,
        token: String,
    }

    /// Invite for a freshly registered account into a second organization.
    fn invited(ttl_days: i64) -> Invited {
        let fx = Fixture::new();
        let org_id = fx.gw.create_organization("Clinic Z").unwrap();
        fx.gw.register_user("new@clinicz.com", PASSWORD).unwrap();
        let token = fx
            .gw
            .create_invite(org_id, "new@clinicz.com", MemberRole::Staff, chrono::Duration::days(ttl_days))
            .unwrap();
        Invited { t: state_over(fx.gw), org_id, token }
    }

    #[test]
    fn error_codes_map_to_distinct_messages() {
        let codes = [
            "email_mismatch",
            "expired_token",
            "already_accepted",
            "invalid_token",
            "not_authenticated",
            "something else",
        ];
        let messages: std::collections::HashSet<_> =
            codes.iter().map(|c| accept_error_message(c)).collect();
        assert_eq!(messages.len(), codes.len());
        assert_eq!(
            accept_error_message("ERROR: expired_token (P0001)"),
            "This invite has expired."
        );
    }

    #[test]
    fn verify_reports_usability_and_email_match() {
        let i = invited(7);
        match verify(&i.t.state, &i.token).unwrap() {
            InviteView::Usable { email_matches, session_email, verification } => {
                assert!(!email_matches);
                assert_eq!(session_email, None);
                assert_eq!(verification.org_name.as_deref(), Some("Clinic Z"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(verify(&i.t.state, "nope").unwrap(), InviteView::NotFound);
    }

    #[test]
    fn expired_invites_are_reported() {
        let i = invited(-1);
        assert_eq!(verify(&i.t.state, &i.token).unwrap(), InviteView::Expired);
    }

    #[test]
    fn accept_requires_session() {
        let i = invited(7);
        let err = accept(&i.t.state, &i.token).unwrap_err();
        assert_eq!(err.user_message(), "You need to be signed in to accept the invite.");
    }

    #[test]
    fn wrong_account_is_refused() {
        let i = invited(7);
        i.t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        let err = accept(&i.t.state, &i.token).unwrap_err();
        assert_eq!(
            err.user_message(),
            "You are signed in with a different e-mail than the invite."
        );
    }

    #[test]
    fn accepting_switches_to_the_joined_org() {
        let i = invited(7);
        i.t.state.sign_in("new@clinicz.com", PASSWORD).unwrap();
        assert_eq!(accept(&i.t.state, &i.token).unwrap(), i.org_id);
        assert_eq!(i.t.state.active_org().unwrap(), Some(i.org_id));

        let err = accept(&i.t.state, &i.token).unwrap_err();
        assert_eq!(err.user_message(), "This invite was already accepted.");
        assert!(matches!(verify(&i.t.state, &i.token).unwrap(), InviteView::Invalid));
    }
}
