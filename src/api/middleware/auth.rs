//! Route guards as middleware.
//!
//! Guarded subtrees answer `303 See Other` instead of rendering: to the
//! sign-in page without a session, to the app home for non-staff callers
//! of the admin area.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::access;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::guards::{self, GuardOutcome};

fn context(req: &Request<axum::body::Body>) -> Result<ApiContext, ApiError> {
    req.extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))
}

fn outcome_response(outcome: GuardOutcome, path: &str) -> Option<Response> {
    match outcome {
        GuardOutcome::Allow => None,
        GuardOutcome::Redirect(to) => {
            tracing::info!(path, to, "guard redirect");
            Some(Redirect::to(to).into_response())
        }
        // the staff lookup runs to completion below, so this is not reached
        GuardOutcome::Pending => Some(ApiError::Unauthorized.into_response()),
    }
}

/// Require a signed-in user.
pub async fn require_session(req: Request<axum::body::Body>, next: Next) -> Response {
    let ctx = match context(&req) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };
    let session = ctx.current_session();
    if let Some(refused) = outcome_response(guards::require_auth(session.as_ref()), req.uri().path()) {
        return refused;
    }
    next.run(req).await
}

/// Require a signed-in, active vendor staff member.
pub async fn require_staff(req: Request<axum::body::Body>, next: Next) -> Response {
    let ctx = match context(&req) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };
    let session = ctx.current_session();
    let staff = if session.is_some() {
        match ctx.blocking(access::staff).await {
            Ok(staff) => Some(staff),
            Err(err) => return err.into_response(),
        }
    } else {
        None
    };
    let outcome = guards::require_admin(session.as_ref(), staff);
    if let Some(refused) = outcome_response(outcome, req.uri().path()) {
        return refused;
    }
    next.run(req).await
}
