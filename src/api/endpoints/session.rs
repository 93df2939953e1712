//! Sign-in, sign-out and the current session.
//!
//! - `GET /api/session`
//! - `POST /api/session`
//! - `DELETE /api/session`

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;
use crate::models::AuthUser;
use crate::{access, orgs};

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub signed_in: bool,
    pub user: Option<AuthUser>,
    /// `None` until the staff lookup has run.
    pub staff: Option<bool>,
    pub active_org: Option<Uuid>,
}

fn view(core: &CoreState) -> SessionView {
    let session = core.session().current();
    SessionView {
        signed_in: session.is_some(),
        user: session.map(|s| s.user),
        staff: core.staff_flag().ok().flatten(),
        active_org: core.active_org().ok().flatten(),
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn current(State(ctx): State<ApiContext>) -> Json<SessionView> {
    Json(view(&ctx.core))
}

/// Sign in, then load the organizations and resolve the role. Failures of
/// the follow-up loads leave the session in place.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let view = ctx
        .blocking(move |core| {
            core.sign_in(&req.email, &req.password)
                .map_err(ApiError::LoginFailed)?;
            if let Err(e) = orgs::load(core) {
                tracing::warn!(error = %e, "organizations not loaded after sign-in");
            }
            if let Err(e) = access::refresh(core) {
                tracing::warn!(error = %e, "role not resolved after sign-in");
            }
            Ok::<_, ApiError>(view(core))
        })
        .await?;
    Ok(Json(view))
}

pub async fn logout(State(ctx): State<ApiContext>) -> Result<StatusCode, ApiError> {
    ctx.blocking(|core| {
        core.sign_out();
        Ok::<_, ApiError>(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
