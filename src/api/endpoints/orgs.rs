//! Organization selection and the caller's role in it.
//!
//! - `GET /api/orgs`
//! - `PUT /api/orgs/active`
//! - `GET /api/role`

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{self, RoleState};
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::orgs::{self, OrgSelection};

pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<OrgSelection>, ApiError> {
    Ok(Json(ctx.blocking(orgs::refresh).await?))
}

#[derive(Deserialize)]
pub struct SwitchRequest {
    pub org_id: Uuid,
}

pub async fn switch(
    State(ctx): State<ApiContext>,
    Json(req): Json<SwitchRequest>,
) -> Result<Json<OrgSelection>, ApiError> {
    let selection = ctx
        .blocking(move |core| {
            orgs::switch_active(core, req.org_id)?;
            if let Err(e) = access::refresh(core) {
                tracing::warn!(error = %e, "role not resolved after switch");
            }
            Ok::<_, ApiError>(core.read_orgs()?.clone())
        })
        .await?;
    Ok(Json(selection))
}

/// Resolved role for the active organization, resolving it when stale.
pub async fn role(State(ctx): State<ApiContext>) -> Result<Json<RoleState>, ApiError> {
    let role = ctx
        .blocking(|core| {
            let Some(org_id) = core.active_org()? else {
                return Ok::<_, ApiError>(RoleState::Unresolved);
            };
            let role = core.role_state()?;
            if role.is_resolved_for(org_id) {
                Ok(role)
            } else {
                Ok(access::refresh(core)?)
            }
        })
        .await?;
    Ok(Json(role))
}
