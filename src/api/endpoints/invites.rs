//! Invite verification (public) and acceptance (signed in).
//!
//! - `GET /api/invites/:token`
//! - `POST /api/invites/:token/accept`

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::invites::{self, InviteView};

pub async fn verify(
    State(ctx): State<ApiContext>,
    Path(token): Path<String>,
) -> Result<Json<InviteView>, ApiError> {
    Ok(Json(ctx.blocking(move |core| invites::verify(core, &token)).await?))
}

#[derive(Serialize)]
pub struct Accepted {
    pub org_id: Uuid,
}

pub async fn accept(
    State(ctx): State<ApiContext>,
    Path(token): Path<String>,
) -> Result<Json<Accepted>, ApiError> {
    let org_id = ctx.blocking(move |core| invites::accept(core, &token)).await?;
    Ok(Json(Accepted { org_id }))
}
