//! Display preferences kept in client-local storage.
//!
//! - `GET /api/preferences/theme`
//! - `PUT /api/preferences/theme`
//! - `POST /api/preferences/theme/toggle`

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::db;
use crate::models::Theme;

#[derive(Debug, Serialize, Deserialize)]
pub struct ThemeBody {
    pub theme: Theme,
}

pub async fn theme(State(ctx): State<ApiContext>) -> Result<Json<ThemeBody>, ApiError> {
    let theme = ctx
        .blocking(|core| {
            let conn = core.open_preferences()?;
            Ok::<_, ApiError>(db::get_theme(&conn)?)
        })
        .await?;
    Ok(Json(ThemeBody { theme }))
}

pub async fn set_theme(
    State(ctx): State<ApiContext>,
    Json(body): Json<ThemeBody>,
) -> Result<Json<ThemeBody>, ApiError> {
    let theme = body.theme;
    ctx.blocking(move |core| {
        let conn = core.open_preferences()?;
        Ok::<_, ApiError>(db::set_theme(&conn, theme)?)
    })
    .await?;
    Ok(Json(ThemeBody { theme }))
}

pub async fn toggle_theme(State(ctx): State<ApiContext>) -> Result<Json<ThemeBody>, ApiError> {
    let theme = ctx
        .blocking(|core| {
            let conn = core.open_preferences()?;
            Ok::<_, ApiError>(db::toggle_theme(&conn)?)
        })
        .await?;
    tracing::debug!(theme = theme.as_str(), "theme toggled");
    Ok(Json(ThemeBody { theme }))
}
