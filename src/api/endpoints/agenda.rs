//! Month agenda, appointment writes and holidays.
//!
//! - `GET /api/agenda?month=YYYY-MM`
//! - `GET /api/agenda/draft?day=YYYY-MM-DD`
//! - `POST /api/agenda/appointments`
//! - `PUT /api/agenda/appointments/:id/attendance`
//! - `DELETE /api/agenda/appointments/:id?confirm=true`
//! - `GET /api/agenda/history?patient=`
//! - `POST /api/agenda/holidays`
//! - `DELETE /api/agenda/holidays/:id?confirm=true`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::agenda::{self, calendar, AgendaMonth, AppointmentForm};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Confirm};
use crate::models::{Appointment, Attendance, Holiday};

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    #[serde(default)]
    pub month: Option<String>,
}

pub async fn month(
    State(ctx): State<ApiContext>,
    Query(q): Query<MonthQuery>,
) -> Result<Json<AgendaMonth>, ApiError> {
    let reference = match q.month.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => calendar::parse_month(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid month \"{raw}\", expected YYYY-MM")))?,
        None => calendar::local_date(Utc::now(), ctx.core.utc_offset()),
    };
    Ok(Json(ctx.blocking(move |core| agenda::load_month(core, reference)).await?))
}

#[derive(Debug, Deserialize)]
pub struct DraftQuery {
    #[serde(default)]
    pub day: Option<NaiveDate>,
}

pub async fn draft(
    State(ctx): State<ApiContext>,
    Query(q): Query<DraftQuery>,
) -> Result<Json<AppointmentForm>, ApiError> {
    Ok(Json(ctx.blocking(move |core| agenda::new_draft(core, q.day)).await?))
}

pub async fn save(
    State(ctx): State<ApiContext>,
    Json(form): Json<AppointmentForm>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(ctx.blocking(move |core| agenda::save(core, &form)).await?))
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRequest {
    /// `true`, `false` or `null` to clear.
    pub attended: Attendance,
}

pub async fn attendance(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<AttendanceRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| agenda::set_attendance(core, id, req.attended))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_appointment(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| agenda::delete_appointment(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub patient: String,
}

pub async fn history(
    State(ctx): State<ApiContext>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    Ok(Json(
        ctx.blocking(move |core| agenda::patient_history(core, &q.patient))
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct HolidayRequest {
    pub date: NaiveDate,
    pub name: String,
}

pub async fn add_holiday(
    State(ctx): State<ApiContext>,
    Json(req): Json<HolidayRequest>,
) -> Result<Json<Holiday>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Holiday name is required".into()));
    }
    Ok(Json(
        ctx.blocking(move |core| agenda::add_holiday(core, req.date, req.name.trim()))
            .await?,
    ))
}

pub async fn delete_holiday(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| agenda::delete_holiday(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
