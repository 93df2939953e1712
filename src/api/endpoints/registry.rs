//! Clinic-side master data: clinics, doctors, insurances, patients.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Confirm};
use crate::models::{
    Clinic, ClinicDraft, Doctor, DoctorDraft, Insurance, InsuranceDraft, Patient, PatientDraft,
};
use crate::registry;
use crate::view::ListState;

// ── Clinics ─────────────────────────────────────────────────

pub async fn list_clinics(State(ctx): State<ApiContext>) -> Json<ListState<Clinic>> {
    Json(ctx.list(registry::list_clinics).await)
}

pub async fn save_clinic(
    State(ctx): State<ApiContext>,
    Json(draft): Json<ClinicDraft>,
) -> Result<Json<Clinic>, ApiError> {
    Ok(Json(ctx.blocking(move |core| registry::save_clinic(core, &draft)).await?))
}

#[derive(Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

pub async fn set_clinic_active(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActiveRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::set_clinic_active(core, id, req.active))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_clinic(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::delete_clinic(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Doctors ─────────────────────────────────────────────────

pub async fn list_doctors(State(ctx): State<ApiContext>) -> Json<ListState<Doctor>> {
    Json(ctx.list(registry::list_doctors).await)
}

pub async fn save_doctor(
    State(ctx): State<ApiContext>,
    Json(draft): Json<DoctorDraft>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::save_doctor(core, &draft)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_doctor(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::delete_doctor(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Insurances ──────────────────────────────────────────────

pub async fn list_insurances(State(ctx): State<ApiContext>) -> Json<ListState<Insurance>> {
    Json(ctx.list(registry::list_insurances).await)
}

pub async fn save_insurance(
    State(ctx): State<ApiContext>,
    Json(draft): Json<InsuranceDraft>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::save_insurance(core, &draft))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_insurance(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::delete_insurance(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Patients ────────────────────────────────────────────────

pub async fn list_patients(State(ctx): State<ApiContext>) -> Json<ListState<Patient>> {
    Json(ctx.list(registry::list_patients).await)
}

pub async fn save_patient(
    State(ctx): State<ApiContext>,
    Json(draft): Json<PatientDraft>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::save_patient(core, &draft))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_patient(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| registry::delete_patient(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
