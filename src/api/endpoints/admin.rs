//! Vendor admin area: plans, clients, invoices, system users.
//!
//! Mounted under `/api/admin` behind the staff guard.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admin::{
    billing, clients, plans, system_users, BillingFilter, ClientCreation, InvoiceDetail, InvoicePreview,
};
use crate::admin::plans::PlanRow;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Confirm};
use crate::models::{
    AdminMember, Client, ClientDraft, ClientStatus, Invoice, InvoiceAdjustment, NewInvoice,
    NewSystemUser, OrgType, PaymentDraft, Plan, PlanDraft, PlanStatus, SystemUser,
};
use crate::view::ListState;

#[derive(Serialize)]
pub struct StatusBody<S: Serialize> {
    pub status: S,
}

// ── Plans ───────────────────────────────────────────────────

pub async fn list_plans(State(ctx): State<ApiContext>) -> Json<ListState<PlanRow>> {
    Json(ctx.list(plans::list_plans).await)
}

pub async fn save_plan(
    State(ctx): State<ApiContext>,
    Json(draft): Json<PlanDraft>,
) -> Result<Json<Plan>, ApiError> {
    Ok(Json(ctx.blocking(move |core| plans::save_plan(core, &draft)).await?))
}

pub async fn toggle_plan(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusBody<PlanStatus>>, ApiError> {
    let status = ctx.blocking(move |core| plans::toggle_plan(core, id)).await?;
    Ok(Json(StatusBody { status }))
}

pub async fn delete_plan(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| plans::delete_plan(core, id, c.confirm)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Clients ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

pub async fn list_clients(
    State(ctx): State<ApiContext>,
    Query(q): Query<SearchQuery>,
) -> Json<ListState<Client>> {
    Json(
        ctx.list(move |core| clients::list_clients(core, q.q.as_deref()))
            .await,
    )
}

pub async fn list_org_types(State(ctx): State<ApiContext>) -> Result<Json<Vec<OrgType>>, ApiError> {
    Ok(Json(ctx.blocking(clients::list_org_types).await?))
}

#[derive(Deserialize)]
pub struct CreateClientRequest {
    pub client: ClientDraft,
    #[serde(default)]
    pub admin: AdminMember,
}

pub async fn create_client(
    State(ctx): State<ApiContext>,
    Json(req): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientCreation>), ApiError> {
    let created = ctx
        .blocking(move |core| clients::create_client(core, &req.client, req.admin))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
pub struct UpdateClientRequest {
    pub client: ClientDraft,
    pub status: ClientStatus,
}

pub async fn update_client(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateClientRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| clients::update_client(core, id, &req.client, req.status))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_client(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusBody<ClientStatus>>, ApiError> {
    let status = ctx.blocking(move |core| clients::toggle_client(core, id)).await?;
    Ok(Json(StatusBody { status }))
}

#[derive(Deserialize)]
pub struct BlockRequest {
    pub blocked: bool,
}

pub async fn block_client(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<BlockRequest>,
) -> Result<Json<StatusBody<ClientStatus>>, ApiError> {
    let status = ctx
        .blocking(move |core| clients::set_client_blocked(core, id, req.blocked))
        .await?;
    Ok(Json(StatusBody { status }))
}

pub async fn delete_client(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| clients::delete_client(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Invoices ────────────────────────────────────────────────

pub async fn list_invoices(
    State(ctx): State<ApiContext>,
    Query(filter): Query<BillingFilter>,
) -> Json<ListState<Invoice>> {
    Json(
        ctx.list(move |core| billing::list_invoices(core, &filter))
            .await,
    )
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub plan_id: Uuid,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub fee_cents: i64,
}

pub async fn preview_invoice(
    State(ctx): State<ApiContext>,
    Query(q): Query<PreviewQuery>,
) -> Result<Json<InvoicePreview>, ApiError> {
    Ok(Json(
        ctx.blocking(move |core| billing::preview_total(core, q.plan_id, q.discount_cents, q.fee_cents))
            .await?,
    ))
}

pub async fn create_invoice(
    State(ctx): State<ApiContext>,
    Json(new): Json<NewInvoice>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let invoice = ctx
        .blocking(move |core| billing::create_invoice(core, &new))
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn invoice_detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, ApiError> {
    Ok(Json(ctx.blocking(move |core| billing::invoice_detail(core, id)).await?))
}

pub async fn open_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, ApiError> {
    Ok(Json(ctx.blocking(move |core| billing::open_invoice(core, id)).await?))
}

pub async fn adjust_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(adjustment): Json<InvoiceAdjustment>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| billing::adjust_invoice(core, id, &adjustment))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pay_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(payment): Json<PaymentDraft>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| billing::register_payment(core, id, &payment))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refund_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| billing::refund_invoice(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_invoice(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| billing::delete_invoice(core, id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── System users ────────────────────────────────────────────

pub async fn list_system_users(State(ctx): State<ApiContext>) -> Json<ListState<SystemUser>> {
    Json(ctx.list(system_users::list_system_users).await)
}

pub async fn add_system_user(
    State(ctx): State<ApiContext>,
    Json(user): Json<NewSystemUser>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| system_users::add_system_user(core, &user))
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_system_user(
    State(ctx): State<ApiContext>,
    Path(user_id): Path<Uuid>,
    Query(c): Query<Confirm>,
) -> Result<StatusCode, ApiError> {
    ctx.blocking(move |core| system_users::remove_system_user(core, user_id, c.confirm))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
