//! API router.
//!
//! Three route groups under `/api/`, each with its own guard:
//! public (session, health, invite verification), signed-in (the clinic
//! screens) and staff (the vendor admin area).
//!
//! Middleware stack (outermost → innermost):
//! 1. Context extension → 2. Audit logger → 3. Guard or sign-in limiter

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::api::endpoints::{self, admin};
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

#[cfg(test)]
pub(crate) fn api_router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx)
}

fn build_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let public = Router::new()
        .route("/health", get(endpoints::health::check))
        .route(
            "/session",
            get(endpoints::session::current)
                .post(endpoints::session::login)
                .delete(endpoints::session::logout)
                .layer(axum::middleware::from_fn(middleware::rate::limit_login)),
        )
        .route("/invites/:token", get(endpoints::invites::verify))
        .with_state(ctx.clone());

    let signed_in = Router::new()
        .route("/invites/:token/accept", post(endpoints::invites::accept))
        .route("/orgs", get(endpoints::orgs::list))
        .route("/orgs/active", put(endpoints::orgs::switch))
        .route("/role", get(endpoints::orgs::role))
        .route("/agenda", get(endpoints::agenda::month))
        .route("/agenda/draft", get(endpoints::agenda::draft))
        .route("/agenda/appointments", post(endpoints::agenda::save))
        .route(
            "/agenda/appointments/:id",
            delete(endpoints::agenda::delete_appointment),
        )
        .route(
            "/agenda/appointments/:id/attendance",
            put(endpoints::agenda::attendance),
        )
        .route("/agenda/history", get(endpoints::agenda::history))
        .route("/agenda/holidays", post(endpoints::agenda::add_holiday))
        .route("/agenda/holidays/:id", delete(endpoints::agenda::delete_holiday))
        .route(
            "/clinics",
            get(endpoints::registry::list_clinics).post(endpoints::registry::save_clinic),
        )
        .route("/clinics/:id", delete(endpoints::registry::delete_clinic))
        .route("/clinics/:id/active", put(endpoints::registry::set_clinic_active))
        .route(
            "/doctors",
            get(endpoints::registry::list_doctors).post(endpoints::registry::save_doctor),
        )
        .route("/doctors/:id", delete(endpoints::registry::delete_doctor))
        .route(
            "/insurances",
            get(endpoints::registry::list_insurances).post(endpoints::registry::save_insurance),
        )
        .route("/insurances/:id", delete(endpoints::registry::delete_insurance))
        .route(
            "/patients",
            get(endpoints::registry::list_patients).post(endpoints::registry::save_patient),
        )
        .route("/patients/:id", delete(endpoints::registry::delete_patient))
        .route(
            "/preferences/theme",
            get(endpoints::preferences::theme).put(endpoints::preferences::set_theme),
        )
        .route(
            "/preferences/theme/toggle",
            post(endpoints::preferences::toggle_theme),
        )
        .with_state(ctx.clone())
        .route_layer(axum::middleware::from_fn(middleware::auth::require_session));

    let staff = Router::new()
        .route("/plans", get(admin::list_plans).post(admin::save_plan))
        .route("/plans/:id", delete(admin::delete_plan))
        .route("/plans/:id/toggle", post(admin::toggle_plan))
        .route("/org-types", get(admin::list_org_types))
        .route("/clients", get(admin::list_clients).post(admin::create_client))
        .route(
            "/clients/:id",
            put(admin::update_client).delete(admin::delete_client),
        )
        .route("/clients/:id/toggle", post(admin::toggle_client))
        .route("/clients/:id/blocked", put(admin::block_client))
        .route("/invoices", get(admin::list_invoices).post(admin::create_invoice))
        .route("/invoices/preview", get(admin::preview_invoice))
        .route(
            "/invoices/:id",
            get(admin::invoice_detail).delete(admin::delete_invoice),
        )
        .route("/invoices/:id/open", post(admin::open_invoice))
        .route("/invoices/:id/adjust", put(admin::adjust_invoice))
        .route("/invoices/:id/pay", post(admin::pay_invoice))
        .route("/invoices/:id/refund", post(admin::refund_invoice))
        .route(
            "/system-users",
            get(admin::list_system_users).post(admin::add_system_user),
        )
        .route("/system-users/:user_id", delete(admin::remove_system_user))
        .with_state(ctx.clone())
        .route_layer(axum::middleware::from_fn(middleware::auth::require_staff));

    let api = Router::new()
        .merge(public)
        .merge(signed_in)
        .nest("/admin", staff)
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx));

    Router::new().nest("/api", api)
}
