//! Tenant organizations as seen by the vendor.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::core_state::CoreState;
use crate::error::ServiceError;
use crate::gateway::GatewayError;
use crate::models::{AdminMember, Client, ClientDraft, ClientStatus, OrgType};
use crate::validation::{format_cpf_cnpj, format_phone};
use crate::view::require_confirmation;

/// Path of the accept screen for an invite token.
pub fn invite_link(token: &str) -> String {
    format!("/accept-invite/{token}")
}

/// Outcome of the create form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCreation {
    pub org_id: Uuid,
    /// Present when the administrator was invited rather than linked.
    pub invite_link: Option<String>,
    /// False when the client exists but its yearly invoices could not be issued.
    pub invoices_seeded: bool,
}

pub fn list_clients(state: &CoreState, query: Option<&str>) -> Result<Vec<Client>, ServiceError> {
    state.require_session()?;
    let query = query.map(str::trim).filter(|q| !q.is_empty());
    Ok(state.gateway().list_clients(query)?)
}

pub fn list_org_types(state: &CoreState) -> Result<Vec<OrgType>, ServiceError> {
    state.require_session()?;
    Ok(state.gateway().list_org_types()?)
}

fn clean(draft: &ClientDraft) -> ClientDraft {
    let text = |v: &str| v.trim().to_string();
    ClientDraft {
        name: text(&draft.name),
        cpf_cnpj: format_cpf_cnpj(&draft.cpf_cnpj),
        phone: if draft.phone.trim().is_empty() { String::new() } else { format_phone(&draft.phone) },
        email: draft.email.trim().to_lowercase(),
        cep: text(&draft.cep),
        address_line1: text(&draft.address_line1),
        address_line2: text(&draft.address_line2),
        district: text(&draft.district),
        city: text(&draft.city),
        state: text(&draft.state),
        plan_id: draft.plan_id,
        type_id: draft.type_id,
    }
}

/// Create the organization, attach or invite its administrator, then issue
/// twelve monthly invoices from the chosen plan starting today.
pub fn create_client(
    state: &CoreState,
    draft: &ClientDraft,
    admin: AdminMember,
) -> Result<ClientCreation, ServiceError> {
    draft.validate(true).into_result()?;
    state.require_session()?;
    let draft = clean(draft);
    let gateway = state.gateway();

    let created = gateway.create_client(&draft, admin)?;
    tracing::info!(
        org_id = %created.org_id,
        invited = created.invite_token.is_some(),
        "client created"
    );

    let invoices_seeded = match draft.plan_id {
        Some(plan_id) => match gateway.seed_plan_invoices(created.org_id, plan_id, Utc::now()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(org_id = %created.org_id, error = %e, "plan invoices not seeded");
                false
            }
        },
        None => false,
    };

    Ok(ClientCreation {
        org_id: created.org_id,
        invite_link: created.invite_token.as_deref().map(invite_link),
        invoices_seeded,
    })
}

pub fn update_client(
    state: &CoreState,
    id: Uuid,
    draft: &ClientDraft,
    status: ClientStatus,
) -> Result<(), ServiceError> {
    draft.validate(false).into_result()?;
    state.require_session()?;
    state.gateway().update_client(id, &clean(draft), status)?;
    tracing::info!(org_id = %id, status = status.as_str(), "client updated");
    Ok(())
}

pub fn toggle_client(state: &CoreState, id: Uuid) -> Result<ClientStatus, ServiceError> {
    state.require_session()?;
    let status = state.gateway().toggle_client(id)?;
    tracing::info!(org_id = %id, status = status.as_str(), "client status changed");
    Ok(status)
}

pub fn set_client_blocked(
    state: &CoreState,
    id: Uuid,
    blocked: bool,
) -> Result<ClientStatus, ServiceError> {
    state.require_session()?;
    let status = state.gateway().set_client_blocked(id, blocked)?;
    tracing::info!(org_id = %id, blocked, "client block changed");
    Ok(status)
}

/// Refused up front while the organization still has appointments.
pub fn delete_client(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    state.require_session()?;
    let gateway = state.gateway();
    let client = gateway
        .list_clients(None)?
        .into_iter()
        .find(|c| c.id == id)
        .ok_or(GatewayError::NotFound { entity: "client" })?;
    if client.has_appointments {
        tracing::info!(org_id = %id, "client delete refused");
        return Err(ServiceError::Refused(format!(
            "{} has appointments and cannot be deleted. Deactivate or block it instead.",
            client.name
        )));
    }
    gateway.delete_client(id)?;
    tracing::info!(org_id = %id, "client deleted");
    Ok(())
}
