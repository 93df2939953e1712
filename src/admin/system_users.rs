//! Vendor staff accounts. Only a super admin may change them.

use uuid::Uuid;

use crate::core_state::CoreState;
use crate::error::{FieldErrors, ServiceError};
use crate::models::{NewSystemUser, SystemUser};
use crate::validation::is_valid_email;
use crate::view::require_confirmation;

pub fn list_system_users(state: &CoreState) -> Result<Vec<SystemUser>, ServiceError> {
    state.require_session()?;
    Ok(state.gateway().list_system_users()?)
}

/// Grants (or updates) vendor access for an existing account.
pub fn add_system_user(state: &CoreState, user: &NewSystemUser) -> Result<(), ServiceError> {
    let email = user.email.trim().to_lowercase();
    let mut errors = FieldErrors::new();
    if email.is_empty() {
        errors.add("email", "E-mail is required");
    } else if !is_valid_email(&email) {
        errors.add("email", "Invalid e-mail");
    }
    errors.into_result()?;

    state.require_session()?;
    state.gateway().add_system_user(&NewSystemUser { email, ..user.clone() })?;
    tracing::info!(role = user.role.as_str(), active = user.active, "system user added");
    Ok(())
}

pub fn remove_system_user(state: &CoreState, user_id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    state.require_session()?;
    state.gateway().remove_system_user(user_id)?;
    tracing::info!(user_id = %user_id, "system user removed");
    Ok(())
}
