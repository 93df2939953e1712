//! Service-level errors shared by the screen modules (registry, admin, orgs, invites).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core_state::CoreError;
use crate::db::DatabaseError;
use crate::gateway::GatewayError;

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    /// `Ok(())` when no field failed, otherwise the collected errors.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self))
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        f.write_str(&joined.join("; "))
    }
}

/// Errors surfaced by screen operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),
    /// A destructive action was attempted without the confirmation step.
    #[error("Action not confirmed")]
    NotConfirmed,
    /// Refused by a client-side pre-check before any write was issued.
    #[error("{0}")]
    Refused(String),
    #[error("No active organization selected")]
    NoActiveOrganization,
    #[error("Not signed in")]
    NoSession,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Local state or storage failure; details stay in the logs.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ServiceError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NoActiveSession => Self::NoSession,
            CoreError::NoActiveOrganization => Self::NoActiveOrganization,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl ServiceError {
    /// Message suitable for the inline error area of a screen.
    pub fn user_message(&self) -> String {
        match self {
            Self::Gateway(e) => e.user_message(),
            Self::Internal(_) => "Unexpected error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_errors_are_ok() {
        assert!(FieldErrors::new().into_result().is_ok());
    }

    #[test]
    fn first_message_per_field_wins() {
        let mut errors = FieldErrors::new();
        errors.add("name", "Name is required");
        errors.add("name", "Name too long");
        errors.add("email", "Invalid e-mail");
        assert_eq!(errors.get("name"), Some("Name is required"));
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["email", "name"]);
        let err = errors.into_result().unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(err.to_string().contains("email: Invalid e-mail"));
    }

    #[test]
    fn gateway_message_is_passed_through() {
        let err = ServiceError::from(GatewayError::Rejected("plan in use".into()));
        assert_eq!(err.user_message(), "plan in use");
    }

    #[test]
    fn core_errors_map_to_screen_errors() {
        assert!(matches!(ServiceError::from(CoreError::NoActiveSession), ServiceError::NoSession));
        assert!(matches!(
            ServiceError::from(CoreError::NoActiveOrganization),
            ServiceError::NoActiveOrganization
        ));
        let internal = ServiceError::from(CoreError::LockPoisoned);
        assert_eq!(internal.user_message(), "Unexpected error");
    }
}
