//! Holiday block applied before any appointment write is issued.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core_state::CoreError;
use crate::error::FieldErrors;
use crate::gateway::GatewayError;
use crate::models::HolidaySet;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),

    #[error("{date} is blocked by the holiday \"{name}\". Only an admin override with a reason can schedule on this day.")]
    HolidayBlocked { date: NaiveDate, name: String },

    #[error("Only an owner or admin can override a holiday")]
    OverrideNotPermitted,

    #[error("An override needs a reason")]
    OverrideReasonRequired,

    #[error("Action not confirmed")]
    NotConfirmed,

    #[error("No active organization selected")]
    NoActiveOrganization,

    #[error("Not signed in")]
    NoSession,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScheduleError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Gateway(e) => e.user_message(),
            Self::Internal(_) => "Unexpected error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<CoreError> for ScheduleError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NoActiveSession => Self::NoSession,
            CoreError::NoActiveOrganization => Self::NoActiveOrganization,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// The override checkbox and its reason, as submitted with the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayOverride {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub reason: String,
}

/// Decide whether a write on `date` may proceed. Returns the reason to
/// store with the appointment when the write overrides a holiday.
///
/// An override on a holiday is a destructive action and needs `confirmed`.
pub fn check_write(
    date: NaiveDate,
    holidays: &HolidaySet,
    override_: &HolidayOverride,
    can_override: bool,
    confirmed: bool,
) -> Result<Option<String>, ScheduleError> {
    let Some(name) = holidays.label(date) else {
        return Ok(None);
    };
    if !override_.enabled {
        tracing::info!(%date, holiday = name, "write refused on holiday");
        return Err(ScheduleError::HolidayBlocked {
            date,
            name: name.to_string(),
        });
    }
    if !can_override {
        tracing::warn!(%date, "holiday override attempted without admin role");
        return Err(ScheduleError::OverrideNotPermitted);
    }
    let reason = override_.reason.trim();
    if reason.is_empty() {
        return Err(ScheduleError::OverrideReasonRequired);
    }
    if !confirmed {
        return Err(ScheduleError::NotConfirmed);
    }
    Ok(Some(reason.to_string()))
}
