use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clinic::default_true;

/// Name of the self-pay option every organization gets.
pub const SELF_PAY_INSURANCE: &str = "Particular";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insurance {
    pub id: Uuid,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<Uuid>,
    pub name: String,
    #[serde(default, alias = "isDefault")]
    pub is_default: bool,
    #[serde(default = "default_true", alias = "isActive")]
    pub is_active: bool,
    /// Policy values; read and displayed, not enforced when booking.
    #[serde(default, alias = "minDaysBetween")]
    pub min_days_between: i32,
    #[serde(default, alias = "maxDaysBetween")]
    pub max_days_between: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub min_days_between: i32,
    #[serde(default)]
    pub max_days_between: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Pick the insurance a new appointment starts with: the flagged default,
/// else the self-pay option by name, else the first one listed.
pub fn preferred_insurance(insurances: &[Insurance]) -> Option<&Insurance> {
    insurances
        .iter()
        .find(|i| i.is_default)
        .or_else(|| insurances.iter().find(|i| i.name == SELF_PAY_INSURANCE))
        .or_else(|| insurances.first())
}
