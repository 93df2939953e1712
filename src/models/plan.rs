use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::PlanStatus;
use crate::error::FieldErrors;
use crate::validation::is_valid_plan_code;

pub const DEFAULT_CURRENCY: &str = "BRL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub clinics: u32,
    pub users: u32,
    pub doctors: u32,
}

/// Subscription plan offered by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub limits: PlanLimits,
    pub status: PlanStatus,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub limits: PlanLimits,
}

impl PlanDraft {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let code = self.code.trim();
        if code.is_empty() {
            errors.add("code", "Plan code is required");
        } else if !is_valid_plan_code(code) {
            errors.add(
                "code",
                "Use lowercase letters, digits, hyphen or underscore (at least 3 characters, starting with a letter or digit)",
            );
        }
        if self.name.trim().is_empty() {
            errors.add("name", "Plan name is required");
        }
        if self.price_cents < 0 {
            errors.add("price_cents", "Invalid price");
        }
        errors
    }
}
