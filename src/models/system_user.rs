use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::SystemRole;

/// Vendor-side staff account, independent of any organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: SystemRole,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl SystemUser {
    pub fn is_super(&self) -> bool {
        self.is_active && self.role == SystemRole::SuperAdmin
    }

    /// Grants the vendor admin area.
    pub fn is_admin(&self) -> bool {
        self.is_active && matches!(self.role, SystemRole::Admin | SystemRole::SuperAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSystemUser {
    /// Must already exist in the identity provider.
    pub email: String,
    pub role: SystemRole,
    #[serde(default = "super::clinic::default_true")]
    pub active: bool,
}
