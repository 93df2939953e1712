use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Calendar border color when a doctor has none.
pub const DEFAULT_DOCTOR_COLOR: &str = "#0ea5e9";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl Doctor {
    /// Visual grouping key on the calendar.
    pub fn display_color(&self) -> &str {
        self.color
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_DOCTOR_COLOR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}
