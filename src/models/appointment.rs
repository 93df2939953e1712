use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default status of a new booking.
pub const STATUS_SCHEDULED: &str = "scheduled";

/// Attendance outcome, stored as a nullable boolean (`attended`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Attendance {
    #[default]
    Unset,
    Attended,
    Missed,
}

impl From<Option<bool>> for Attendance {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Unset,
            Some(true) => Self::Attended,
            Some(false) => Self::Missed,
        }
    }
}

impl From<Attendance> for Option<bool> {
    fn from(value: Attendance) -> Self {
        match value {
            Attendance::Unset => None,
            Attendance::Attended => Some(true),
            Attendance::Missed => Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<Uuid>,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub insurance_id: Uuid,
    /// Free text; history lookups match on it.
    pub patient_name: String,
    /// Absolute scheduled instant.
    pub when_at: DateTime<Utc>,
    #[serde(default, rename = "attended")]
    pub attendance: Attendance,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
}

fn default_status() -> String {
    STATUS_SCHEDULED.to_string()
}

/// Upsert payload (conflict target `id`). `override_reason` is only set
/// when the write bypasses a holiday block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentWrite {
    pub id: Uuid,
    pub org_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub insurance_id: Uuid,
    pub patient_name: String,
    pub when_at: DateTime<Utc>,
    pub status: String,
    #[serde(rename = "attended")]
    pub attendance: Attendance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
}
