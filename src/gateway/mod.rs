//! Boundary to the system of record.
//!
//! Every screen talks to the backend through these traits, split by concern.
//! `RestGateway` speaks to the managed backend over HTTP; `LocalGateway` is an
//! embedded SQLite implementation used offline and in tests. Calls are
//! blocking; async callers run them on the blocking pool.

pub mod local;
pub mod rest;
pub mod rows;

pub use local::LocalGateway;
pub use rest::RestGateway;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{
    AdminMember, Appointment, AppointmentWrite, Attendance, Client, ClientCreated, ClientDraft,
    ClientStatus, Clinic, ClinicDraft, Doctor, DoctorDraft, Holiday, Insurance, InsuranceDraft,
    InviteVerification, Invoice, InvoiceAdjustment, InvoiceQuery, MemberRole, NewInvoice,
    NewSystemUser, OrgType, Organization, Patient, PatientDraft, Payment, PaymentDraft, Plan,
    PlanDraft, PlanStatus, Session, SystemUser,
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Cannot reach backend at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    Transport(String),

    #[error("Backend returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// Business-rule refusal; the message is meant for the user.
    #[error("{0}")]
    Rejected(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

/// PostgREST / GoTrue error body shapes.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Pull the human message out of a backend error body, if there is one.
pub(crate) fn backend_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .message
        .or(parsed.error_description)
        .or(parsed.msg)
        .filter(|m| !m.trim().is_empty())
}

impl GatewayError {
    /// Text for the inline error area next to the action that failed.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { body, status } => {
                backend_message(body).unwrap_or_else(|| format!("Request failed ({status})"))
            }
            Self::Forbidden(msg) | Self::Rejected(msg) => msg.clone(),
            Self::Database(_) => "Unexpected storage error".to_string(),
            Self::Parse(_) => "Unexpected response from the server".to_string(),
            other => other.to_string(),
        }
    }
}

/// Session issuance. Everything else about identity (password reset,
/// magic links) belongs to the provider.
pub trait IdentityProvider {
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError>;

    /// Forget the local session. Remote revocation is best effort.
    fn sign_out(&self) -> Result<(), GatewayError>;

    fn current_session(&self) -> Result<Option<Session>, GatewayError>;
}

/// Organizations, memberships, vendor staff and invites.
pub trait DirectoryGateway {
    /// Organizations the user is an explicit member of.
    fn member_organizations(&self, user_id: Uuid) -> Result<Vec<Organization>, GatewayError>;

    /// Every organization the caller may see (wider for vendor staff).
    fn visible_organizations(&self) -> Result<Vec<Organization>, GatewayError>;

    fn member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>, GatewayError>;

    fn system_user_by_email(&self, email: &str) -> Result<Option<SystemUser>, GatewayError>;

    fn list_system_users(&self) -> Result<Vec<SystemUser>, GatewayError>;

    fn add_system_user(&self, user: &NewSystemUser) -> Result<(), GatewayError>;

    fn remove_system_user(&self, user_id: Uuid) -> Result<(), GatewayError>;

    fn verify_invite(&self, token: &str) -> Result<InviteVerification, GatewayError>;

    /// Returns the organization joined. Refusals carry a machine code
    /// (`email_mismatch`, `expired_token`, ...) in `Rejected`.
    fn accept_invite(&self, token: &str) -> Result<Uuid, GatewayError>;
}

/// Clinic-side master data, scoped to one organization.
pub trait RegistryGateway {
    fn list_clinics(&self, org_id: Uuid) -> Result<Vec<Clinic>, GatewayError>;
    fn upsert_clinic(&self, org_id: Uuid, draft: &ClinicDraft) -> Result<Clinic, GatewayError>;
    fn set_clinic_active(&self, org_id: Uuid, id: Uuid, active: bool) -> Result<(), GatewayError>;
    fn count_clinic_appointments(&self, org_id: Uuid, id: Uuid) -> Result<u64, GatewayError>;
    fn delete_clinic(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError>;

    fn list_doctors(&self, org_id: Uuid) -> Result<Vec<Doctor>, GatewayError>;
    fn upsert_doctor(&self, org_id: Uuid, draft: &DoctorDraft) -> Result<(), GatewayError>;
    fn delete_doctor(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError>;

    /// Create the self-pay insurance if the organization has none.
    fn ensure_default_insurance(&self, org_id: Uuid) -> Result<(), GatewayError>;
    fn list_insurances(&self, org_id: Uuid) -> Result<Vec<Insurance>, GatewayError>;
    fn upsert_insurance(&self, org_id: Uuid, draft: &InsuranceDraft) -> Result<(), GatewayError>;
    fn delete_insurance(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError>;

    fn list_patients(&self, org_id: Uuid) -> Result<Vec<Patient>, GatewayError>;
    fn upsert_patient(&self, org_id: Uuid, draft: &PatientDraft) -> Result<(), GatewayError>;
    fn delete_patient(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError>;
}

/// Holidays and appointments.
pub trait AgendaGateway {
    /// Holidays with `from <= date <= to`.
    fn list_holidays(
        &self,
        org_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>, GatewayError>;
    fn add_holiday(&self, org_id: Uuid, date: NaiveDate, name: &str) -> Result<Holiday, GatewayError>;
    fn delete_holiday(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError>;

    /// Appointments with `start <= when_at < end`, ascending by time.
    fn list_appointments(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, GatewayError>;
    fn find_appointment(&self, org_id: Uuid, id: Uuid) -> Result<Option<Appointment>, GatewayError>;
    fn upsert_appointment(&self, write: &AppointmentWrite) -> Result<Appointment, GatewayError>;
    fn set_attendance(&self, org_id: Uuid, id: Uuid, attendance: Attendance) -> Result<(), GatewayError>;
    fn delete_appointment(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError>;

    /// Appointments for an exact patient name, newest first.
    fn patient_history(
        &self,
        org_id: Uuid,
        patient_name: &str,
        limit: u32,
    ) -> Result<Vec<Appointment>, GatewayError>;
}

/// Vendor back office: plans, clients, invoices.
pub trait BillingGateway {
    fn list_plans(&self) -> Result<Vec<Plan>, GatewayError>;
    fn create_plan(&self, draft: &PlanDraft) -> Result<Plan, GatewayError>;
    fn update_plan(&self, id: Uuid, draft: &PlanDraft) -> Result<Plan, GatewayError>;
    fn set_plan_status(&self, id: Uuid, status: PlanStatus) -> Result<(), GatewayError>;
    fn delete_plan(&self, id: Uuid) -> Result<(), GatewayError>;

    fn list_org_types(&self) -> Result<Vec<OrgType>, GatewayError>;

    fn list_clients(&self, query: Option<&str>) -> Result<Vec<Client>, GatewayError>;
    fn create_client(
        &self,
        draft: &ClientDraft,
        admin: AdminMember,
    ) -> Result<ClientCreated, GatewayError>;
    fn update_client(
        &self,
        id: Uuid,
        draft: &ClientDraft,
        status: ClientStatus,
    ) -> Result<(), GatewayError>;
    /// Flip active/inactive; returns the new status.
    fn toggle_client(&self, id: Uuid) -> Result<ClientStatus, GatewayError>;
    fn set_client_blocked(&self, id: Uuid, blocked: bool) -> Result<ClientStatus, GatewayError>;
    fn delete_client(&self, id: Uuid) -> Result<(), GatewayError>;

    /// Twelve monthly invoices for the plan, the first due at `start`.
    fn seed_plan_invoices(
        &self,
        org_id: Uuid,
        plan_id: Uuid,
        start: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, GatewayError>;
    fn create_invoice_from_plan(&self, new: &NewInvoice) -> Result<Invoice, GatewayError>;
    /// Draft to open; assigns the invoice number.
    fn open_invoice(&self, id: Uuid) -> Result<Invoice, GatewayError>;
    /// Update due date, discount and fee, then recalculate the amount.
    fn adjust_invoice(&self, id: Uuid, adjustment: &InvoiceAdjustment) -> Result<(), GatewayError>;
    fn create_payment(&self, invoice_id: Uuid, payment: &PaymentDraft) -> Result<(), GatewayError>;
    fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, GatewayError>;
    fn delete_invoice(&self, id: Uuid) -> Result<(), GatewayError>;
}

/// Everything the application needs from the backend.
pub trait Gateway:
    IdentityProvider + DirectoryGateway + RegistryGateway + AgendaGateway + BillingGateway + Send + Sync
{
}

impl<T> Gateway for T where
    T: IdentityProvider
        + DirectoryGateway
        + RegistryGateway
        + AgendaGateway
        + BillingGateway
        + Send
        + Sync
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_shows_backend_message() {
        let err = GatewayError::Http {
            status: 400,
            body: r#"{"code":"P0001","message":"plan_in_use"}"#.into(),
        };
        assert_eq!(err.user_message(), "plan_in_use");
    }

    #[test]
    fn http_error_without_json_body_is_generic() {
        let err = GatewayError::Http { status: 502, body: "<html>".into() };
        assert_eq!(err.user_message(), "Request failed (502)");
    }

    #[test]
    fn auth_error_description_is_used() {
        assert_eq!(
            backend_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            Some("Invalid login credentials".into())
        );
    }

    #[test]
    fn storage_details_are_hidden() {
        let err = GatewayError::Database(DatabaseError::ConstraintViolation("x".into()));
        assert_eq!(err.user_message(), "Unexpected storage error");
    }
}
