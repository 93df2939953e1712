//! Managed backend over HTTP: PostgREST-style tables and remote procedures
//! under `/rest/v1`, identity under `/auth/v1`.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::rows::{flatten_membership_rows, normalize_client_row, normalize_plan_row};
use super::{
    backend_message, AgendaGateway, BillingGateway, DirectoryGateway, GatewayError,
    IdentityProvider, RegistryGateway,
};
use crate::models::{
    AdminMember, Appointment, AppointmentWrite, Attendance, AuthUser, Client, ClientCreated,
    ClientDraft, ClientStatus, Clinic, ClinicDraft, Doctor, DoctorDraft, Holiday, Insurance,
    InsuranceDraft, InviteVerification, Invoice, InvoiceAdjustment, InvoiceQuery, MemberRole,
    NewInvoice, NewSystemUser, OrgType, Organization, Patient, PatientDraft, Payment,
    PaymentDraft, Plan, PlanDraft, PlanStatus, Session, SystemUser, DEFAULT_DOCTOR_COLOR,
};

const PLAN_COLUMNS: &str = "id,code,name,price_cents,currency,limits,status,created_at";
const APPOINTMENT_COLUMNS: &str =
    "id,org_id,clinic_id,doctor_id,insurance_id,patient_name,when_at,attended,status,override_reason";

pub struct RestGateway {
    base_url: String,
    anon_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    session: RwLock<Option<Session>>,
}

/// GoTrue password grant response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

#[derive(Deserialize)]
struct RoleRow {
    role: String,
}

impl RestGateway {
    pub fn new(base_url: &str, anon_key: &str, timeout_secs: u64) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client,
            timeout_secs,
            session: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn stored_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// User token when signed in, anonymous key otherwise.
    fn bearer(&self) -> String {
        self.stored_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, &format!("/rest/v1/{table}"))
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().map_err(|e| {
            if e.is_connect() {
                GatewayError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                GatewayError::Transport(format!("Request timed out after {}s", self.timeout_secs))
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "backend refused request");
        Err(status_error(status.as_u16(), body))
    }

    fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        self.send(request)?
            .json()
            .map_err(|e| GatewayError::Parse(e.to_string()))
    }

    fn execute(&self, request: RequestBuilder) -> Result<(), GatewayError> {
        self.send(request).map(|_| ())
    }

    fn rpc(&self, name: &str, args: Value) -> Result<Value, GatewayError> {
        tracing::debug!(rpc = name, "calling remote procedure");
        let response = self.send(
            self.request(Method::POST, &format!("/rest/v1/rpc/{name}"))
                .json(&args),
        )?;
        let text = response
            .text()
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    fn rpc_as<T: DeserializeOwned>(&self, name: &str, args: Value) -> Result<T, GatewayError> {
        let value = self.rpc(name, args)?;
        serde_json::from_value(value).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    /// Exact row count via `Content-Range` (`0-0/12` or `*/0`).
    fn count_rows(&self, request: RequestBuilder) -> Result<u64, GatewayError> {
        let response = self.send(
            request
                .header("Prefer", "count=exact")
                .header("Range", "0-0"),
        )?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| GatewayError::Parse("missing row count".into()))
    }

    fn first<T>(rows: Vec<T>, entity: &'static str) -> Result<T, GatewayError> {
        rows.into_iter()
            .next()
            .ok_or(GatewayError::NotFound { entity })
    }
}

/// Map a non-success status onto the error taxonomy. Refusals raised by
/// stored procedures arrive as 400/409 with a message body.
fn status_error(status: u16, body: String) -> GatewayError {
    match status {
        401 => GatewayError::NotAuthenticated,
        403 => GatewayError::Forbidden(
            backend_message(&body).unwrap_or_else(|| "Permission denied".to_string()),
        ),
        400 | 409 | 422 => match backend_message(&body) {
            Some(msg) => GatewayError::Rejected(msg),
            None => GatewayError::Http { status, body },
        },
        _ => GatewayError::Http { status, body },
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

/// Remote procedures return scalars, single objects or one-row sets.
fn single_row(value: Value) -> Value {
    match value {
        Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
        Value::Array(_) => Value::Null,
        other => other,
    }
}

fn uuid_field(value: &Value, keys: &[&str]) -> Option<Uuid> {
    if let Some(s) = value.as_str() {
        return Uuid::parse_str(s).ok();
    }
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .find_map(|s| Uuid::parse_str(s).ok())
}

fn status_from(value: Value) -> Result<ClientStatus, GatewayError> {
    single_row(value)
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GatewayError::Parse("expected a client status".into()))
}

fn none_if_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

fn client_args(draft: &ClientDraft) -> serde_json::Map<String, Value> {
    let mut args = serde_json::Map::new();
    args.insert("p_name".into(), json!(draft.name.trim()));
    args.insert("p_cpf_cnpj".into(), json!(none_if_empty(&draft.cpf_cnpj)));
    args.insert("p_phone".into(), json!(none_if_empty(&draft.phone)));
    args.insert("p_email".into(), json!(none_if_empty(&draft.email)));
    args.insert("p_cep".into(), json!(none_if_empty(&draft.cep)));
    args.insert("p_address_line1".into(), json!(none_if_empty(&draft.address_line1)));
    args.insert("p_address_line2".into(), json!(none_if_empty(&draft.address_line2)));
    args.insert("p_district".into(), json!(none_if_empty(&draft.district)));
    args.insert("p_city".into(), json!(none_if_empty(&draft.city)));
    args.insert("p_state".into(), json!(none_if_empty(&draft.state)));
    args.insert("p_plan_id".into(), json!(draft.plan_id));
    args.insert("p_type_id".into(), json!(draft.type_id));
    args
}

impl IdentityProvider for RestGateway {
    fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let request = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }));

        // Bad credentials come back as 400 invalid_grant, i.e. `Rejected`.
        let token: TokenResponse = self.fetch(request)?;

        let session = Session {
            access_token: token.access_token,
            user: token.user,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        };
        tracing::info!(user_id = %session.user.id, "signed in");
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    fn sign_out(&self) -> Result<(), GatewayError> {
        if self.stored_session().is_some() {
            if let Err(e) = self.execute(self.request(Method::POST, "/auth/v1/logout")) {
                tracing::warn!(error = %e, "remote sign-out failed; clearing local session");
            }
        }
        self.store_session(None);
        Ok(())
    }

    fn current_session(&self) -> Result<Option<Session>, GatewayError> {
        let Some(mut session) = self.stored_session() else {
            return Ok(None);
        };
        match self.fetch::<AuthUser>(self.request(Method::GET, "/auth/v1/user")) {
            Ok(user) => {
                session.user = user;
                self.store_session(Some(session.clone()));
                Ok(Some(session))
            }
            Err(GatewayError::NotAuthenticated) => {
                self.store_session(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl DirectoryGateway for RestGateway {
    fn member_organizations(&self, user_id: Uuid) -> Result<Vec<Organization>, GatewayError> {
        let rows: Vec<Value> = self.fetch(self.table(Method::GET, "org_members").query(&[
            ("select", "org:organizations(id,name,created_at)".to_string()),
            ("user_id", eq(user_id)),
        ]))?;
        Ok(flatten_membership_rows(&rows))
    }

    fn visible_organizations(&self) -> Result<Vec<Organization>, GatewayError> {
        self.fetch(self.table(Method::GET, "organizations").query(&[
            ("select", "id,name,created_at"),
            ("order", "created_at.asc"),
        ]))
    }

    fn member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>, GatewayError> {
        let rows: Vec<RoleRow> = self.fetch(self.table(Method::GET, "org_members").query(&[
            ("select", "role".to_string()),
            ("org_id", eq(org_id)),
            ("user_id", eq(user_id)),
        ]))?;
        Ok(rows.into_iter().next().and_then(|r| r.role.parse().ok()))
    }

    fn system_user_by_email(&self, email: &str) -> Result<Option<SystemUser>, GatewayError> {
        let rows: Vec<SystemUser> = self.fetch(self.table(Method::GET, "system_users").query(&[
            ("select", "*".to_string()),
            ("email", eq(email)),
            ("limit", "1".to_string()),
        ]))?;
        Ok(rows.into_iter().next())
    }

    fn list_system_users(&self) -> Result<Vec<SystemUser>, GatewayError> {
        self.fetch(
            self.table(Method::GET, "system_users")
                .query(&[("select", "*"), ("order", "created_at.asc")]),
        )
    }

    fn add_system_user(&self, user: &NewSystemUser) -> Result<(), GatewayError> {
        self.rpc(
            "admin_add_system_user",
            json!({ "p_email": user.email.trim(), "p_role": user.role, "p_active": user.active }),
        )
        .map(|_| ())
    }

    fn remove_system_user(&self, user_id: Uuid) -> Result<(), GatewayError> {
        self.rpc("admin_remove_system_user", json!({ "p_user_id": user_id }))
            .map(|_| ())
    }

    fn verify_invite(&self, token: &str) -> Result<InviteVerification, GatewayError> {
        let row = single_row(self.rpc("invite_verify", json!({ "p_token": token }))?);
        if row.is_null() {
            return Ok(InviteVerification::default());
        }
        serde_json::from_value(row).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    fn accept_invite(&self, token: &str) -> Result<Uuid, GatewayError> {
        let value = single_row(self.rpc("accept_invite", json!({ "p_token": token }))?);
        uuid_field(&value, &["org_id", "id"])
            .ok_or_else(|| GatewayError::Parse("accept_invite returned no organization".into()))
    }
}

impl RegistryGateway for RestGateway {
    fn list_clinics(&self, org_id: Uuid) -> Result<Vec<Clinic>, GatewayError> {
        self.fetch(self.table(Method::GET, "clinics").query(&[
            ("select", "id,org_id,name,is_active,created_at".to_string()),
            ("org_id", eq(org_id)),
            ("order", "created_at.asc".to_string()),
        ]))
    }

    fn upsert_clinic(&self, org_id: Uuid, draft: &ClinicDraft) -> Result<Clinic, GatewayError> {
        let body = json!({
            "id": draft.id.unwrap_or_else(Uuid::new_v4),
            "org_id": org_id,
            "name": draft.name.trim(),
            "is_active": draft.is_active,
        });
        let rows: Vec<Clinic> = self.fetch(
            self.table(Method::POST, "clinics")
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates,return=representation")
                .json(&body),
        )?;
        Self::first(rows, "clinic")
    }

    fn set_clinic_active(&self, org_id: Uuid, id: Uuid, active: bool) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::PATCH, "clinics")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))])
                .json(&json!({ "is_active": active })),
        )
    }

    fn count_clinic_appointments(&self, org_id: Uuid, id: Uuid) -> Result<u64, GatewayError> {
        self.count_rows(self.table(Method::GET, "appointments").query(&[
            ("select", "id".to_string()),
            ("org_id", eq(org_id)),
            ("clinic_id", eq(id)),
        ]))
    }

    fn delete_clinic(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::DELETE, "clinics")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))]),
        )
    }

    fn list_doctors(&self, org_id: Uuid) -> Result<Vec<Doctor>, GatewayError> {
        self.rpc_as("app_doctors_list", json!({ "p_org_id": org_id }))
    }

    fn upsert_doctor(&self, org_id: Uuid, draft: &DoctorDraft) -> Result<(), GatewayError> {
        let color = draft
            .color
            .as_deref()
            .and_then(none_if_empty)
            .unwrap_or(DEFAULT_DOCTOR_COLOR);
        self.rpc(
            "app_doctor_upsert",
            json!({
                "p_org_id": org_id,
                "p_id": draft.id,
                "p_name": draft.name.trim(),
                "p_specialty": draft.specialty.as_deref().and_then(none_if_empty),
                "p_color": color,
                "p_is_active": true,
            }),
        )
        .map(|_| ())
    }

    fn delete_doctor(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        self.rpc("app_doctor_delete", json!({ "p_org_id": org_id, "p_id": id }))
            .map(|_| ())
    }

    fn ensure_default_insurance(&self, org_id: Uuid) -> Result<(), GatewayError> {
        self.rpc("app_insurance_ensure_default", json!({ "p_org_id": org_id }))
            .map(|_| ())
    }

    fn list_insurances(&self, org_id: Uuid) -> Result<Vec<Insurance>, GatewayError> {
        self.rpc_as("app_insurances_list", json!({ "p_org_id": org_id }))
    }

    fn upsert_insurance(&self, org_id: Uuid, draft: &InsuranceDraft) -> Result<(), GatewayError> {
        self.rpc(
            "app_insurance_upsert",
            json!({
                "p_org_id": org_id,
                "p_id": draft.id,
                "p_name": draft.name.trim(),
                "p_min_days": draft.min_days_between,
                "p_max_days": draft.max_days_between,
                "p_is_default": draft.is_default,
                "p_is_active": draft.is_active,
            }),
        )
        .map(|_| ())
    }

    fn delete_insurance(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::DELETE, "insurances")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))]),
        )
    }

    fn list_patients(&self, org_id: Uuid) -> Result<Vec<Patient>, GatewayError> {
        self.fetch(self.table(Method::GET, "patients").query(&[
            ("select", "id,org_id,name,cpf,phone".to_string()),
            ("org_id", eq(org_id)),
            ("order", "name.asc".to_string()),
        ]))
    }

    fn upsert_patient(&self, org_id: Uuid, draft: &PatientDraft) -> Result<(), GatewayError> {
        let fields = json!({
            "name": draft.name.trim(),
            "cpf": draft.cpf.as_deref().and_then(none_if_empty),
            "phone": draft.phone.as_deref().and_then(none_if_empty),
        });
        match draft.id {
            Some(id) => self.execute(
                self.table(Method::PATCH, "patients")
                    .query(&[("org_id", eq(org_id)), ("id", eq(id))])
                    .json(&fields),
            ),
            None => {
                let mut body = fields;
                body["org_id"] = json!(org_id);
                self.execute(self.table(Method::POST, "patients").json(&body))
            }
        }
    }

    fn delete_patient(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::DELETE, "patients")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))]),
        )
    }
}

impl AgendaGateway for RestGateway {
    fn list_holidays(
        &self,
        org_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>, GatewayError> {
        self.fetch(self.table(Method::GET, "holidays").query(&[
            ("select", "id,org_id,date,name".to_string()),
            ("org_id", eq(org_id)),
            ("date", format!("gte.{from}")),
            ("date", format!("lte.{to}")),
            ("order", "date.asc".to_string()),
        ]))
    }

    fn add_holiday(&self, org_id: Uuid, date: NaiveDate, name: &str) -> Result<Holiday, GatewayError> {
        let rows: Vec<Holiday> = self.fetch(
            self.table(Method::POST, "holidays")
                .header("Prefer", "return=representation")
                .json(&json!({ "org_id": org_id, "date": date, "name": name.trim() })),
        )?;
        Self::first(rows, "holiday")
    }

    fn delete_holiday(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::DELETE, "holidays")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))]),
        )
    }

    fn list_appointments(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, GatewayError> {
        self.fetch(self.table(Method::GET, "appointments").query(&[
            ("select", APPOINTMENT_COLUMNS.to_string()),
            ("org_id", eq(org_id)),
            ("when_at", format!("gte.{}", start.to_rfc3339())),
            ("when_at", format!("lt.{}", end.to_rfc3339())),
            ("order", "when_at.asc".to_string()),
        ]))
    }

    fn find_appointment(&self, org_id: Uuid, id: Uuid) -> Result<Option<Appointment>, GatewayError> {
        let rows: Vec<Appointment> = self.fetch(self.table(Method::GET, "appointments").query(&[
            ("select", APPOINTMENT_COLUMNS.to_string()),
            ("org_id", eq(org_id)),
            ("id", eq(id)),
            ("limit", "1".to_string()),
        ]))?;
        Ok(rows.into_iter().next())
    }

    fn upsert_appointment(&self, write: &AppointmentWrite) -> Result<Appointment, GatewayError> {
        let rows: Vec<Appointment> = self.fetch(
            self.table(Method::POST, "appointments")
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates,return=representation")
                .json(write),
        )?;
        Self::first(rows, "appointment")
    }

    fn set_attendance(&self, org_id: Uuid, id: Uuid, attendance: Attendance) -> Result<(), GatewayError> {
        let attended: Option<bool> = attendance.into();
        self.execute(
            self.table(Method::PATCH, "appointments")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))])
                .json(&json!({ "attended": attended })),
        )
    }

    fn delete_appointment(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::DELETE, "appointments")
                .query(&[("org_id", eq(org_id)), ("id", eq(id))]),
        )
    }

    fn patient_history(
        &self,
        org_id: Uuid,
        patient_name: &str,
        limit: u32,
    ) -> Result<Vec<Appointment>, GatewayError> {
        self.fetch(self.table(Method::GET, "appointments").query(&[
            ("select", APPOINTMENT_COLUMNS.to_string()),
            ("org_id", eq(org_id)),
            ("patient_name", eq(patient_name)),
            ("order", "when_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]))
    }
}

impl BillingGateway for RestGateway {
    fn list_plans(&self) -> Result<Vec<Plan>, GatewayError> {
        let rows: Vec<Value> = self.fetch(
            self.table(Method::GET, "plans")
                .query(&[("select", PLAN_COLUMNS), ("order", "price_cents.asc")]),
        )?;
        rows.iter().map(normalize_plan_row).collect()
    }

    fn create_plan(&self, draft: &PlanDraft) -> Result<Plan, GatewayError> {
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        self.execute(self.table(Method::POST, "plans").json(&json!({
            "id": id,
            "code": draft.code.trim(),
            "name": draft.name.trim(),
            "price_cents": draft.price_cents,
            "currency": crate::models::plan::DEFAULT_CURRENCY,
            "limits": draft.limits,
            "status": PlanStatus::Active,
        })))?;
        let rows: Vec<Value> = self.fetch(
            self.table(Method::GET, "plans")
                .query(&[("select", PLAN_COLUMNS.to_string()), ("id", eq(id))]),
        )?;
        normalize_plan_row(&Self::first(rows, "plan")?)
    }

    fn update_plan(&self, id: Uuid, draft: &PlanDraft) -> Result<Plan, GatewayError> {
        let rows: Vec<Value> = self.fetch(
            self.table(Method::PATCH, "plans")
                .query(&[("id", eq(id)), ("select", PLAN_COLUMNS.to_string())])
                .header("Prefer", "return=representation")
                .json(&json!({
                    "code": draft.code.trim(),
                    "name": draft.name.trim(),
                    "price_cents": draft.price_cents,
                    "limits": draft.limits,
                })),
        )?;
        // Row-level security filters silently: no row back means no write.
        let row = rows.into_iter().next().ok_or_else(|| {
            GatewayError::Rejected("Could not save (no row affected). Check permissions.".into())
        })?;
        normalize_plan_row(&row)
    }

    fn set_plan_status(&self, id: Uuid, status: PlanStatus) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::PATCH, "plans")
                .query(&[("id", eq(id))])
                .json(&json!({ "status": status })),
        )
    }

    fn delete_plan(&self, id: Uuid) -> Result<(), GatewayError> {
        self.execute(self.table(Method::DELETE, "plans").query(&[("id", eq(id))]))
    }

    fn list_org_types(&self) -> Result<Vec<OrgType>, GatewayError> {
        self.fetch(
            self.table(Method::GET, "org_types")
                .query(&[("select", "id,key,name,status"), ("order", "name.asc")]),
        )
    }

    fn list_clients(&self, query: Option<&str>) -> Result<Vec<Client>, GatewayError> {
        let args = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => json!({ "p_q": q }),
            None => json!({}),
        };
        let rows = match self.rpc("admin_clients_list", args)? {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        rows.iter().map(normalize_client_row).collect()
    }

    fn create_client(
        &self,
        draft: &ClientDraft,
        admin: AdminMember,
    ) -> Result<ClientCreated, GatewayError> {
        let mut args = client_args(draft);
        args.insert("p_member_email".into(), json!(none_if_empty(&draft.email)));
        args.insert("p_member_role".into(), json!(admin.effective_role()));
        args.insert("p_invite".into(), json!(admin.invite));
        let value = single_row(self.rpc("admin_clients_create", Value::Object(args))?);

        let org_id = uuid_field(&value, &["org_id", "id"])
            .ok_or_else(|| GatewayError::Parse("admin_clients_create returned no id".into()))?;
        let invite_token = ["invite_token", "token"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::to_string);
        Ok(ClientCreated { org_id, invite_token })
    }

    fn update_client(
        &self,
        id: Uuid,
        draft: &ClientDraft,
        status: ClientStatus,
    ) -> Result<(), GatewayError> {
        let mut args = client_args(draft);
        args.insert("p_org_id".into(), json!(id));
        args.insert("p_status".into(), json!(status));
        self.rpc("admin_clients_update", Value::Object(args)).map(|_| ())
    }

    fn toggle_client(&self, id: Uuid) -> Result<ClientStatus, GatewayError> {
        status_from(self.rpc("admin_clients_toggle", json!({ "p_org_id": id }))?)
    }

    fn set_client_blocked(&self, id: Uuid, blocked: bool) -> Result<ClientStatus, GatewayError> {
        let name = if blocked {
            "admin_clients_block"
        } else {
            "admin_clients_unblock"
        };
        status_from(self.rpc(name, json!({ "p_org_id": id }))?)
    }

    fn delete_client(&self, id: Uuid) -> Result<(), GatewayError> {
        match self.rpc("admin_clients_delete", json!({ "p_org_id": id }))? {
            Value::Bool(false) => Err(GatewayError::Rejected("Client was not deleted".into())),
            _ => Ok(()),
        }
    }

    fn seed_plan_invoices(
        &self,
        org_id: Uuid,
        plan_id: Uuid,
        start: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        self.rpc(
            "admin_invoices_seed_plan_12",
            json!({ "p_org_id": org_id, "p_plan_id": plan_id, "p_start_date": start.to_rfc3339() }),
        )
        .map(|_| ())
    }

    fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, GatewayError> {
        let q = query.q.as_deref().and_then(none_if_empty);
        self.rpc_as(
            "admin_invoices_list",
            json!({ "p_q": q, "p_status": query.status, "p_org_id": query.org_id }),
        )
    }

    fn create_invoice_from_plan(&self, new: &NewInvoice) -> Result<Invoice, GatewayError> {
        let row = single_row(self.rpc(
            "admin_invoice_create_from_plan",
            json!({
                "p_org_id": new.org_id,
                "p_plan_id": new.plan_id,
                "p_due_at": new.due_at.map(|d| d.to_rfc3339()),
                "p_discount_cents": new.discount_cents,
                "p_fee_cents": new.fee_cents,
            }),
        )?);
        serde_json::from_value(row).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    fn open_invoice(&self, id: Uuid) -> Result<Invoice, GatewayError> {
        let row = single_row(self.rpc("admin_invoice_open", json!({ "p_invoice_id": id }))?);
        serde_json::from_value(row).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    fn adjust_invoice(&self, id: Uuid, adjustment: &InvoiceAdjustment) -> Result<(), GatewayError> {
        self.execute(
            self.table(Method::PATCH, "invoices")
                .query(&[("id", eq(id))])
                .json(&json!({
                    "due_at": adjustment.due_at.map(|d| d.to_rfc3339()),
                    "discount_cents": adjustment.discount_cents,
                    "fee_cents": adjustment.fee_cents,
                })),
        )?;
        self.rpc("invoice_recalc", json!({ "p_invoice_id": id }))
            .map(|_| ())
    }

    fn create_payment(&self, invoice_id: Uuid, payment: &PaymentDraft) -> Result<(), GatewayError> {
        self.rpc(
            "admin_payment_create",
            json!({
                "p_invoice_id": invoice_id,
                "p_amount_cents": payment.amount_cents,
                "p_method": payment.method,
                "p_reference": payment.reference.as_deref().and_then(none_if_empty),
            }),
        )
        .map(|_| ())
    }

    fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, GatewayError> {
        self.fetch(self.table(Method::GET, "payments").query(&[
            ("select", "id,invoice_id,amount_cents,method,reference,created_at".to_string()),
            ("invoice_id", eq(invoice_id)),
            ("order", "created_at.asc".to_string()),
        ]))
    }

    fn delete_invoice(&self, id: Uuid) -> Result<(), GatewayError> {
        self.execute(self.table(Method::DELETE, "invoices").query(&[("id", eq(id))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let gw = RestGateway::new("https://backend.test/", "anon", 5).unwrap();
        assert_eq!(gw.base_url(), "https://backend.test");
    }

    #[test]
    fn bearer_is_anon_key_without_session() {
        let gw = RestGateway::new("https://backend.test", "anon", 5).unwrap();
        assert_eq!(gw.bearer(), "anon");
        gw.store_session(Some(Session {
            access_token: "user-token".into(),
            user: AuthUser { id: Uuid::new_v4(), email: None },
            expires_at: None,
        }));
        assert_eq!(gw.bearer(), "user-token");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(status_error(401, String::new()), GatewayError::NotAuthenticated));
        assert!(matches!(
            status_error(403, r#"{"message":"permission denied for table plans"}"#.into()),
            GatewayError::Forbidden(m) if m.contains("permission denied")
        ));
        assert!(matches!(
            status_error(400, r#"{"message":"email_mismatch"}"#.into()),
            GatewayError::Rejected(m) if m == "email_mismatch"
        ));
        assert!(matches!(
            status_error(500, "boom".into()),
            GatewayError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn single_row_unwraps_sets() {
        assert_eq!(single_row(json!([{"a": 1}, {"a": 2}])), json!({"a": 1}));
        assert_eq!(single_row(json!([])), Value::Null);
        assert_eq!(single_row(json!("active")), json!("active"));
    }

    #[test]
    fn uuid_from_scalar_or_object() {
        let id = Uuid::new_v4();
        assert_eq!(uuid_field(&json!(id.to_string()), &["org_id"]), Some(id));
        assert_eq!(uuid_field(&json!({"id": id.to_string()}), &["org_id", "id"]), Some(id));
        assert_eq!(uuid_field(&json!({}), &["org_id"]), None);
    }

    #[test]
    fn unreachable_backend_is_a_connection_error() {
        let gw = RestGateway::new("http://127.0.0.1:1", "anon", 2).unwrap();
        let err = gw.list_plans().unwrap_err();
        assert!(matches!(err, GatewayError::Connection(_) | GatewayError::Transport(_)));
    }
}
