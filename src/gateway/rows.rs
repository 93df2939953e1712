//! Row normalisation at the gateway boundary.
//!
//! Remote procedures do not agree on column naming: the same field can
//! arrive snake_case, camelCase or under a legacy name. Each entity gets one
//! function that maps whatever arrived onto the canonical record.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::GatewayError;
use crate::models::{Client, ClientStatus, Organization, Plan, PlanLimits, PlanStatus};
use crate::models::plan::DEFAULT_CURRENCY;

/// First key present with a non-null value.
fn pick<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| row.get(*k)).find(|v| !v.is_null())
}

fn text(row: &Value, keys: &[&str]) -> String {
    match pick(row, keys) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn uuid(row: &Value, keys: &[&str]) -> Option<Uuid> {
    pick(row, keys)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn timestamp(row: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    pick(row, keys)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn count(row: &Value, keys: &[&str]) -> u32 {
    pick(row, keys)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn required_id(row: &Value, entity: &str) -> Result<Uuid, GatewayError> {
    uuid(row, &["id"]).ok_or_else(|| GatewayError::Parse(format!("{entity} row without a valid id")))
}

pub fn normalize_client_row(row: &Value) -> Result<Client, GatewayError> {
    Ok(Client {
        id: required_id(row, "client")?,
        name: text(row, &["name"]),
        cpf_cnpj: text(row, &["cpf_cnpj", "cpfCnpj"]),
        phone: text(row, &["phone"]),
        email: text(row, &["email"]),
        cep: text(row, &["cep", "zip", "postal_code"]),
        address_line1: text(row, &["address_line1", "address1", "address"]),
        address_line2: text(row, &["address_line2", "address2"]),
        district: text(row, &["district", "bairro"]),
        city: text(row, &["city"]),
        state: text(row, &["state", "uf"]),
        plan_id: uuid(row, &["plan_id", "planId"]),
        plan_name: text(row, &["plan_name", "planName"]),
        type_id: uuid(row, &["type_id", "typeId"]),
        type_key: text(row, &["type_key", "typeKey"]),
        type_name: text(row, &["type_name", "typeName"]),
        status: text(row, &["status"]).parse().unwrap_or(ClientStatus::Inactive),
        has_appointments: pick(row, &["has_appointments", "hasAppointments"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
        created_at: timestamp(row, &["created_at", "createdAt"]),
    })
}

/// Limits come either as a `limits` object or as flat `*_limit` columns.
pub fn normalize_plan_row(row: &Value) -> Result<Plan, GatewayError> {
    let limits = row.get("limits").filter(|v| v.is_object());
    let limit = |nested: &str, flat: &str| {
        limits
            .and_then(|l| pick(l, &[nested]))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or_else(|| count(row, &[flat]))
    };
    let currency = text(row, &["currency"]);
    Ok(Plan {
        id: required_id(row, "plan")?,
        code: text(row, &["code"]),
        name: text(row, &["name"]),
        price_cents: pick(row, &["price_cents", "priceCents"])
            .and_then(Value::as_i64)
            .unwrap_or(0),
        currency: if currency.is_empty() {
            DEFAULT_CURRENCY.to_string()
        } else {
            currency
        },
        limits: PlanLimits {
            clinics: limit("clinics", "clinics_limit"),
            users: limit("users", "users_limit"),
            doctors: limit("doctors", "doctors_limit"),
        },
        status: text(row, &["status"]).parse().unwrap_or(PlanStatus::Inactive),
        created_at: timestamp(row, &["created_at", "createdAt"]),
    })
}

/// Membership join rows carry the organization under `org`, either as an
/// object or as a one-element array. Rows without id or name are skipped
/// and duplicates are dropped keeping the first.
pub fn flatten_membership_rows(rows: &[Value]) -> Vec<Organization> {
    let mut out: Vec<Organization> = Vec::new();
    let embedded = rows.iter().flat_map(|row| match row.get("org") {
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    });
    for org in embedded {
        let (Some(id), name) = (uuid(org, &["id"]), text(org, &["name"])) else {
            continue;
        };
        if name.is_empty() || out.iter().any(|o| o.id == id) {
            continue;
        }
        out.push(Organization {
            id,
            name,
            created_at: timestamp(org, &["created_at", "createdAt"]),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "6f1c1c2e-3b1a-4a8e-9a51-0c0f1d3e5b7a";
    const PLAN: &str = "7f1c1c2e-3b1a-4a8e-9a51-0c0f1d3e5b7a";

    #[test]
    fn client_row_snake_case() {
        let row = json!({
            "id": ID, "name": "Clinic X", "cpf_cnpj": "11222333000181",
            "cep": "01310100", "address_line1": "Av. Paulista", "state": "SP",
            "plan_id": PLAN, "status": "active", "has_appointments": true,
            "created_at": "2025-01-02T03:04:05+00:00"
        });
        let c = normalize_client_row(&row).unwrap();
        assert_eq!(c.cpf_cnpj, "11222333000181");
        assert_eq!(c.address_line1, "Av. Paulista");
        assert_eq!(c.plan_id, Some(Uuid::parse_str(PLAN).unwrap()));
        assert_eq!(c.status, ClientStatus::Active);
        assert!(c.has_appointments);
        assert!(c.created_at.is_some());
    }

    #[test]
    fn client_row_camel_case_and_legacy_names() {
        let row = json!({
            "id": ID, "name": "Clinic X", "cpfCnpj": "52998224725",
            "zip": "01310-100", "address": "Rua A", "bairro": "Centro", "uf": "RJ",
            "planId": PLAN, "hasAppointments": false, "createdAt": "2025-01-02T03:04:05Z"
        });
        let c = normalize_client_row(&row).unwrap();
        assert_eq!(c.cpf_cnpj, "52998224725");
        assert_eq!(c.cep, "01310-100");
        assert_eq!(c.address_line1, "Rua A");
        assert_eq!(c.district, "Centro");
        assert_eq!(c.state, "RJ");
        assert_eq!(c.status, ClientStatus::Inactive);
        assert!(c.created_at.is_some());
    }

    #[test]
    fn client_row_without_id_is_a_parse_error() {
        assert!(matches!(
            normalize_client_row(&json!({"name": "x"})),
            Err(GatewayError::Parse(_))
        ));
    }

    #[test]
    fn plan_limits_nested_or_flat() {
        let nested = json!({
            "id": ID, "code": "pro", "name": "Pro", "price_cents": 19900,
            "limits": {"clinics": 3, "users": 10, "doctors": 8}, "status": "active"
        });
        let p = normalize_plan_row(&nested).unwrap();
        assert_eq!(p.limits, PlanLimits { clinics: 3, users: 10, doctors: 8 });
        assert_eq!(p.currency, "BRL");

        let flat = json!({
            "id": ID, "code": "pro", "name": "Pro", "priceCents": 100,
            "clinics_limit": 1, "users_limit": 2, "doctors_limit": 3
        });
        let p = normalize_plan_row(&flat).unwrap();
        assert_eq!(p.limits, PlanLimits { clinics: 1, users: 2, doctors: 3 });
        assert_eq!(p.price_cents, 100);
        assert_eq!(p.status, PlanStatus::Inactive);
    }

    #[test]
    fn membership_rows_flatten_and_dedupe() {
        let other = "8f1c1c2e-3b1a-4a8e-9a51-0c0f1d3e5b7a";
        let rows = vec![
            json!({"org": {"id": ID, "name": "Clinic X", "created_at": "2025-01-01T00:00:00Z"}}),
            json!({"org": [{"id": ID, "name": "Clinic X"}, {"id": other, "name": "Clinic Y"}]}),
            json!({"org": null}),
            json!({"org": {"id": "not-a-uuid", "name": "Broken"}}),
        ];
        let orgs = flatten_membership_rows(&rows);
        let names: Vec<_> = orgs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Clinic X", "Clinic Y"]);
        assert!(orgs[0].created_at.is_some());
        assert!(orgs[1].created_at.is_none());
    }
}
