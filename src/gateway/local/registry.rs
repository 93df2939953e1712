use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{col_opt_ts, col_uuid, collect, ts, LocalGateway, Need};
use crate::gateway::{GatewayError, RegistryGateway};
use crate::models::{
    Clinic, ClinicDraft, Doctor, DoctorDraft, Insurance, InsuranceDraft, Patient, PatientDraft,
    DEFAULT_DOCTOR_COLOR, SELF_PAY_INSURANCE,
};

fn none_if_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required_name(name: &str) -> Result<&str, GatewayError> {
    let name = name.trim();
    if name.is_empty() {
        Err(GatewayError::Rejected("Name is required".into()))
    } else {
        Ok(name)
    }
}

/// Where an id given on upsert lives.
enum Existing {
    Absent,
    InOrg,
}

/// Rows of another organization are reported as missing.
fn locate(
    conn: &Connection,
    table: &'static str,
    entity: &'static str,
    org_id: Uuid,
    id: Uuid,
) -> Result<Existing, GatewayError> {
    let owner: Option<String> = conn
        .query_row(
            &format!("SELECT org_id FROM {table} WHERE id = ?1"),
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        None => Ok(Existing::Absent),
        Some(o) if o == org_id.to_string() => Ok(Existing::InOrg),
        Some(_) => Err(GatewayError::NotFound { entity }),
    }
}

fn delete_scoped(
    conn: &Connection,
    table: &'static str,
    entity: &'static str,
    org_id: Uuid,
    id: Uuid,
) -> Result<(), GatewayError> {
    let removed = conn.execute(
        &format!("DELETE FROM {table} WHERE org_id = ?1 AND id = ?2"),
        params![org_id.to_string(), id.to_string()],
    )?;
    if removed == 0 {
        return Err(GatewayError::NotFound { entity });
    }
    tracing::info!(org_id = %org_id, id = %id, entity, "deleted");
    Ok(())
}

fn appointment_refs(conn: &Connection, column: &str, org_id: Uuid, id: Uuid) -> Result<u64, GatewayError> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM appointments WHERE org_id = ?1 AND {column} = ?2"),
        params![org_id.to_string(), id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

fn clinic_from_row(row: &Row<'_>) -> rusqlite::Result<Clinic> {
    Ok(Clinic {
        id: col_uuid(row, 0)?,
        org_id: Some(col_uuid(row, 1)?),
        name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: col_opt_ts(row, 4)?,
    })
}

fn doctor_from_row(row: &Row<'_>) -> rusqlite::Result<Doctor> {
    Ok(Doctor {
        id: col_uuid(row, 0)?,
        org_id: Some(col_uuid(row, 1)?),
        name: row.get(2)?,
        specialty: row.get(3)?,
        color: row.get(4)?,
    })
}

fn insurance_from_row(row: &Row<'_>) -> rusqlite::Result<Insurance> {
    Ok(Insurance {
        id: col_uuid(row, 0)?,
        org_id: Some(col_uuid(row, 1)?),
        name: row.get(2)?,
        is_default: row.get(3)?,
        is_active: row.get(4)?,
        min_days_between: row.get(5)?,
        max_days_between: row.get(6)?,
    })
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: col_uuid(row, 0)?,
        org_id: Some(col_uuid(row, 1)?),
        name: row.get(2)?,
        cpf: row.get(3)?,
        phone: row.get(4)?,
    })
}

impl RegistryGateway for LocalGateway {
    fn list_clinics(&self, org_id: Uuid) -> Result<Vec<Clinic>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(
            "SELECT id, org_id, name, is_active, created_at FROM clinics
             WHERE org_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([org_id.to_string()], clinic_from_row)?;
        collect(rows)
    }

    fn upsert_clinic(&self, org_id: Uuid, draft: &ClinicDraft) -> Result<Clinic, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        let name = required_name(&draft.name)?;
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        match locate(&conn, "clinics", "clinic", org_id, id)? {
            Existing::InOrg => {
                conn.execute(
                    "UPDATE clinics SET name = ?1, is_active = ?2 WHERE id = ?3",
                    params![name, draft.is_active, id.to_string()],
                )?;
            }
            Existing::Absent => {
                conn.execute(
                    "INSERT INTO clinics (id, org_id, name, is_active, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id.to_string(), org_id.to_string(), name, draft.is_active, ts(Utc::now())],
                )?;
            }
        }
        tracing::info!(org_id = %org_id, clinic_id = %id, "clinic saved");
        Ok(conn.query_row(
            "SELECT id, org_id, name, is_active, created_at FROM clinics WHERE id = ?1",
            [id.to_string()],
            clinic_from_row,
        )?)
    }

    fn set_clinic_active(&self, org_id: Uuid, id: Uuid, active: bool) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        let changed = conn.execute(
            "UPDATE clinics SET is_active = ?1 WHERE org_id = ?2 AND id = ?3",
            params![active, org_id.to_string(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound { entity: "clinic" });
        }
        Ok(())
    }

    fn count_clinic_appointments(&self, org_id: Uuid, id: Uuid) -> Result<u64, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        appointment_refs(&conn, "clinic_id", org_id, id)
    }

    fn delete_clinic(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        let refs = appointment_refs(&conn, "clinic_id", org_id, id)?;
        if refs > 0 {
            return Err(GatewayError::Rejected(format!(
                "Clinic has {refs} appointment(s) and cannot be deleted"
            )));
        }
        delete_scoped(&conn, "clinics", "clinic", org_id, id)
    }

    fn list_doctors(&self, org_id: Uuid) -> Result<Vec<Doctor>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(
            "SELECT id, org_id, name, specialty, color FROM doctors
             WHERE org_id = ?1 ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([org_id.to_string()], doctor_from_row)?;
        collect(rows)
    }

    fn upsert_doctor(&self, org_id: Uuid, draft: &DoctorDraft) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        let name = required_name(&draft.name)?;
        let specialty = none_if_empty(draft.specialty.as_deref());
        let color = none_if_empty(draft.color.as_deref()).unwrap_or(DEFAULT_DOCTOR_COLOR);
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        match locate(&conn, "doctors", "doctor", org_id, id)? {
            Existing::InOrg => {
                conn.execute(
                    "UPDATE doctors SET name = ?1, specialty = ?2, color = ?3 WHERE id = ?4",
                    params![name, specialty, color, id.to_string()],
                )?;
            }
            Existing::Absent => {
                conn.execute(
                    "INSERT INTO doctors (id, org_id, name, specialty, color, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id.to_string(), org_id.to_string(), name, specialty, color, ts(Utc::now())],
                )?;
            }
        }
        tracing::info!(org_id = %org_id, doctor_id = %id, "doctor saved");
        Ok(())
    }

    fn delete_doctor(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        if appointment_refs(&conn, "doctor_id", org_id, id)? > 0 {
            return Err(GatewayError::Rejected(
                "Doctor has appointments and cannot be deleted".into(),
            ));
        }
        delete_scoped(&conn, "doctors", "doctor", org_id, id)
    }

    fn ensure_default_insurance(&self, org_id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM insurances WHERE org_id = ?1 AND (is_default = 1 OR name = ?2)",
            params![org_id.to_string(), SELF_PAY_INSURANCE],
            |row| row.get(0),
        )?;
        if existing == 0 {
            conn.execute(
                "INSERT INTO insurances (id, org_id, name, is_default, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![Uuid::new_v4().to_string(), org_id.to_string(), SELF_PAY_INSURANCE, ts(Utc::now())],
            )?;
            tracing::info!(org_id = %org_id, "default insurance created");
        }
        Ok(())
    }

    fn list_insurances(&self, org_id: Uuid) -> Result<Vec<Insurance>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(
            "SELECT id, org_id, name, is_default, is_active, min_days_between, max_days_between
             FROM insurances WHERE org_id = ?1 ORDER BY is_default DESC, name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([org_id.to_string()], insurance_from_row)?;
        collect(rows)
    }

    fn upsert_insurance(&self, org_id: Uuid, draft: &InsuranceDraft) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        let name = required_name(&draft.name)?;
        if draft.min_days_between < 0 || draft.max_days_between < 0 {
            return Err(GatewayError::Rejected("Day limits cannot be negative".into()));
        }
        if draft.max_days_between > 0 && draft.min_days_between > draft.max_days_between {
            return Err(GatewayError::Rejected(
                "Minimum days cannot exceed maximum days".into(),
            ));
        }
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let existing = locate(&conn, "insurances", "insurance", org_id, id)?;

        let tx = conn.unchecked_transaction()?;
        if draft.is_default {
            tx.execute(
                "UPDATE insurances SET is_default = 0 WHERE org_id = ?1 AND id <> ?2",
                params![org_id.to_string(), id.to_string()],
            )?;
        }
        match existing {
            Existing::InOrg => {
                tx.execute(
                    "UPDATE insurances SET name = ?1, is_default = ?2, is_active = ?3,
                     min_days_between = ?4, max_days_between = ?5 WHERE id = ?6",
                    params![
                        name,
                        draft.is_default,
                        draft.is_active,
                        draft.min_days_between,
                        draft.max_days_between,
                        id.to_string()
                    ],
                )?;
            }
            Existing::Absent => {
                tx.execute(
                    "INSERT INTO insurances
                     (id, org_id, name, is_default, is_active, min_days_between, max_days_between, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        id.to_string(),
                        org_id.to_string(),
                        name,
                        draft.is_default,
                        draft.is_active,
                        draft.min_days_between,
                        draft.max_days_between,
                        ts(Utc::now())
                    ],
                )?;
            }
        }
        tx.commit()?;
        tracing::info!(org_id = %org_id, insurance_id = %id, "insurance saved");
        Ok(())
    }

    fn delete_insurance(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        if appointment_refs(&conn, "insurance_id", org_id, id)? > 0 {
            return Err(GatewayError::Rejected(
                "Insurance is used by appointments and cannot be deleted".into(),
            ));
        }
        delete_scoped(&conn, "insurances", "insurance", org_id, id)
    }

    fn list_patients(&self, org_id: Uuid) -> Result<Vec<Patient>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(
            "SELECT id, org_id, name, cpf, phone FROM patients
             WHERE org_id = ?1 ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([org_id.to_string()], patient_from_row)?;
        collect(rows)
    }

    fn upsert_patient(&self, org_id: Uuid, draft: &PatientDraft) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Write)?;
        let name = required_name(&draft.name)?;
        let cpf = none_if_empty(draft.cpf.as_deref());
        let phone = none_if_empty(draft.phone.as_deref());
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        match locate(&conn, "patients", "patient", org_id, id)? {
            Existing::InOrg => {
                conn.execute(
                    "UPDATE patients SET name = ?1, cpf = ?2, phone = ?3 WHERE id = ?4",
                    params![name, cpf, phone, id.to_string()],
                )?;
            }
            Existing::Absent => {
                conn.execute(
                    "INSERT INTO patients (id, org_id, name, cpf, phone, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id.to_string(), org_id.to_string(), name, cpf, phone, ts(Utc::now())],
                )?;
            }
        }
        Ok(())
    }

    fn delete_patient(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Write)?;
        delete_scoped(&conn, "patients", "patient", org_id, id)
    }
}
