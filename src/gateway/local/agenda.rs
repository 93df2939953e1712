use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{col_ts, col_uuid, collect, ts, LocalGateway, Need};
use crate::gateway::{AgendaGateway, GatewayError};
use crate::models::{Appointment, AppointmentWrite, Attendance, Holiday, DEFAULT_HOLIDAY_LABEL};

const APPOINTMENT_COLUMNS: &str = "id, org_id, clinic_id, doctor_id, insurance_id, patient_name, \
     when_at, attended, status, override_reason";

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    let attended: Option<bool> = row.get(7)?;
    Ok(Appointment {
        id: col_uuid(row, 0)?,
        org_id: Some(col_uuid(row, 1)?),
        clinic_id: col_uuid(row, 2)?,
        doctor_id: col_uuid(row, 3)?,
        insurance_id: col_uuid(row, 4)?,
        patient_name: row.get(5)?,
        when_at: col_ts(row, 6)?,
        attendance: Attendance::from(attended),
        status: row.get(8)?,
        override_reason: row.get(9)?,
    })
}

fn holiday_from_row(row: &Row<'_>) -> rusqlite::Result<Holiday> {
    Ok(Holiday {
        id: col_uuid(row, 0)?,
        org_id: Some(col_uuid(row, 1)?),
        date: row.get(2)?,
        name: row.get(3)?,
    })
}

fn holiday_on(conn: &Connection, org_id: Uuid, date: NaiveDate) -> Result<Option<String>, GatewayError> {
    Ok(conn
        .query_row(
            "SELECT name FROM holidays WHERE org_id = ?1 AND date = ?2",
            params![org_id.to_string(), date],
            |row| row.get(0),
        )
        .optional()?)
}

/// The referenced row must exist inside the organization.
fn require_in_org(
    conn: &Connection,
    table: &'static str,
    entity: &'static str,
    org_id: Uuid,
    id: Uuid,
) -> Result<(), GatewayError> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE org_id = ?1 AND id = ?2"),
            params![org_id.to_string(), id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    found.map(|_| ()).ok_or(GatewayError::NotFound { entity })
}

impl AgendaGateway for LocalGateway {
    fn list_holidays(
        &self,
        org_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(
            "SELECT id, org_id, date, name FROM holidays
             WHERE org_id = ?1 AND date >= ?2 AND date <= ?3 ORDER BY date",
        )?;
        let rows = stmt.query_map(params![org_id.to_string(), from, to], holiday_from_row)?;
        collect(rows)
    }

    fn add_holiday(&self, org_id: Uuid, date: NaiveDate, name: &str) -> Result<Holiday, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        if holiday_on(&conn, org_id, date)?.is_some() {
            return Err(GatewayError::Rejected(format!("A holiday already exists on {date}")));
        }
        let name = match name.trim() {
            "" => DEFAULT_HOLIDAY_LABEL,
            n => n,
        };
        let holiday = Holiday {
            id: Uuid::new_v4(),
            org_id: Some(org_id),
            date,
            name: name.to_string(),
        };
        conn.execute(
            "INSERT INTO holidays (id, org_id, date, name) VALUES (?1, ?2, ?3, ?4)",
            params![holiday.id.to_string(), org_id.to_string(), date, holiday.name],
        )?;
        tracing::info!(org_id = %org_id, %date, "holiday added");
        Ok(holiday)
    }

    fn delete_holiday(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Manage)?;
        let removed = conn.execute(
            "DELETE FROM holidays WHERE org_id = ?1 AND id = ?2",
            params![org_id.to_string(), id.to_string()],
        )?;
        if removed == 0 {
            return Err(GatewayError::NotFound { entity: "holiday" });
        }
        Ok(())
    }

    fn list_appointments(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE org_id = ?1 AND when_at >= ?2 AND when_at < ?3 ORDER BY when_at"
        ))?;
        let rows = stmt.query_map(
            params![org_id.to_string(), ts(start), ts(end)],
            appointment_from_row,
        )?;
        collect(rows)
    }

    fn find_appointment(&self, org_id: Uuid, id: Uuid) -> Result<Option<Appointment>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        Ok(conn
            .query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE org_id = ?1 AND id = ?2"),
                params![org_id.to_string(), id.to_string()],
                appointment_from_row,
            )
            .optional()?)
    }

    /// Re-checks the holiday block: a write on a holiday needs an override
    /// reason from an owner or admin of the organization.
    fn upsert_appointment(&self, write: &AppointmentWrite) -> Result<Appointment, GatewayError> {
        let conn = self.conn();
        let org_id = write.org_id;
        let (actor, role) = self.authorize(&conn, org_id, Need::Write)?;

        let patient_name = write.patient_name.trim();
        if patient_name.is_empty() {
            return Err(GatewayError::Rejected("Patient name is required".into()));
        }
        require_in_org(&conn, "clinics", "clinic", org_id, write.clinic_id)?;
        require_in_org(&conn, "doctors", "doctor", org_id, write.doctor_id)?;
        require_in_org(&conn, "insurances", "insurance", org_id, write.insurance_id)?;

        let owner: Option<String> = conn
            .query_row(
                "SELECT org_id FROM appointments WHERE id = ?1",
                [write.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if owner.is_some_and(|o| o != org_id.to_string()) {
            return Err(GatewayError::NotFound { entity: "appointment" });
        }

        let day = write.when_at.with_timezone(&self.utc_offset()).date_naive();
        let override_reason = match holiday_on(&conn, org_id, day)? {
            None => None,
            Some(name) => {
                let label = if name.trim().is_empty() { DEFAULT_HOLIDAY_LABEL } else { name.as_str() };
                let reason = write
                    .override_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty());
                let Some(reason) = reason else {
                    tracing::warn!(org_id = %org_id, %day, "appointment refused on holiday");
                    return Err(GatewayError::Rejected(format!(
                        "{day} is blocked by the holiday \"{label}\". Only an admin override with a reason can schedule on this day."
                    )));
                };
                if !role.is_some_and(|r| r.is_admin()) {
                    tracing::warn!(org_id = %org_id, user_id = %actor.user_id, "holiday override refused");
                    return Err(GatewayError::Forbidden(
                        "Only an owner or admin can override a holiday".into(),
                    ));
                }
                tracing::info!(org_id = %org_id, %day, user_id = %actor.user_id, "holiday override");
                Some(reason.to_string())
            }
        };

        let attended: Option<bool> = write.attendance.into();
        conn.execute(
            "INSERT INTO appointments
             (id, org_id, clinic_id, doctor_id, insurance_id, patient_name, when_at, attended, status, override_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               clinic_id = excluded.clinic_id,
               doctor_id = excluded.doctor_id,
               insurance_id = excluded.insurance_id,
               patient_name = excluded.patient_name,
               when_at = excluded.when_at,
               attended = excluded.attended,
               status = excluded.status,
               override_reason = excluded.override_reason",
            params![
                write.id.to_string(),
                org_id.to_string(),
                write.clinic_id.to_string(),
                write.doctor_id.to_string(),
                write.insurance_id.to_string(),
                patient_name,
                ts(write.when_at),
                attended,
                write.status,
                override_reason
            ],
        )?;
        tracing::info!(org_id = %org_id, appointment_id = %write.id, "appointment saved");

        Ok(conn.query_row(
            &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
            [write.id.to_string()],
            appointment_from_row,
        )?)
    }

    fn set_attendance(&self, org_id: Uuid, id: Uuid, attendance: Attendance) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Write)?;
        let attended: Option<bool> = attendance.into();
        let changed = conn.execute(
            "UPDATE appointments SET attended = ?1 WHERE org_id = ?2 AND id = ?3",
            params![attended, org_id.to_string(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound { entity: "appointment" });
        }
        Ok(())
    }

    fn delete_appointment(&self, org_id: Uuid, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Write)?;
        let removed = conn.execute(
            "DELETE FROM appointments WHERE org_id = ?1 AND id = ?2",
            params![org_id.to_string(), id.to_string()],
        )?;
        if removed == 0 {
            return Err(GatewayError::NotFound { entity: "appointment" });
        }
        tracing::info!(org_id = %org_id, appointment_id = %id, "appointment deleted");
        Ok(())
    }

    fn patient_history(
        &self,
        org_id: Uuid,
        patient_name: &str,
        limit: u32,
    ) -> Result<Vec<Appointment>, GatewayError> {
        let conn = self.conn();
        self.authorize(&conn, org_id, Need::Read)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE org_id = ?1 AND patient_name = ?2 ORDER BY when_at DESC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![org_id.to_string(), patient_name.trim(), limit],
            appointment_from_row,
        )?;
        collect(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::super::testing::*;
    use super::*;
    use crate::gateway::RegistryGateway;
    use crate::models::{ClinicDraft, DoctorDraft, MemberRole, STATUS_SCHEDULED};

    struct Refs {
        clinic: Uuid,
        doctor: Uuid,
        insurance: Uuid,
    }

    fn setup(f: &Fixture) -> Refs {
        f.as_owner();
        let clinic = f
            .gw
            .upsert_clinic(f.org_id, &ClinicDraft { id: None, name: "Centro".into(), is_active: true })
            .unwrap()
            .id;
        f.gw.upsert_doctor(
            f.org_id,
            &DoctorDraft { id: None, name: "Dr. Ana".into(), specialty: None, color: None },
        )
        .unwrap();
        f.gw.ensure_default_insurance(f.org_id).unwrap();
        let doctor = f.gw.list_doctors(f.org_id).unwrap()[0].id;
        let insurance = f.gw.list_insurances(f.org_id).unwrap()[0].id;
        Refs { clinic, doctor, insurance }
    }

    fn at_local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        brt().with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().with_timezone(&Utc)
    }

    fn write(f: &Fixture, r: &Refs, when_at: DateTime<Utc>, reason: Option<&str>) -> AppointmentWrite {
        AppointmentWrite {
            id: Uuid::new_v4(),
            org_id: f.org_id,
            clinic_id: r.clinic,
            doctor_id: r.doctor,
            insurance_id: r.insurance,
            patient_name: "Maria Silva".into(),
            when_at,
            status: STATUS_SCHEDULED.into(),
            attendance: Attendance::Unset,
            override_reason: reason.map(String::from),
        }
    }

    fn count(f: &Fixture) -> usize {
        f.gw.list_appointments(f.org_id, at_local(2025, 1, 1, 0), at_local(2026, 1, 1, 0))
            .unwrap()
            .len()
    }

    #[test]
    fn holiday_blocks_without_reason_and_non_admin_override() {
        let f = Fixture::new();
        let r = setup(&f);
        let day = NaiveDate::from_ymd_opt(2025, 11, 15).unwrap();
        f.gw.add_holiday(f.org_id, day, "Municipal Holiday").unwrap();

        f.as_staff();
        let err = f.gw.upsert_appointment(&write(&f, &r, at_local(2025, 11, 15, 9), None)).unwrap_err();
        assert!(err.user_message().contains("Municipal Holiday"));
        let err = f
            .gw
            .upsert_appointment(&write(&f, &r, at_local(2025, 11, 15, 9), Some("urgent")))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));
        assert_eq!(count(&f), 0);

        f.as_owner();
        let saved = f
            .gw
            .upsert_appointment(&write(&f, &r, at_local(2025, 11, 15, 9), Some(" urgent ")))
            .unwrap();
        assert_eq!(saved.patient_name, "Maria Silva");
        assert_eq!(saved.when_at, Utc.with_ymd_and_hms(2025, 11, 15, 12, 0, 0).unwrap());
        assert_eq!(saved.override_reason.as_deref(), Some("urgent"));
        assert_eq!(count(&f), 1);
    }

    #[test]
    fn holiday_uses_local_calendar_day() {
        let f = Fixture::new();
        let r = setup(&f);
        f.gw.add_holiday(f.org_id, NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(), "Municipal Holiday")
            .unwrap();
        // 22:00 local on the 14th is already the 15th in UTC.
        let late = at_local(2025, 11, 14, 22);
        assert_eq!(late.date_naive(), NaiveDate::from_ymd_opt(2025, 11, 15).unwrap());
        let saved = f.gw.upsert_appointment(&write(&f, &r, late, Some("ignored"))).unwrap();
        assert_eq!(saved.override_reason, None);
    }

    #[test]
    fn references_must_belong_to_the_organization() {
        let f = Fixture::new();
        let r = setup(&f);
        let mut w = write(&f, &r, at_local(2025, 11, 10, 9), None);
        w.doctor_id = Uuid::new_v4();
        assert!(matches!(
            f.gw.upsert_appointment(&w),
            Err(GatewayError::NotFound { entity: "doctor" })
        ));
    }

    #[test]
    fn viewers_cannot_book() {
        let f = Fixture::new();
        let r = setup(&f);
        f.as_viewer();
        assert!(matches!(
            f.gw.upsert_appointment(&write(&f, &r, at_local(2025, 11, 10, 9), None)),
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[test]
    fn edit_attendance_and_delete() {
        let f = Fixture::new();
        let r = setup(&f);
        let mut w = write(&f, &r, at_local(2025, 11, 10, 9), None);
        f.gw.upsert_appointment(&w).unwrap();

        w.when_at = at_local(2025, 11, 11, 14);
        f.gw.upsert_appointment(&w).unwrap();
        f.gw.set_attendance(f.org_id, w.id, Attendance::Missed).unwrap();
        let found = f.gw.find_appointment(f.org_id, w.id).unwrap().unwrap();
        assert_eq!(found.attendance, Attendance::Missed);

        let list = f.gw.list_appointments(f.org_id, at_local(2025, 11, 1, 0), at_local(2025, 12, 1, 0)).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].when_at, at_local(2025, 11, 11, 14));
        assert_eq!(list[0].attendance, Attendance::Missed);

        f.gw.delete_appointment(f.org_id, w.id).unwrap();
        assert_eq!(count(&f), 0);
        assert!(matches!(
            f.gw.set_attendance(f.org_id, w.id, Attendance::Attended),
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[test]
    fn range_end_is_exclusive() {
        let f = Fixture::new();
        let r = setup(&f);
        let boundary = at_local(2025, 12, 1, 0);
        f.gw.upsert_appointment(&write(&f, &r, boundary, None)).unwrap();
        let nov = f.gw.list_appointments(f.org_id, at_local(2025, 11, 1, 0), boundary).unwrap();
        assert!(nov.is_empty());
        let dec = f
            .gw
            .list_appointments(f.org_id, boundary, boundary + Duration::days(31))
            .unwrap();
        assert_eq!(dec.len(), 1);
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let f = Fixture::new();
        let r = setup(&f);
        for day in 1..=5 {
            f.gw.upsert_appointment(&write(&f, &r, at_local(2025, 10, day, 9), None)).unwrap();
        }
        let mut other = write(&f, &r, at_local(2025, 10, 6, 9), None);
        other.patient_name = "Maria S.".into();
        f.gw.upsert_appointment(&other).unwrap();

        let history = f.gw.patient_history(f.org_id, " Maria Silva ", 3).unwrap();
        let days: Vec<_> = history.iter().map(|a| a.when_at).collect();
        assert_eq!(days, vec![at_local(2025, 10, 5, 9), at_local(2025, 10, 4, 9), at_local(2025, 10, 3, 9)]);
    }

    #[test]
    fn holidays_are_unique_per_day_and_admin_managed() {
        let f = Fixture::new();
        f.as_owner();
        let day = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        let h = f.gw.add_holiday(f.org_id, day, "  ").unwrap();
        assert_eq!(h.name, DEFAULT_HOLIDAY_LABEL);
        assert!(matches!(
            f.gw.add_holiday(f.org_id, day, "Christmas"),
            Err(GatewayError::Rejected(_))
        ));
        let listed = f
            .gw
            .list_holidays(f.org_id, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(), day)
            .unwrap();
        assert_eq!(listed.len(), 1);

        f.as_staff();
        assert!(matches!(
            f.gw.delete_holiday(f.org_id, h.id),
            Err(GatewayError::Forbidden(_))
        ));
        f.as_owner();
        f.gw.delete_holiday(f.org_id, h.id).unwrap();
    }

    #[test]
    fn vendor_staff_books_but_cannot_override() {
        let f = Fixture::new();
        let r = setup(&f);
        f.gw.add_holiday(f.org_id, NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(), "Municipal Holiday")
            .unwrap();
        f.as_vendor();
        assert!(f.gw.upsert_appointment(&write(&f, &r, at_local(2025, 11, 14, 9), None)).is_ok());
        let err = f
            .gw
            .upsert_appointment(&write(&f, &r, at_local(2025, 11, 15, 9), Some("urgent")))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));
        assert_eq!(count(&f), 1);
    }

    #[test]
    fn promoted_admin_may_override() {
        let f = Fixture::new();
        let r = setup(&f);
        f.gw.add_holiday(f.org_id, NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(), "Municipal Holiday")
            .unwrap();
        f.gw.add_member(f.org_id, f.staff, MemberRole::Admin).unwrap();
        f.as_staff();
        assert!(f
            .gw
            .upsert_appointment(&write(&f, &r, at_local(2025, 11, 15, 9), Some("urgent")))
            .is_ok());
    }
}
