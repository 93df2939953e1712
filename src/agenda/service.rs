//! Agenda screen operations over the active organization.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::calendar::{self, bucket_by_day, day_list, month_grid};
use super::guard::{check_write, HolidayOverride, ScheduleError};
use crate::access;
use crate::core_state::CoreState;
use crate::error::FieldErrors;
use crate::gateway::GatewayError;
use crate::models::{
    preferred_insurance, Appointment, AppointmentWrite, Attendance, Clinic, Doctor, Holiday,
    HolidaySet, Insurance, Patient, STATUS_SCHEDULED,
};

/// Longest history shown for one patient.
pub const HISTORY_LIMIT: u32 = 50;

const DEFAULT_START: (u32, u32) = (9, 0);

/// Date range one agenda month fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthWindow {
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub end_exclusive: NaiveDate,
}

impl MonthWindow {
    pub fn containing(day: NaiveDate) -> Self {
        let first = calendar::first_of_month(day);
        let last = calendar::last_of_month(day);
        Self {
            first,
            last,
            end_exclusive: last.succ_opt().unwrap_or(last),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first <= date && date <= self.last
    }

    /// `[first 00:00, end_exclusive 00:00)` in local time, as instants.
    pub fn instants(
        &self,
        offset: chrono::FixedOffset,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), ScheduleError> {
        let start = calendar::start_of_day(self.first, offset);
        let end = calendar::start_of_day(self.end_exclusive, offset);
        start
            .zip(end)
            .ok_or_else(|| ScheduleError::Internal(format!("no local midnight for {}", self.first)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCell {
    pub date: NaiveDate,
    pub in_month: bool,
    pub holiday: Option<String>,
    /// Earliest first.
    pub appointments: Vec<Appointment>,
}

/// One loaded agenda month plus the lists its form needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgendaMonth {
    pub org_id: Uuid,
    pub window: MonthWindow,
    pub days: Vec<DayCell>,
    pub holidays: Vec<Holiday>,
    /// As fetched, ascending by time.
    #[serde(skip)]
    pub appointments: Vec<Appointment>,
    pub clinics: Vec<Clinic>,
    pub doctors: Vec<Doctor>,
    pub insurances: Vec<Insurance>,
    pub patients: Vec<Patient>,
}

impl AgendaMonth {
    pub fn holiday_set(&self) -> HolidaySet {
        HolidaySet::new(&self.holidays)
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayCell> {
        self.days.iter().find(|d| d.date == date)
    }
}

/// The appointment modal. `when_local` is the picker's wall-clock value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentForm {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub clinic_id: Option<Uuid>,
    #[serde(default)]
    pub doctor_id: Option<Uuid>,
    #[serde(default)]
    pub insurance_id: Option<Uuid>,
    #[serde(default)]
    pub when_local: Option<NaiveDateTime>,
    #[serde(default, rename = "override")]
    pub holiday_override: HolidayOverride,
    #[serde(default)]
    pub confirmed: bool,
}

impl AppointmentForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.patient_name.trim().is_empty() {
            errors.add("patient_name", "Patient is required");
        }
        if self.clinic_id.is_none() {
            errors.add("clinic_id", "Clinic is required");
        }
        if self.doctor_id.is_none() {
            errors.add("doctor_id", "Doctor is required");
        }
        if self.insurance_id.is_none() {
            errors.add("insurance_id", "Insurance is required");
        }
        if self.when_local.is_none() {
            errors.add("when_local", "Date and time are required");
        }
        errors
    }
}

/// Fetch the month containing `reference` and make it the loaded agenda.
pub fn load_month(state: &CoreState, reference: NaiveDate) -> Result<AgendaMonth, ScheduleError> {
    let scope = state.scope();
    let month = fetch_month(state, reference)?;
    if state.commit_agenda(scope, month.clone())? {
        tracing::info!(
            org_id = %month.org_id,
            month = %month.window.first,
            appointments = month.appointments.len(),
            holidays = month.holidays.len(),
            "agenda month loaded"
        );
    }
    Ok(month)
}

/// The month containing `reference`, leaving the loaded agenda alone.
fn fetch_month(state: &CoreState, reference: NaiveDate) -> Result<AgendaMonth, ScheduleError> {
    let org_id = state.require_active_org()?;
    let offset = state.utc_offset();
    let window = MonthWindow::containing(reference);
    let (start, end) = window.instants(offset)?;
    let gateway = state.gateway();

    let holidays = gateway.list_holidays(org_id, window.first, window.last)?;
    let appointments = gateway.list_appointments(org_id, start, end)?;
    let clinics = gateway.list_clinics(org_id)?;
    let doctors = gateway.list_doctors(org_id)?;
    let insurances = gateway.list_insurances(org_id)?;
    let patients = gateway.list_patients(org_id)?;

    let holiday_set = HolidaySet::new(&holidays);
    let buckets = bucket_by_day(&appointments, offset);
    let days = month_grid(reference)
        .into_iter()
        .map(|cell| DayCell {
            date: cell.date,
            in_month: cell.in_month,
            holiday: holiday_set.label(cell.date).map(str::to_string),
            appointments: day_list(&buckets, cell.date),
        })
        .collect();

    Ok(AgendaMonth {
        org_id,
        window,
        days,
        holidays,
        appointments,
        clinics,
        doctors,
        insurances,
        patients,
    })
}

/// The loaded month when it belongs to the active organization and covers
/// `date`, otherwise a fetch that does not replace the month on screen.
fn month_for(state: &CoreState, date: NaiveDate) -> Result<AgendaMonth, ScheduleError> {
    let org_id = state.require_active_org()?;
    match state.agenda_month()? {
        Some(month) if month.org_id == org_id && month.window.contains(date) => Ok(month),
        _ => fetch_month(state, date),
    }
}

/// Pre-filled form for a new booking on `day` (or now, to the minute).
/// Holiday days are refused before the form opens.
pub fn new_draft(state: &CoreState, day: Option<NaiveDate>) -> Result<AppointmentForm, ScheduleError> {
    let offset = state.utc_offset();
    let when_local = match day {
        Some(d) => {
            let start = NaiveTime::from_hms_opt(DEFAULT_START.0, DEFAULT_START.1, 0).unwrap_or(NaiveTime::MIN);
            d.and_time(start)
        }
        None => {
            let now = Utc::now().with_timezone(&offset).naive_local();
            now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now)
        }
    };
    let date = when_local.date();
    let month = month_for(state, date)?;
    if let Some(name) = month.holiday_set().label(date) {
        return Err(ScheduleError::HolidayBlocked {
            date,
            name: name.to_string(),
        });
    }

    let clinic = month
        .clinics
        .iter()
        .find(|c| c.is_active)
        .or_else(|| month.clinics.first());
    Ok(AppointmentForm {
        clinic_id: clinic.map(|c| c.id),
        doctor_id: month.doctors.first().map(|d| d.id),
        insurance_id: preferred_insurance(&month.insurances).map(|i| i.id),
        when_local: Some(when_local),
        ..AppointmentForm::default()
    })
}

/// Create or edit an appointment. Editing keeps status and attendance.
pub fn save(state: &CoreState, form: &AppointmentForm) -> Result<Appointment, ScheduleError> {
    let errors = form.validate();
    let (Some(clinic_id), Some(doctor_id), Some(insurance_id), Some(when_local)) =
        (form.clinic_id, form.doctor_id, form.insurance_id, form.when_local)
    else {
        return Err(ScheduleError::Validation(errors));
    };
    if !errors.is_empty() {
        return Err(ScheduleError::Validation(errors));
    }

    state.require_session()?;
    let org_id = state.require_active_org()?;
    let offset = state.utc_offset();
    let when_at = calendar::local_instant(when_local, offset).ok_or_else(|| {
        let mut errors = FieldErrors::new();
        errors.add("when_local", "Invalid local time");
        ScheduleError::Validation(errors)
    })?;
    let date = calendar::local_date(when_at, offset);

    let holidays = month_for(state, date)?.holiday_set();
    let caps = access::current(state)?;
    let override_reason = check_write(
        date,
        &holidays,
        &form.holiday_override,
        caps.can_override_holidays,
        form.confirmed,
    )?;

    let gateway = state.gateway();
    let (id, status, attendance) = match form.id {
        Some(id) => {
            let existing = gateway
                .find_appointment(org_id, id)?
                .ok_or(GatewayError::NotFound { entity: "appointment" })?;
            (id, existing.status, existing.attendance)
        }
        None => (Uuid::new_v4(), STATUS_SCHEDULED.to_string(), Attendance::Unset),
    };

    let write = AppointmentWrite {
        id,
        org_id,
        clinic_id,
        doctor_id,
        insurance_id,
        patient_name: form.patient_name.trim().to_string(),
        when_at,
        status,
        attendance,
        override_reason,
    };
    let saved = gateway.upsert_appointment(&write)?;
    tracing::info!(
        org_id = %org_id,
        appointment_id = %saved.id,
        edited = form.id.is_some(),
        overridden = saved.override_reason.is_some(),
        "appointment saved"
    );
    reload(state, date);
    Ok(saved)
}

pub fn set_attendance(state: &CoreState, id: Uuid, attendance: Attendance) -> Result<(), ScheduleError> {
    let org_id = state.require_active_org()?;
    state.gateway().set_attendance(org_id, id, attendance)?;
    tracing::info!(org_id = %org_id, appointment_id = %id, ?attendance, "attendance set");
    reload_current(state);
    Ok(())
}

pub fn delete_appointment(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ScheduleError> {
    if !confirmed {
        return Err(ScheduleError::NotConfirmed);
    }
    let org_id = state.require_active_org()?;
    state.gateway().delete_appointment(org_id, id)?;
    tracing::info!(org_id = %org_id, appointment_id = %id, "appointment deleted");
    reload_current(state);
    Ok(())
}

/// Past and future visits under the exact patient name, newest first.
pub fn patient_history(state: &CoreState, patient_name: &str) -> Result<Vec<Appointment>, ScheduleError> {
    let name = patient_name.trim();
    if name.is_empty() {
        return Ok(Vec::new());
    }
    let org_id = state.require_active_org()?;
    Ok(state.gateway().patient_history(org_id, name, HISTORY_LIMIT)?)
}

pub fn add_holiday(state: &CoreState, date: NaiveDate, name: &str) -> Result<Holiday, ScheduleError> {
    let org_id = state.require_active_org()?;
    let holiday = state.gateway().add_holiday(org_id, date, name)?;
    tracing::info!(org_id = %org_id, %date, "holiday added");
    reload(state, date);
    Ok(holiday)
}

pub fn delete_holiday(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ScheduleError> {
    if !confirmed {
        return Err(ScheduleError::NotConfirmed);
    }
    let org_id = state.require_active_org()?;
    state.gateway().delete_holiday(org_id, id)?;
    tracing::info!(org_id = %org_id, holiday_id = %id, "holiday deleted");
    reload_current(state);
    Ok(())
}

/// Refetch the month on screen, or the one containing `date` if none is.
fn reload(state: &CoreState, date: NaiveDate) {
    let reference = state
        .agenda_month()
        .ok()
        .flatten()
        .map(|m| m.window.first)
        .unwrap_or(date);
    if let Err(e) = load_month(state, reference) {
        tracing::warn!(error = %e, "agenda refetch failed");
    }
}

fn reload_current(state: &CoreState) {
    if let Ok(Some(month)) = state.agenda_month() {
        reload(state, month.window.first);
    }
}
