//! Clinic-side master data screens: clinics, doctors, insurances, patients.
//!
//! Each screen validates its form before the write and re-lists afterwards.
//! Deletes need the confirmation step.

use uuid::Uuid;

use crate::core_state::CoreState;
use crate::error::{FieldErrors, ServiceError};
use crate::models::{
    Clinic, ClinicDraft, Doctor, DoctorDraft, Insurance, InsuranceDraft, Patient, PatientDraft,
};
use crate::validation::{format_cpf_cnpj, format_phone, is_valid_cpf, is_valid_hex_color};
use crate::view::require_confirmation;

fn required(errors: &mut FieldErrors, field: &'static str, value: &str, label: &str) {
    if value.trim().is_empty() {
        errors.add(field, format!("{label} is required"));
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

// ── Clinics ─────────────────────────────────────────────────

pub fn list_clinics(state: &CoreState) -> Result<Vec<Clinic>, ServiceError> {
    let org_id = state.require_active_org()?;
    Ok(state.gateway().list_clinics(org_id)?)
}

pub fn save_clinic(state: &CoreState, draft: &ClinicDraft) -> Result<Clinic, ServiceError> {
    let mut errors = FieldErrors::new();
    required(&mut errors, "name", &draft.name, "Name");
    errors.into_result()?;

    let org_id = state.require_active_org()?;
    let clean = ClinicDraft {
        name: draft.name.trim().to_string(),
        ..draft.clone()
    };
    let clinic = state.gateway().upsert_clinic(org_id, &clean)?;
    tracing::info!(org_id = %org_id, clinic_id = %clinic.id, "clinic saved");
    Ok(clinic)
}

pub fn set_clinic_active(state: &CoreState, id: Uuid, active: bool) -> Result<(), ServiceError> {
    let org_id = state.require_active_org()?;
    state.gateway().set_clinic_active(org_id, id, active)?;
    tracing::info!(org_id = %org_id, clinic_id = %id, active, "clinic status changed");
    Ok(())
}

/// Refused up front while appointments still point at the clinic.
pub fn delete_clinic(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    let org_id = state.require_active_org()?;
    let gateway = state.gateway();
    let refs = gateway.count_clinic_appointments(org_id, id)?;
    if refs > 0 {
        tracing::info!(org_id = %org_id, clinic_id = %id, refs, "clinic delete refused");
        return Err(ServiceError::Refused(format!(
            "This clinic has {refs} appointment(s) and cannot be deleted. Deactivate it instead."
        )));
    }
    gateway.delete_clinic(org_id, id)?;
    tracing::info!(org_id = %org_id, clinic_id = %id, "clinic deleted");
    Ok(())
}

// ── Doctors ─────────────────────────────────────────────────

pub fn list_doctors(state: &CoreState) -> Result<Vec<Doctor>, ServiceError> {
    let org_id = state.require_active_org()?;
    Ok(state.gateway().list_doctors(org_id)?)
}

pub fn save_doctor(state: &CoreState, draft: &DoctorDraft) -> Result<(), ServiceError> {
    let mut errors = FieldErrors::new();
    required(&mut errors, "name", &draft.name, "Name");
    let color = trimmed(draft.color.as_deref());
    if color.as_deref().is_some_and(|c| !is_valid_hex_color(c)) {
        errors.add("color", "Use a hex color like #0ea5e9");
    }
    errors.into_result()?;

    let org_id = state.require_active_org()?;
    let clean = DoctorDraft {
        id: draft.id,
        name: draft.name.trim().to_string(),
        specialty: trimmed(draft.specialty.as_deref()),
        color,
    };
    state.gateway().upsert_doctor(org_id, &clean)?;
    tracing::info!(org_id = %org_id, "doctor saved");
    Ok(())
}

pub fn delete_doctor(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    let org_id = state.require_active_org()?;
    state.gateway().delete_doctor(org_id, id)?;
    tracing::info!(org_id = %org_id, doctor_id = %id, "doctor deleted");
    Ok(())
}

// ── Insurances ──────────────────────────────────────────────

/// Make sure the self-pay option exists, then list.
pub fn list_insurances(state: &CoreState) -> Result<Vec<Insurance>, ServiceError> {
    let org_id = state.require_active_org()?;
    let gateway = state.gateway();
    if let Err(e) = gateway.ensure_default_insurance(org_id) {
        tracing::warn!(org_id = %org_id, error = %e, "default insurance not ensured");
    }
    Ok(gateway.list_insurances(org_id)?)
}

pub fn validate_insurance(draft: &InsuranceDraft) -> FieldErrors {
    let mut errors = FieldErrors::new();
    required(&mut errors, "name", &draft.name, "Name");
    if draft.min_days_between < 0 {
        errors.add("min_days_between", "Cannot be negative");
    }
    if draft.max_days_between < 0 {
        errors.add("max_days_between", "Cannot be negative");
    }
    if draft.max_days_between > 0 && draft.min_days_between > draft.max_days_between {
        errors.add("min_days_between", "Minimum cannot exceed maximum");
    }
    errors
}

pub fn save_insurance(state: &CoreState, draft: &InsuranceDraft) -> Result<(), ServiceError> {
    validate_insurance(draft).into_result()?;
    let org_id = state.require_active_org()?;
    let clean = InsuranceDraft {
        name: draft.name.trim().to_string(),
        ..draft.clone()
    };
    state.gateway().upsert_insurance(org_id, &clean)?;
    tracing::info!(org_id = %org_id, is_default = clean.is_default, "insurance saved");
    Ok(())
}

pub fn delete_insurance(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    let org_id = state.require_active_org()?;
    state.gateway().delete_insurance(org_id, id)?;
    tracing::info!(org_id = %org_id, insurance_id = %id, "insurance deleted");
    Ok(())
}

// ── Patients ────────────────────────────────────────────────

pub fn list_patients(state: &CoreState) -> Result<Vec<Patient>, ServiceError> {
    let org_id = state.require_active_org()?;
    Ok(state.gateway().list_patients(org_id)?)
}

/// CPF is optional but must be valid when given; both documents are stored masked.
pub fn save_patient(state: &CoreState, draft: &PatientDraft) -> Result<(), ServiceError> {
    let mut errors = FieldErrors::new();
    required(&mut errors, "name", &draft.name, "Name");
    let cpf = trimmed(draft.cpf.as_deref());
    if cpf.as_deref().is_some_and(|c| !is_valid_cpf(c)) {
        errors.add("cpf", "Invalid CPF");
    }
    errors.into_result()?;

    let org_id = state.require_active_org()?;
    let clean = PatientDraft {
        id: draft.id,
        name: draft.name.trim().to_string(),
        cpf: cpf.as_deref().map(format_cpf_cnpj),
        phone: trimmed(draft.phone.as_deref()).as_deref().map(format_phone),
    };
    state.gateway().upsert_patient(org_id, &clean)?;
    tracing::info!(org_id = %org_id, "patient saved");
    Ok(())
}

pub fn delete_patient(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    let org_id = state.require_active_org()?;
    state.gateway().delete_patient(org_id, id)?;
    tracing::info!(org_id = %org_id, patient_id = %id, "patient deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenda::{self, AppointmentForm};
    use crate::core_state::testing::{state_over, TestState};
    use crate::gateway::local::testing::{Fixture, PASSWORD};
    use crate::gateway::GatewayError;
    use crate::models::SELF_PAY_INSURANCE;
    use crate::orgs;
    use chrono::NaiveDate;

    fn signed_in(email: &str) -> TestState {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        t.state.sign_in(email, PASSWORD).unwrap();
        orgs::load(&t.state).unwrap();
        t
    }

    fn clinic_draft(name: &str) -> ClinicDraft {
        ClinicDraft { id: None, name: name.into(), is_active: true }
    }

    #[test]
    fn clinic_crud_and_toggle() {
        let t = signed_in("owner@clinicx.com");
        let clinic = save_clinic(&t.state, &clinic_draft("  Centro ")).unwrap();
        assert_eq!(clinic.name, "Centro");
        set_clinic_active(&t.state, clinic.id, false).unwrap();
        assert!(!list_clinics(&t.state).unwrap()[0].is_active);

        let err = save_clinic(&t.state, &clinic_draft(" ")).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref e) if e.get("name").is_some()));
    }

    #[test]
    fn clinic_with_appointments_is_refused_before_delete() {
        let t = signed_in("owner@clinicx.com");
        let clinic = save_clinic(&t.state, &clinic_draft("Centro")).unwrap();
        save_doctor(
            &t.state,
            &DoctorDraft { id: None, name: "Dr. Ana".into(), specialty: None, color: None },
        )
        .unwrap();
        let doctor = list_doctors(&t.state).unwrap()[0].id;
        let insurance = list_insurances(&t.state).unwrap()[0].id;
        agenda::save(
            &t.state,
            &AppointmentForm {
                patient_name: "Maria Silva".into(),
                clinic_id: Some(clinic.id),
                doctor_id: Some(doctor),
                insurance_id: Some(insurance),
                when_local: NaiveDate::from_ymd_opt(2025, 11, 14).and_then(|d| d.and_hms_opt(9, 0, 0)),
                ..AppointmentForm::default()
            },
        )
        .unwrap();

        assert!(matches!(delete_clinic(&t.state, clinic.id, false), Err(ServiceError::NotConfirmed)));
        let err = delete_clinic(&t.state, clinic.id, true).unwrap_err();
        assert!(matches!(err, ServiceError::Refused(ref m) if m.contains("1 appointment")));
        assert_eq!(list_clinics(&t.state).unwrap().len(), 1);

        let empty = save_clinic(&t.state, &clinic_draft("Filial")).unwrap();
        delete_clinic(&t.state, empty.id, true).unwrap();
        assert_eq!(list_clinics(&t.state).unwrap().len(), 1);
    }

    #[test]
    fn doctor_color_must_be_hex() {
        let t = signed_in("owner@clinicx.com");
        let draft = DoctorDraft {
            id: None,
            name: "Dr. Ana".into(),
            specialty: Some("  ".into()),
            color: Some("blue".into()),
        };
        let err = save_doctor(&t.state, &draft).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref e) if e.get("color").is_some()));

        save_doctor(&t.state, &DoctorDraft { color: None, ..draft }).unwrap();
        let doctors = list_doctors(&t.state).unwrap();
        assert_eq!(doctors[0].specialty, None);
        assert_eq!(doctors[0].display_color(), "#0ea5e9");

        let id = doctors[0].id;
        assert!(matches!(delete_doctor(&t.state, id, false), Err(ServiceError::NotConfirmed)));
        delete_doctor(&t.state, id, true).unwrap();
        assert!(list_doctors(&t.state).unwrap().is_empty());
    }

    #[test]
    fn insurance_list_ensures_self_pay() {
        let t = signed_in("staff@clinicx.com");
        let list = list_insurances(&t.state).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, SELF_PAY_INSURANCE);
        assert!(list[0].is_default);
    }

    #[test]
    fn insurance_day_limits() {
        let mut draft = InsuranceDraft {
            id: None,
            name: "Unimed".into(),
            min_days_between: 30,
            max_days_between: 10,
            is_default: false,
            is_active: true,
        };
        assert!(validate_insurance(&draft).get("min_days_between").is_some());
        draft.max_days_between = 0;
        assert!(validate_insurance(&draft).is_empty());
        draft.min_days_between = -1;
        assert!(!validate_insurance(&draft).is_empty());

        let t = signed_in("owner@clinicx.com");
        draft.min_days_between = 15;
        draft.max_days_between = 60;
        save_insurance(&t.state, &draft).unwrap();
        assert_eq!(list_insurances(&t.state).unwrap().len(), 2);
    }

    #[test]
    fn staff_cannot_manage_insurances() {
        let t = signed_in("staff@clinicx.com");
        let draft = InsuranceDraft {
            id: None,
            name: "Amil".into(),
            min_days_between: 0,
            max_days_between: 0,
            is_default: false,
            is_active: true,
        };
        assert!(matches!(
            save_insurance(&t.state, &draft),
            Err(ServiceError::Gateway(GatewayError::Forbidden(_)))
        ));
    }

    #[test]
    fn patient_documents_are_checked_and_masked() {
        let t = signed_in("staff@clinicx.com");
        let bad = PatientDraft {
            id: None,
            name: "Maria Silva".into(),
            cpf: Some("529.982.247-24".into()),
            phone: None,
        };
        assert!(matches!(save_patient(&t.state, &bad), Err(ServiceError::Validation(_))));

        let good = PatientDraft {
            cpf: Some("52998224725".into()),
            phone: Some("11987654321".into()),
            ..bad
        };
        save_patient(&t.state, &good).unwrap();
        let patients = list_patients(&t.state).unwrap();
        assert_eq!(patients[0].cpf.as_deref(), Some("529.982.247-25"));
        assert_eq!(patients[0].phone.as_deref(), Some("(11) 98765-4321"));

        let no_cpf = PatientDraft { id: None, name: "João".into(), cpf: Some(" ".into()), phone: None };
        save_patient(&t.state, &no_cpf).unwrap();
        assert_eq!(list_patients(&t.state).unwrap().len(), 2);
    }

    #[test]
    fn nothing_without_active_org() {
        let fx = Fixture::new();
        let t = state_over(fx.gw);
        assert!(matches!(list_clinics(&t.state), Err(ServiceError::NoActiveOrganization)));
    }
}
