//! Subscription plans: list, create/update, toggle, delete.

use serde::Serialize;
use uuid::Uuid;

use crate::core_state::CoreState;
use crate::error::ServiceError;
use crate::models::{Plan, PlanDraft, PlanStatus};
use crate::money::format_brl;
use crate::validation::slugify;
use crate::view::require_confirmation;

/// A plan as the listing shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanRow {
    #[serde(flatten)]
    pub plan: Plan,
    pub price_display: String,
}

impl From<Plan> for PlanRow {
    fn from(plan: Plan) -> Self {
        Self {
            price_display: format_brl(plan.price_cents),
            plan,
        }
    }
}

/// Cheapest first.
pub fn list_plans(state: &CoreState) -> Result<Vec<PlanRow>, ServiceError> {
    state.require_session()?;
    Ok(state.gateway().list_plans()?.into_iter().map(PlanRow::from).collect())
}

/// Blank codes are derived from the plan name.
fn normalize(draft: &PlanDraft) -> PlanDraft {
    let code = match draft.code.trim() {
        "" => slugify(&draft.name),
        code => code.to_string(),
    };
    PlanDraft {
        id: draft.id,
        code,
        name: draft.name.trim().to_string(),
        price_cents: draft.price_cents,
        limits: draft.limits,
    }
}

/// Creates when `draft.id` is empty, updates otherwise.
pub fn save_plan(state: &CoreState, draft: &PlanDraft) -> Result<Plan, ServiceError> {
    let draft = normalize(draft);
    draft.validate().into_result()?;
    state.require_session()?;

    let gateway = state.gateway();
    let plan = match draft.id {
        Some(id) => gateway.update_plan(id, &draft)?,
        None => gateway.create_plan(&draft)?,
    };
    tracing::info!(plan_id = %plan.id, code = %plan.code, "plan saved");
    Ok(plan)
}

/// Active and inactive flip; a blocked plan comes back as active.
pub fn toggle_plan(state: &CoreState, id: Uuid) -> Result<PlanStatus, ServiceError> {
    state.require_session()?;
    let gateway = state.gateway();
    let current = gateway
        .list_plans()?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or(crate::gateway::GatewayError::NotFound { entity: "plan" })?;
    let next = match current.status {
        PlanStatus::Active => PlanStatus::Inactive,
        PlanStatus::Inactive | PlanStatus::Blocked => PlanStatus::Active,
    };
    gateway.set_plan_status(id, next)?;
    tracing::info!(plan_id = %id, status = next.as_str(), "plan status changed");
    Ok(next)
}

pub fn delete_plan(state: &CoreState, id: Uuid, confirmed: bool) -> Result<(), ServiceError> {
    require_confirmation(confirmed)?;
    state.require_session()?;
    state.gateway().delete_plan(id)?;
    tracing::info!(plan_id = %id, "plan deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::testing::{state_over, TestState};
    use crate::gateway::local::testing::{Fixture, PASSWORD};
    use crate::gateway::GatewayError;
    use crate::models::PlanLimits;

    fn vendor() -> TestState {
        let t = state_over(Fixture::new().gw);
        t.state.sign_in("root@vendor.com", PASSWORD).unwrap();
        t
    }

    fn draft(code: &str, name: &str, price: i64) -> PlanDraft {
        PlanDraft {
            id: None,
            code: code.into(),
            name: name.into(),
            price_cents: price,
            limits: PlanLimits { clinics: 1, users: 3, doctors: 5 },
        }
    }

    #[test]
    fn blank_code_comes_from_the_name() {
        let t = vendor();
        let plan = save_plan(&t.state, &draft(" ", "Plano Básico", 4900)).unwrap();
        assert_eq!(plan.code, "plano-basico");
        assert_eq!(plan.name, "Plano Básico");
    }

    #[test]
    fn invalid_plan_is_refused_before_the_write() {
        let t = vendor();
        let err = save_plan(&t.state, &draft("A", "", -1)).unwrap_err();
        let ServiceError::Validation(fields) = err else { panic!("expected validation") };
        assert!(fields.get("code").is_some());
        assert!(fields.get("name").is_some());
        assert!(fields.get("price_cents").is_some());
        assert!(list_plans(&t.state).unwrap().is_empty());
    }

    #[test]
    fn list_update_toggle_delete() {
        let t = vendor();
        save_plan(&t.state, &draft("pro", "Pro", 19900)).unwrap();
        let starter = save_plan(&t.state, &draft("starter", "Starter", 9900)).unwrap();
        let codes: Vec<_> = list_plans(&t.state).unwrap().into_iter().map(|row| row.plan.code).collect();
        assert_eq!(codes, vec!["starter", "pro"]);
        assert_eq!(list_plans(&t.state).unwrap()[1].price_display, "R$ 199,00");

        let mut edit = draft("starter", "Starter+", 12900);
        edit.id = Some(starter.id);
        let updated = save_plan(&t.state, &edit).unwrap();
        assert_eq!(updated.price_cents, 12900);

        assert_eq!(toggle_plan(&t.state, starter.id).unwrap(), PlanStatus::Inactive);
        assert_eq!(toggle_plan(&t.state, starter.id).unwrap(), PlanStatus::Active);

        assert!(matches!(delete_plan(&t.state, starter.id, false), Err(ServiceError::NotConfirmed)));
        delete_plan(&t.state, starter.id, true).unwrap();
        assert_eq!(list_plans(&t.state).unwrap().len(), 1);
        assert!(matches!(
            toggle_plan(&t.state, starter.id),
            Err(ServiceError::Gateway(GatewayError::NotFound { .. }))
        ));
    }

    #[test]
    fn clinic_members_cannot_see_plans() {
        let t = state_over(Fixture::new().gw);
        t.state.sign_in("owner@clinicx.com", PASSWORD).unwrap();
        assert!(matches!(
            list_plans(&t.state),
            Err(ServiceError::Gateway(GatewayError::Forbidden(_)))
        ));
    }
}
