use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ClientStatus, MemberRole};
use crate::error::FieldErrors;
use crate::validation::{is_valid_cep, is_valid_cpf_cnpj, is_valid_email};

/// The vendor's view of a tenant organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub cpf_cnpj: String,
    pub phone: String,
    pub email: String,
    pub cep: String,
    pub address_line1: String,
    pub address_line2: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub plan_id: Option<Uuid>,
    pub plan_name: String,
    pub type_id: Option<Uuid>,
    pub type_key: String,
    pub type_name: String,
    pub status: ClientStatus,
    pub has_appointments: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Client {
    /// Case-insensitive match against the searchable columns.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        [
            &self.name,
            &self.cpf_cnpj,
            &self.email,
            &self.phone,
            &self.city,
            &self.state,
            &self.type_name,
        ]
        .iter()
        .any(|v| v.to_lowercase().contains(&q))
    }
}

/// Contact, address and subscription fields shared by create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDraft {
    pub name: String,
    pub cpf_cnpj: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    pub plan_id: Option<Uuid>,
    pub type_id: Option<Uuid>,
}

impl ClientDraft {
    /// The e-mail names the tenant's first administrator, so it is required
    /// on create and only format-checked on update.
    pub fn validate(&self, creating: bool) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "Client name is required");
        }
        let doc = self.cpf_cnpj.trim();
        if doc.is_empty() {
            errors.add("cpf_cnpj", "CPF or CNPJ is required");
        } else if !is_valid_cpf_cnpj(doc) {
            errors.add("cpf_cnpj", "Invalid CPF/CNPJ");
        }
        let email = self.email.trim();
        if creating && email.is_empty() {
            errors.add("email", "Administrator e-mail is required");
        } else if !email.is_empty() && !is_valid_email(email) {
            errors.add("email", "Invalid e-mail");
        }
        if !self.cep.trim().is_empty() && !is_valid_cep(&self.cep) {
            errors.add("cep", "Invalid CEP");
        }
        if self.plan_id.is_none() {
            errors.add("plan_id", "Select a plan");
        }
        if self.type_id.is_none() {
            errors.add("type_id", "Select a client type");
        }
        errors
    }
}

/// How the tenant's first administrator gets access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminMember {
    /// Owner or admin; anything else is coerced to owner.
    pub role: MemberRole,
    /// Issue an invite token instead of linking an existing account.
    pub invite: bool,
}

impl Default for AdminMember {
    fn default() -> Self {
        Self {
            role: MemberRole::Owner,
            invite: true,
        }
    }
}

impl AdminMember {
    pub fn effective_role(&self) -> MemberRole {
        if self.role == MemberRole::Admin {
            MemberRole::Admin
        } else {
            MemberRole::Owner
        }
    }
}

/// Result of creating a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCreated {
    pub org_id: Uuid,
    pub invite_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClientDraft {
        ClientDraft {
            name: "Clinic X".into(),
            cpf_cnpj: "11.222.333/0001-81".into(),
            email: "owner@clinicx.com".into(),
            plan_id: Some(Uuid::new_v4()),
            type_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert!(valid().validate(true).is_empty());
    }

    #[test]
    fn email_required_only_on_create() {
        let draft = ClientDraft { email: String::new(), ..valid() };
        assert!(draft.validate(true).get("email").is_some());
        assert!(draft.validate(false).get("email").is_none());
    }

    #[test]
    fn document_and_cep_are_checked() {
        let draft = ClientDraft {
            cpf_cnpj: "123".into(),
            cep: "0131".into(),
            ..valid()
        };
        let errors = draft.validate(false);
        assert_eq!(errors.get("cpf_cnpj"), Some("Invalid CPF/CNPJ"));
        assert_eq!(errors.get("cep"), Some("Invalid CEP"));
    }

    #[test]
    fn admin_member_role_is_owner_or_admin() {
        let m = AdminMember { role: MemberRole::Viewer, invite: false };
        assert_eq!(m.effective_role(), MemberRole::Owner);
        let m = AdminMember { role: MemberRole::Admin, invite: false };
        assert_eq!(m.effective_role(), MemberRole::Admin);
    }

    #[test]
    fn search_matches_any_column() {
        let client = Client {
            id: Uuid::new_v4(),
            name: "Clinic X".into(),
            cpf_cnpj: String::new(),
            phone: String::new(),
            email: String::new(),
            cep: String::new(),
            address_line1: String::new(),
            address_line2: String::new(),
            district: String::new(),
            city: "Campinas".into(),
            state: "SP".into(),
            plan_id: None,
            plan_name: String::new(),
            type_id: None,
            type_key: String::new(),
            type_name: String::new(),
            status: ClientStatus::Active,
            has_appointments: false,
            created_at: None,
        };
        assert!(client.matches("campi"));
        assert!(client.matches(""));
        assert!(!client.matches("recife"));
    }
}
