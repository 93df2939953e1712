use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of checking an invite token before accepting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteVerification {
    #[serde(default)]
    pub org_id: Option<Uuid>,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// `owner`, `admin` or `member`.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_valid: Option<bool>,
    #[serde(default)]
    pub is_expired: Option<bool>,
}

impl InviteVerification {
    pub fn is_usable(&self) -> bool {
        self.is_valid == Some(true) && self.is_expired != Some(true)
    }

    /// The signed-in account must be the invited address.
    pub fn email_matches(&self, session_email: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(session_email.trim()))
    }
}
