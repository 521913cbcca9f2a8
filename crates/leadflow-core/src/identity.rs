use crate::Role;
use serde::{Deserialize, Serialize};

/// Verified caller claim handed over by the authentication layer.
///
/// Every engine operation takes the identity explicitly; nothing reads it from
/// ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
    pub username: String,
}

impl Identity {
    pub fn new(subject_id: impl Into<String>, role: Role, username: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
            username: username.into(),
        }
    }

    pub fn admin(subject_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(subject_id, Role::Admin, username)
    }

    pub fn agent(subject_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(subject_id, Role::Agent, username)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
