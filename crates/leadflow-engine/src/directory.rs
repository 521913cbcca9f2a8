use crate::{require_admin, required, EngineError, LeadEngine};
use chrono::Utc;
use leadflow_core::{new_id, Account, Identity, Role};
use leadflow_storage::{LeadFilter, RecordStore};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAgent {
    pub email: Option<String>,
    pub username: Option<String>,
}

/// A field agent with the number of live leads currently assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLoad {
    #[serde(flatten)]
    pub account: Account,
    pub lead_count: u64,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

impl<S: RecordStore> LeadEngine<S> {
    /// Registers a field agent. Credentials are issued elsewhere.
    pub fn create_agent(&self, ctx: &Identity, request: &NewAgent) -> Result<Account, EngineError> {
        require_admin(ctx)?;
        let (Some(email), Some(username)) = (
            required(request.email.as_deref()),
            required(request.username.as_deref()),
        ) else {
            return Err(EngineError::validation("email and username are required"));
        };
        if !email_regex().is_match(email) {
            return Err(EngineError::validation("invalid email address"));
        }

        let email = email.to_lowercase();
        if self.store.account_by_email(&email)?.is_some() {
            return Err(EngineError::validation("email already exists"));
        }
        if self.store.account_by_username(username)?.is_some() {
            return Err(EngineError::validation("username already exists"));
        }

        let account = Account {
            id: new_id(),
            username: username.to_string(),
            email,
            role: Role::Agent,
            created_at: Utc::now(),
        };
        self.store.insert_account(&account)?;
        info!(
            event = "agent_created",
            account_id = %account.id,
            username = %account.username,
            by = %ctx.subject_id
        );
        Ok(account)
    }

    pub fn accounts(&self, ctx: &Identity) -> Result<Vec<Account>, EngineError> {
        require_admin(ctx)?;
        Ok(self.store.accounts(None)?)
    }

    pub fn agent_loads(&self, ctx: &Identity) -> Result<Vec<AgentLoad>, EngineError> {
        require_admin(ctx)?;
        let agents = self.store.accounts(Some(Role::Agent))?;
        let mut loads = Vec::with_capacity(agents.len());
        for account in agents {
            let lead_count = self.store.count_leads(&LeadFilter::agent(&account.id))?;
            loads.push(AgentLoad {
                account,
                lead_count,
            });
        }
        Ok(loads)
    }

    /// Removes a field agent account. Leads still assigned to it are left in
    /// place for an administrator to reassign.
    pub fn delete_account(&self, ctx: &Identity, account_id: &str) -> Result<(), EngineError> {
        require_admin(ctx)?;
        let account = self
            .store
            .account(account_id)?
            .ok_or_else(|| EngineError::not_found("user not found"))?;
        if account.role == Role::Admin {
            return Err(EngineError::validation("cannot delete admin user"));
        }

        self.store.delete_account(account_id)?;
        let orphaned = self.store.count_leads(&LeadFilter::agent(account_id))?;
        info!(
            event = "account_deleted",
            account_id,
            orphaned_leads = orphaned,
            by = %ctx.subject_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::email_regex;

    #[test]
    fn email_shape_check() {
        assert!(email_regex().is_match("ada@example.com"));
        assert!(!email_regex().is_match("ada@example"));
        assert!(!email_regex().is_match("ada example@x.io"));
        assert!(!email_regex().is_match("@example.com"));
    }
}
