use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub mod identity;
pub mod records;

pub use identity::Identity;
pub use records::{Account, ArchivedLead, Batch, Lead};

/// Source batch label used when an archived lead's batch can no longer be resolved.
pub const UNKNOWN_BATCH_NAME: &str = "Unknown Batch";

/// One imported sheet row. Keys are column headers; values are opaque to the engine.
pub type RowPayload = Map<String, Value>;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    None,
    Pending,
    Done,
    Rejected,
    Flushed,
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::None
    }
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::None => "none",
            LeadStatus::Pending => "pending",
            LeadStatus::Done => "done",
            LeadStatus::Rejected => "rejected",
            LeadStatus::Flushed => "flushed",
        }
    }

    /// `Flushed` is only reachable through archival.
    pub fn is_agent_settable(&self) -> bool {
        !matches!(self, LeadStatus::Flushed)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "none" => Ok(LeadStatus::None),
            "pending" => Ok(LeadStatus::Pending),
            "done" => Ok(LeadStatus::Done),
            "rejected" => Ok(LeadStatus::Rejected),
            "flushed" => Ok(LeadStatus::Flushed),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

/// Account capability. Field agents travel as `"user"` on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "user", alias = "agent")]
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "admin" => Ok(Role::Admin),
            "user" | "agent" => Ok(Role::Agent),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!("DONE".parse::<LeadStatus>(), Ok(LeadStatus::Done));
        assert_eq!(" pending ".parse::<LeadStatus>(), Ok(LeadStatus::Pending));
        assert!("archived".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn flushed_is_not_agent_settable() {
        assert!(!LeadStatus::Flushed.is_agent_settable());
        for status in [
            LeadStatus::None,
            LeadStatus::Pending,
            LeadStatus::Done,
            LeadStatus::Rejected,
        ] {
            assert!(status.is_agent_settable(), "{status} should be settable");
        }
    }

    #[test]
    fn agent_role_uses_user_wire_name() {
        assert_eq!(
            serde_json::to_string(&Role::Agent).expect("serialize"),
            "\"user\""
        );
        assert_eq!(
            serde_json::from_str::<Role>("\"agent\"").expect("alias"),
            Role::Agent
        );
        assert_eq!("user".parse::<Role>(), Ok(Role::Agent));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(new_id(), new_id());
        assert_eq!(new_id().len(), 32);
    }
}
