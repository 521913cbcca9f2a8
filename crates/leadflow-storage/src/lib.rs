use chrono::{DateTime, Utc};
use leadflow_core::{Account, ArchivedLead, Batch, Lead, LeadStatus, Role};
use std::collections::BTreeSet;
use thiserror::Error;

mod sqlite;

pub use sqlite::{SqliteStore, LEAD_SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Ordered bulk insert stopped part way. The first `inserted` rows were
/// committed and stay written; nothing after them was.
#[derive(Debug, Error)]
#[error("bulk insert stopped after {inserted} rows: {source}")]
pub struct BulkInsertError {
    pub inserted: usize,
    #[source]
    pub source: StorageError,
}

/// Lead selection. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilter {
    pub batch_id: Option<String>,
    pub assigned_to: Option<String>,
}

impl LeadFilter {
    pub fn batch(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            assigned_to: None,
        }
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            assigned_to: Some(agent_id.into()),
        }
    }

    pub fn batch_and_agent(batch_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            assigned_to: Some(agent_id.into()),
        }
    }
}

/// Persistence substrate for accounts, batches, leads and the archive.
///
/// Each method is atomic on its own, except `insert_leads`, which commits in
/// chunks. Nothing spans calls, so callers composing several methods must
/// tolerate a crash between any two of them.
pub trait RecordStore: Send + Sync {
    fn insert_account(&self, account: &Account) -> Result<(), StorageError>;
    fn account(&self, account_id: &str) -> Result<Option<Account>, StorageError>;
    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError>;
    fn account_by_username(&self, username: &str) -> Result<Option<Account>, StorageError>;
    /// Accounts in creation order, optionally restricted to one role.
    fn accounts(&self, role: Option<Role>) -> Result<Vec<Account>, StorageError>;
    fn delete_account(&self, account_id: &str) -> Result<bool, StorageError>;

    fn insert_batch(&self, batch: &Batch) -> Result<(), StorageError>;
    fn batch(&self, batch_id: &str) -> Result<Option<Batch>, StorageError>;
    /// Newest first.
    fn batches(&self) -> Result<Vec<Batch>, StorageError>;
    /// Batches whose roster lists the agent, newest first.
    fn batches_for_agent(&self, agent_id: &str) -> Result<Vec<Batch>, StorageError>;
    /// Idempotent set-add. Returns false when the batch does not exist.
    fn add_to_roster(
        &self,
        batch_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
    /// Set-pull. Returns false when the agent was not on the roster.
    fn remove_from_roster(
        &self,
        batch_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
    /// Returns false when the batch does not exist.
    fn replace_roster(
        &self,
        batch_id: &str,
        roster: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Ordered insert committed chunk by chunk. Stops at the first failing
    /// chunk, which is rolled back whole.
    fn insert_leads(&self, leads: &[Lead]) -> Result<usize, BulkInsertError>;
    fn lead(&self, lead_id: &str) -> Result<Option<Lead>, StorageError>;
    /// Live leads ordered by batch, then by import row. Flushed leftovers are
    /// skipped here and in `count_leads`, `reassign_leads` and
    /// `agents_holding_batch`.
    fn leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, StorageError>;
    fn count_leads(&self, filter: &LeadFilter) -> Result<u64, StorageError>;
    /// The subset of `lead_ids` currently assigned to `agent_id`, flushed
    /// leftovers included.
    fn owned_leads(&self, lead_ids: &[String], agent_id: &str) -> Result<Vec<Lead>, StorageError>;
    /// Conditional on ownership; never matches a flushed lead.
    fn update_lead_status(
        &self,
        lead_id: &str,
        agent_id: &str,
        status: LeadStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, StorageError>;
    /// Moves every lead of `batch_id` held by `from_agent`; returns the matched count.
    fn reassign_leads(
        &self,
        batch_id: &str,
        from_agent: &str,
        to_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError>;
    fn mark_flushed(&self, lead_ids: &[String], now: DateTime<Utc>) -> Result<u64, StorageError>;
    fn delete_leads(&self, lead_ids: &[String]) -> Result<u64, StorageError>;
    /// Distinct agents holding at least one lead of the batch.
    fn agents_holding_batch(&self, batch_id: &str) -> Result<BTreeSet<String>, StorageError>;

    fn insert_archived(&self, entries: &[ArchivedLead]) -> Result<u64, StorageError>;
    /// Newest first.
    fn archived_leads(&self) -> Result<Vec<ArchivedLead>, StorageError>;
    fn archive_count(&self) -> Result<u64, StorageError>;
    fn purge_archive(&self) -> Result<u64, StorageError>;
}
