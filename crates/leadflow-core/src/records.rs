use crate::{LeadStatus, Role, RowPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// One imported sheet.
///
/// `roster` is a denormalised view of the agents holding at least one lead of
/// the batch. Leads are the ground truth; the roster may briefly hold agents
/// that no longer own anything here until the next repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub total_leads: u64,
    pub roster: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub payload: RowPayload,
    pub assigned_to: String,
    pub imported_by: String,
    pub batch_id: String,
    /// Zero-based position of the row in the imported sheet.
    pub row_index: u64,
    pub status: LeadStatus,
    pub assigned_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Permanent copy of a forwarded lead. It holds no live reference to batches
/// or leads: `original_lead_id` is kept for traceability only and
/// `source_batch_name` is a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedLead {
    pub id: String,
    pub original_lead_id: String,
    pub payload: RowPayload,
    pub source_batch_name: String,
    pub forwarded_by: String,
    pub forwarded_at: DateTime<Utc>,
}
