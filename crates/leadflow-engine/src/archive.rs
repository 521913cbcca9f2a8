use crate::{require_admin, EngineError, LeadEngine};
use chrono::Utc;
use leadflow_core::{
    new_id, Account, ArchivedLead, Identity, LeadStatus, RowPayload, UNKNOWN_BATCH_NAME,
};
use leadflow_storage::RecordStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

const MISSING_AGENT: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReport {
    pub archived: u64,
    /// Flushed leftovers of an earlier interrupted forward, deleted without a
    /// second archive copy.
    pub cleared: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// An archived lead joined with the forwarding agent's account, when it still exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    #[serde(flatten)]
    pub lead: ArchivedLead,
    pub agent_username: Option<String>,
    pub agent_email: Option<String>,
}

impl<S: RecordStore> LeadEngine<S> {
    /// Moves the caller's own leads among `lead_ids` into the archive.
    ///
    /// Ids the caller does not own are skipped silently. The move writes the
    /// archive copies first, then marks the sources flushed, then deletes
    /// them, so an interrupted forward leaves flushed duplicates behind and
    /// never loses a lead. Forwarding a flushed leftover again only deletes
    /// it, since its archive copy already exists.
    pub fn forward(
        &self,
        ctx: &Identity,
        lead_ids: &[String],
    ) -> Result<ForwardReport, EngineError> {
        let mut seen = BTreeSet::new();
        let wanted: Vec<String> = lead_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .map(str::to_string)
            .collect();
        let selected = if wanted.is_empty() {
            Vec::new()
        } else {
            self.store.owned_leads(&wanted, &ctx.subject_id)?
        };
        if selected.is_empty() {
            return Err(EngineError::not_found("no leads found"));
        }

        let (leftovers, fresh): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|lead| lead.status == LeadStatus::Flushed);

        let now = Utc::now();
        let mut batch_names: BTreeMap<String, String> = BTreeMap::new();
        let mut entries = Vec::with_capacity(fresh.len());
        for lead in &fresh {
            let source_batch_name = match batch_names.get(&lead.batch_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .store
                        .batch(&lead.batch_id)?
                        .map(|batch| batch.name)
                        .unwrap_or_else(|| UNKNOWN_BATCH_NAME.to_string());
                    batch_names.insert(lead.batch_id.clone(), name.clone());
                    name
                }
            };
            entries.push(ArchivedLead {
                id: new_id(),
                original_lead_id: lead.id.clone(),
                payload: lead.payload.clone(),
                source_batch_name,
                forwarded_by: ctx.subject_id.clone(),
                forwarded_at: now,
            });
        }
        let fresh_ids: Vec<String> = fresh.into_iter().map(|lead| lead.id).collect();

        if !fresh_ids.is_empty() {
            self.store.insert_archived(&entries).map_err(|err| {
                error!(
                    event = "forward_failed",
                    step = "insert_archive",
                    agent_id = %ctx.subject_id,
                    lead_ids = ?fresh_ids,
                    error = %err
                );
                err
            })?;
            self.store.mark_flushed(&fresh_ids, now).map_err(|err| {
                error!(
                    event = "forward_failed",
                    step = "mark_flushed",
                    agent_id = %ctx.subject_id,
                    lead_ids = ?fresh_ids,
                    error = %err
                );
                err
            })?;
        }

        let mut moved_ids = fresh_ids;
        moved_ids.extend(leftovers.into_iter().map(|lead| lead.id));
        let deleted = self.store.delete_leads(&moved_ids).map_err(|err| {
            error!(
                event = "forward_failed",
                step = "delete_sources",
                agent_id = %ctx.subject_id,
                lead_ids = ?moved_ids,
                error = %err
            );
            err
        })?;
        if deleted != moved_ids.len() as u64 {
            warn!(
                event = "forward_delete_mismatch",
                agent_id = %ctx.subject_id,
                expected = moved_ids.len(),
                deleted
            );
        }

        let archived = entries.len() as u64;
        let cleared = moved_ids.len() as u64 - archived;
        info!(
            event = "leads_forwarded",
            agent_id = %ctx.subject_id,
            archived,
            cleared
        );
        Ok(ForwardReport { archived, cleared })
    }

    /// Every archived lead, newest first, with the forwarding agent resolved.
    pub fn archive_entries(&self, ctx: &Identity) -> Result<Vec<ArchiveEntry>, EngineError> {
        require_admin(ctx)?;
        let archived = self.store.archived_leads()?;
        let mut agents = AgentCache::default();

        let mut entries = Vec::with_capacity(archived.len());
        for lead in archived {
            let agent = agents.resolve(&self.store, &lead.forwarded_by)?;
            entries.push(ArchiveEntry {
                agent_username: agent.map(|account| account.username.clone()),
                agent_email: agent.map(|account| account.email.clone()),
                lead,
            });
        }
        Ok(entries)
    }

    /// Flattens the whole archive into one sheet: the original columns followed
    /// by `AGENT_NAME`, `AGENT_EMAIL`, `SOURCE_BATCH` and `ARCHIVED_ON`.
    pub fn export_all(&self, ctx: &Identity) -> Result<ExportFile, EngineError> {
        require_admin(ctx)?;
        if self.store.archive_count()? == 0 {
            return Err(EngineError::NoData);
        }
        let archived = self.store.archived_leads()?;

        let mut agents = AgentCache::default();
        let mut rows: Vec<RowPayload> = Vec::with_capacity(archived.len());
        for lead in &archived {
            let agent = agents.resolve(&self.store, &lead.forwarded_by)?;
            let mut row = lead.payload.clone();
            row.insert(
                "AGENT_NAME".to_string(),
                Value::String(
                    agent
                        .map(|account| account.username.clone())
                        .unwrap_or_else(|| MISSING_AGENT.to_string()),
                ),
            );
            row.insert(
                "AGENT_EMAIL".to_string(),
                Value::String(
                    agent
                        .map(|account| account.email.clone())
                        .unwrap_or_else(|| MISSING_AGENT.to_string()),
                ),
            );
            row.insert(
                "SOURCE_BATCH".to_string(),
                Value::String(lead.source_batch_name.clone()),
            );
            row.insert(
                "ARCHIVED_ON".to_string(),
                Value::String(
                    lead.forwarded_at
                        .format(&self.config.archived_on_format)
                        .to_string(),
                ),
            );
            rows.push(row);
        }

        info!(event = "archive_exported", rows = rows.len(), by = %ctx.subject_id);
        self.export_file(&self.config.archive_export_stem, &rows)
    }

    /// Irreversibly deletes the whole archive.
    pub fn purge_all(&self, ctx: &Identity) -> Result<PurgeReport, EngineError> {
        require_admin(ctx)?;
        let removed = self.store.purge_archive().map_err(|err| {
            error!(event = "archive_purge_failed", by = %ctx.subject_id, error = %err);
            err
        })?;
        warn!(event = "archive_purged", removed, by = %ctx.subject_id);
        Ok(PurgeReport { removed })
    }
}

#[derive(Default)]
struct AgentCache {
    accounts: BTreeMap<String, Option<Account>>,
}

impl AgentCache {
    fn resolve<S: RecordStore>(
        &mut self,
        store: &S,
        account_id: &str,
    ) -> Result<Option<&Account>, EngineError> {
        if !self.accounts.contains_key(account_id) {
            let account = store.account(account_id)?;
            self.accounts.insert(account_id.to_string(), account);
        }
        Ok(self
            .accounts
            .get(account_id)
            .and_then(|account| account.as_ref()))
    }
}
