use crate::{require_admin, EngineError, ExportFile, LeadEngine};
use chrono::Utc;
use leadflow_core::{Batch, Identity, RowPayload};
use leadflow_storage::{LeadFilter, RecordStore};
use serde::Serialize;
use tracing::info;

/// A batch together with a lead count relevant to the reader: the caller's
/// own leads for agents, every live lead for administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    #[serde(flatten)]
    pub batch: Batch,
    pub lead_count: u64,
}

impl<S: RecordStore> LeadEngine<S> {
    /// Batches listing the caller on their roster, newest first.
    pub fn batches_for_agent(&self, ctx: &Identity) -> Result<Vec<BatchView>, EngineError> {
        let batches = self.store.batches_for_agent(&ctx.subject_id)?;
        let mut views = Vec::with_capacity(batches.len());
        for batch in batches {
            let lead_count = self
                .store
                .count_leads(&LeadFilter::batch_and_agent(&batch.id, &ctx.subject_id))?;
            views.push(BatchView { batch, lead_count });
        }
        Ok(views)
    }

    pub fn all_batches(&self, ctx: &Identity) -> Result<Vec<BatchView>, EngineError> {
        require_admin(ctx)?;
        let batches = self.store.batches()?;
        let mut views = Vec::with_capacity(batches.len());
        for batch in batches {
            let lead_count = self.store.count_leads(&LeadFilter::batch(&batch.id))?;
            views.push(BatchView { batch, lead_count });
        }
        Ok(views)
    }

    /// The caller's own leads of one batch as a sheet of the original columns.
    pub fn export_agent_batch(
        &self,
        ctx: &Identity,
        batch_id: &str,
    ) -> Result<ExportFile, EngineError> {
        let batch = self
            .store
            .batch(batch_id)?
            .filter(|batch| batch.roster.contains(&ctx.subject_id))
            .ok_or_else(|| EngineError::not_found("batch not found"))?;

        let leads = self
            .store
            .leads(&LeadFilter::batch_and_agent(&batch.id, &ctx.subject_id))?;
        let rows: Vec<RowPayload> = leads.into_iter().map(|lead| lead.payload).collect();
        let stem = format!(
            "{}{}",
            self.config.agent_export_prefix,
            file_stem(&batch.name)
        );
        self.export_file(&stem, &rows)
    }

    /// Rebuilds a batch roster from the leads that reference it.
    pub fn repair_roster(&self, ctx: &Identity, batch_id: &str) -> Result<Batch, EngineError> {
        require_admin(ctx)?;
        let before = self
            .store
            .batch(batch_id)?
            .ok_or_else(|| EngineError::not_found("batch not found"))?;

        let holders = self.store.agents_holding_batch(batch_id)?;
        if holders != before.roster {
            let added: Vec<&String> = holders.difference(&before.roster).collect();
            let removed: Vec<&String> = before.roster.difference(&holders).collect();
            info!(
                event = "roster_repaired",
                batch_id,
                added = ?added,
                removed = ?removed
            );
            self.store.replace_roster(batch_id, &holders, Utc::now())?;
        }

        self.store
            .batch(batch_id)?
            .ok_or_else(|| EngineError::not_found("batch not found"))
    }
}

fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::file_stem;

    #[test]
    fn file_stem_drops_only_the_last_extension() {
        assert_eq!(file_stem("march.xlsx"), "march");
        assert_eq!(file_stem("q1.leads.csv"), "q1.leads");
        assert_eq!(file_stem("no-extension"), "no-extension");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
