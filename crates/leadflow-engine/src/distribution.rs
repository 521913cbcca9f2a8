use crate::{require_admin, EngineError, LeadEngine};
use chrono::Utc;
use leadflow_core::{new_id, Account, Batch, Identity, Lead, LeadStatus, Role, RowPayload};
use leadflow_storage::RecordStore;
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionReport {
    pub batch: Batch,
    pub total_records: u64,
}

/// Splits `row_count` rows into one contiguous range per agent index.
///
/// Every range has `ceil(row_count / agent_count)` rows except at the tail,
/// where ranges shrink and may end up empty. Concatenating the ranges in order
/// yields `0..row_count`.
pub fn plan_chunks(row_count: usize, agent_count: usize) -> Vec<Range<usize>> {
    if agent_count == 0 {
        return Vec::new();
    }
    let chunk_size = (row_count + agent_count - 1) / agent_count;
    (0..agent_count)
        .map(|index| {
            let start = (index * chunk_size).min(row_count);
            let end = ((index + 1) * chunk_size).min(row_count);
            start..end
        })
        .collect()
}

impl<S: RecordStore> LeadEngine<S> {
    /// Imports `rows` as a new batch split across every current field agent,
    /// in account creation order.
    pub fn distribute(
        &self,
        ctx: &Identity,
        batch_name: &str,
        rows: Vec<RowPayload>,
    ) -> Result<DistributionReport, EngineError> {
        require_admin(ctx)?;
        let agents = self.store.accounts(Some(Role::Agent))?;
        self.distribute_among(ctx, batch_name, rows, &agents)
    }

    /// Imports `rows` as a new batch split across `agents` in the given order.
    ///
    /// Writes the batch first, then the leads in sheet order. A failure after
    /// the batch exists is reported as [`EngineError::PartialDistribution`];
    /// nothing is rolled back.
    pub fn distribute_among(
        &self,
        ctx: &Identity,
        batch_name: &str,
        rows: Vec<RowPayload>,
        agents: &[Account],
    ) -> Result<DistributionReport, EngineError> {
        require_admin(ctx)?;
        let name = batch_name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("batch name is required"));
        }
        if rows.is_empty() {
            return Err(EngineError::EmptyImport);
        }
        if agents.is_empty() {
            return Err(EngineError::NoAgents);
        }

        let now = Utc::now();
        let total = rows.len();
        let plan = plan_chunks(total, agents.len());
        let roster: BTreeSet<String> = agents
            .iter()
            .zip(&plan)
            .filter(|(_, range)| !range.is_empty())
            .map(|(agent, _)| agent.id.clone())
            .collect();

        let batch = Batch {
            id: new_id(),
            name: name.to_string(),
            owner: ctx.subject_id.clone(),
            total_leads: total as u64,
            roster,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_batch(&batch).map_err(|err| {
            error!(
                event = "distribute_failed",
                step = "insert_batch",
                batch_id = %batch.id,
                error = %err
            );
            err
        })?;

        let mut leads = Vec::with_capacity(total);
        let mut rows = rows.into_iter();
        for (agent, range) in agents.iter().zip(&plan) {
            for row_index in range.clone() {
                let Some(payload) = rows.next() else {
                    break;
                };
                leads.push(Lead {
                    id: new_id(),
                    payload,
                    assigned_to: agent.id.clone(),
                    imported_by: ctx.subject_id.clone(),
                    batch_id: batch.id.clone(),
                    row_index: row_index as u64,
                    status: LeadStatus::None,
                    assigned_at: now,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        if let Err(err) = self.store.insert_leads(&leads) {
            error!(
                event = "distribute_failed",
                step = "insert_leads",
                batch_id = %batch.id,
                inserted = err.inserted,
                expected = total,
                error = %err.source
            );
            return Err(EngineError::PartialDistribution {
                batch_id: batch.id,
                inserted: err.inserted,
                expected: total,
                source: err.source,
            });
        }

        info!(
            event = "leads_distributed",
            batch_id = %batch.id,
            batch_name = %batch.name,
            total_leads = total,
            agents = batch.roster.len(),
            importer = %ctx.subject_id
        );

        Ok(DistributionReport {
            batch,
            total_records: total as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_are_contiguous_and_cover_every_row() {
        for rows in 0..40 {
            for agents in 1..9 {
                let plan = plan_chunks(rows, agents);
                assert_eq!(plan.len(), agents);
                let mut cursor = 0;
                for range in &plan {
                    assert_eq!(range.start, cursor, "rows={rows} agents={agents}");
                    cursor = range.end;
                }
                assert_eq!(cursor, rows);
            }
        }
    }

    #[test]
    fn uneven_split_front_loads_ceil_sized_chunks() {
        assert_eq!(plan_chunks(10, 3), vec![0..4, 4..8, 8..10]);
        assert_eq!(plan_chunks(5, 4), vec![0..2, 2..4, 4..5, 5..5]);
        assert_eq!(plan_chunks(2, 4), vec![0..1, 1..2, 2..2, 2..2]);
    }

    #[test]
    fn no_agents_means_no_plan() {
        assert!(plan_chunks(10, 0).is_empty());
    }
}
