use crate::{required, EngineError, LeadEngine};
use chrono::Utc;
use leadflow_core::{Identity, Lead, LeadStatus};
use leadflow_storage::{LeadFilter, RecordStore};
use tracing::debug;

impl<S: RecordStore> LeadEngine<S> {
    /// Sets the status of one of the caller's own leads.
    ///
    /// Any agent-settable status may follow any other, including itself.
    /// A lead that is missing, belongs to another agent, or is already flushed
    /// all read as not found.
    pub fn set_status(
        &self,
        ctx: &Identity,
        lead_id: &str,
        requested: &str,
    ) -> Result<Lead, EngineError> {
        let status = requested
            .parse::<LeadStatus>()
            .map_err(EngineError::InvalidStatus)?;
        if !status.is_agent_settable() {
            return Err(EngineError::InvalidStatus(format!(
                "{status} cannot be set directly"
            )));
        }

        let updated = self
            .store
            .update_lead_status(lead_id, &ctx.subject_id, status, Utc::now())?;
        match updated {
            Some(lead) => {
                debug!(
                    event = "lead_status_set",
                    lead_id = %lead.id,
                    agent_id = %ctx.subject_id,
                    status = %status
                );
                Ok(lead)
            }
            None => Err(EngineError::not_found("lead not found")),
        }
    }

    /// The caller's own leads, optionally limited to one batch, in sheet order.
    pub fn leads_for_agent(
        &self,
        ctx: &Identity,
        batch_id: Option<&str>,
    ) -> Result<Vec<Lead>, EngineError> {
        let filter = LeadFilter {
            batch_id: required(batch_id).map(str::to_string),
            assigned_to: Some(ctx.subject_id.clone()),
        };
        Ok(self.store.leads(&filter)?)
    }
}
