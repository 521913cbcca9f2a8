use crate::{require_admin, required, EngineError, LeadEngine};
use chrono::Utc;
use leadflow_core::{Identity, Role};
use leadflow_storage::{LeadFilter, RecordStore};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassignRequest {
    pub batch_id: Option<String>,
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
}

impl ReassignRequest {
    pub fn new(
        batch_id: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
    ) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            from_agent: Some(from_agent.into()),
            to_agent: Some(to_agent.into()),
        }
    }

    fn validated(&self) -> Result<(&str, &str, &str), EngineError> {
        let batch_id = required(self.batch_id.as_deref());
        let from_agent = required(self.from_agent.as_deref());
        let to_agent = required(self.to_agent.as_deref());
        match (batch_id, from_agent, to_agent) {
            (Some(_), Some(from_agent), Some(to_agent)) if from_agent == to_agent => Err(
                EngineError::validation("fromAgent and toAgent must be different agents"),
            ),
            (Some(batch_id), Some(from_agent), Some(to_agent)) => {
                Ok((batch_id, from_agent, to_agent))
            }
            _ => {
                let missing: Vec<&str> = [
                    ("batchId", batch_id.is_none()),
                    ("fromAgent", from_agent.is_none()),
                    ("toAgent", to_agent.is_none()),
                ]
                .into_iter()
                .filter_map(|(field, absent)| absent.then_some(field))
                .collect();
                Err(EngineError::validation(format!(
                    "missing required fields: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassignReport {
    pub moved: u64,
    /// Whether the source agent was taken off the batch roster.
    pub source_released: bool,
}

impl<S: RecordStore> LeadEngine<S> {
    /// Moves every lead of one batch held by `from_agent` to `to_agent`.
    ///
    /// Runs as three independent store calls: the conditional bulk move, a
    /// set-add of the target onto the roster, and a recount that pulls the
    /// source off the roster only when it holds nothing left in the batch.
    /// Concurrent callers for the same pair race on the first step and the
    /// loser sees `NotFound`.
    pub fn reassign(
        &self,
        ctx: &Identity,
        request: &ReassignRequest,
    ) -> Result<ReassignReport, EngineError> {
        require_admin(ctx)?;
        let (batch_id, from_agent, to_agent) = request.validated()?;

        match self.store.account(to_agent)? {
            Some(account) if account.role == Role::Agent => {}
            _ => {
                return Err(EngineError::validation(format!(
                    "target agent {to_agent} does not exist"
                )))
            }
        }

        let now = Utc::now();
        let moved = self
            .store
            .reassign_leads(batch_id, from_agent, to_agent, now)?;
        if moved == 0 {
            return Err(EngineError::not_found(
                "no leads found for this agent in this batch",
            ));
        }
        info!(
            event = "leads_reassigned",
            batch_id,
            from_agent,
            to_agent,
            moved
        );

        let on_roster = self
            .store
            .add_to_roster(batch_id, to_agent, now)
            .map_err(|err| {
                error!(
                    event = "reassign_roster_failed",
                    step = "add_target",
                    batch_id,
                    from_agent,
                    to_agent,
                    moved,
                    error = %err
                );
                err
            })?;
        if !on_roster {
            warn!(
                event = "reassign_dangling_batch",
                batch_id,
                to_agent,
                moved
            );
        }

        let remaining = self
            .store
            .count_leads(&LeadFilter::batch_and_agent(batch_id, from_agent))
            .and_then(|remaining| {
                if remaining == 0 {
                    self.store.remove_from_roster(batch_id, from_agent, now)?;
                }
                Ok(remaining)
            })
            .map_err(|err| {
                error!(
                    event = "reassign_roster_failed",
                    step = "release_source",
                    batch_id,
                    from_agent,
                    to_agent,
                    moved,
                    error = %err
                );
                err
            })?;
        if remaining > 0 {
            warn!(
                event = "reassign_source_still_holding",
                batch_id,
                from_agent,
                remaining
            );
        }

        Ok(ReassignReport {
            moved,
            source_released: remaining == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_reported_as_missing() {
        let request = ReassignRequest {
            batch_id: Some("b1".to_string()),
            from_agent: Some("   ".to_string()),
            to_agent: None,
        };
        match request.validated() {
            Err(EngineError::Validation(message)) => {
                assert!(message.contains("fromAgent"), "{message}");
                assert!(message.contains("toAgent"), "{message}");
                assert!(!message.contains("batchId"), "{message}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn complete_request_is_trimmed() {
        let request = ReassignRequest::new(" b1 ", "a1", "a2 ");
        assert_eq!(request.validated().expect("valid"), ("b1", "a1", "a2"));
    }

    #[test]
    fn moving_leads_to_their_current_holder_is_rejected() {
        let request = ReassignRequest::new("b1", "a1", " a1 ");
        assert!(matches!(
            request.validated(),
            Err(EngineError::Validation(message)) if message.contains("different")
        ));
    }
}
