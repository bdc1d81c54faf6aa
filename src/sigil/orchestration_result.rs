//! OrchestrationResult: what the orchestrator returns for a completed task.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sigil::consensus::Consensus;
use crate::sigil::event::OrchestrationEvent;
use crate::sigil::result::{AgentResult, ResultStatus};

/// The orchestrator's final verdict for one task: task id, status, lead agent id, the lead's
/// result, consensus (if reviews ran), and the event trace emitted while processing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub task_id: Uuid,
    pub status: ResultStatus,
    pub lead_agent_id: Option<String>,
    pub result: Option<AgentResult>,
    pub consensus: Option<Consensus>,
    pub events: Vec<OrchestrationEvent>,
}

impl OrchestrationResult {
    /// A task that could not even start: no eligible lead, or the lead's execution failed.
    pub fn failed(task_id: Uuid, events: Vec<OrchestrationEvent>) -> Self {
        Self {
            task_id,
            status: ResultStatus::Failed,
            lead_agent_id: None,
            result: None,
            consensus: None,
            events,
        }
    }

    /// A completed task, with or without a review round.
    pub fn completed(
        task_id: Uuid,
        lead_agent_id: impl Into<String>,
        result: AgentResult,
        consensus: Option<Consensus>,
        events: Vec<OrchestrationEvent>,
    ) -> Self {
        let status = result.status;
        Self {
            task_id,
            status,
            lead_agent_id: Some(lead_agent_id.into()),
            result: Some(result),
            consensus,
            events,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigil::proposal::Proposal;

    #[test]
    fn failed_result_carries_no_lead_or_consensus() {
        let task_id = Uuid::new_v4();
        let events = vec![OrchestrationEvent::TaskFailed {
            task_id,
            reason: "no agent available".into(),
        }];
        let result = OrchestrationResult::failed(task_id, events);
        assert!(!result.is_success());
        assert!(result.lead_agent_id.is_none());
        assert!(result.consensus.is_none());
        assert_eq!(result.events.len(), 1);
    }

    #[test]
    fn completed_result_reflects_underlying_status() {
        let task_id = Uuid::new_v4();
        let proposal = Proposal::new(task_id, "agent-a", "desc", "why", 0.9);
        let agent_result = AgentResult::success(task_id, "agent-a", vec![proposal], "looks good");
        let result = OrchestrationResult::completed(task_id, "agent-a", agent_result, None, vec![]);
        assert!(result.is_success());
        assert_eq!(result.lead_agent_id.as_deref(), Some("agent-a"));
    }
}
