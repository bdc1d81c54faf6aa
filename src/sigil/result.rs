//! AgentResult: a lead agent's output from executing a task.
//!
//! Named `AgentResult`, not `Result`, so it never shadows `std::result::Result` at call sites.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sigil::proposal::Proposal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Partial,
}

/// A lead's output: status, proposals, free-form reasoning, and an error string.
///
/// Invariant: `status == Success` implies `proposals` is non-empty. Constructors enforce this;
/// there is no public way to build a violating value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: Uuid,
    pub agent_id: String,
    pub status: ResultStatus,
    pub proposals: Vec<Proposal>,
    pub reasoning: String,
    pub error: Option<String>,
}

impl AgentResult {
    /// Succeeds with one or more proposals. Panics if `proposals` is empty — that would violate
    /// the success invariant and indicates a caller bug, not a runtime condition.
    pub fn success(
        task_id: Uuid,
        agent_id: impl Into<String>,
        proposals: Vec<Proposal>,
        reasoning: impl Into<String>,
    ) -> Self {
        assert!(
            !proposals.is_empty(),
            "a successful AgentResult must carry at least one proposal"
        );
        Self {
            task_id,
            agent_id: agent_id.into(),
            status: ResultStatus::Success,
            proposals,
            reasoning: reasoning.into(),
            error: None,
        }
    }

    pub fn partial(
        task_id: Uuid,
        agent_id: impl Into<String>,
        proposals: Vec<Proposal>,
        reasoning: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            status: ResultStatus::Partial,
            proposals,
            reasoning: reasoning.into(),
            error: Some(error.into()),
        }
    }

    pub fn failed(task_id: Uuid, agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            status: ResultStatus::Failed,
            proposals: Vec::new(),
            reasoning: String::new(),
            error: Some(error.into()),
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
    #[should_panic]
    fn success_with_no_proposals_panics() {
        let _ = AgentResult::success(Uuid::new_v4(), "agent-a", Vec::new(), "reasoning");
    }

    #[test]
    fn failed_carries_no_proposals() {
        let r = AgentResult::failed(Uuid::new_v4(), "agent-a", "boom");
        assert!(r.proposals.is_empty());
        assert!(!r.is_success());
    }

    #[test]
    fn success_requires_at_least_one_proposal() {
        let task_id = Uuid::new_v4();
        let proposal = Proposal::new(task_id, "agent-a", "desc", "why", 0.9);
        let r = AgentResult::success(task_id, "agent-a", vec![proposal], "looks good");
        assert!(r.is_success());
        assert_eq!(r.proposals.len(), 1);
    }
}
