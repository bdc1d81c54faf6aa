//! Agent: a role-bound actor wrapping a `Model` plus task semantics.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sigil::error::SigilError;
use crate::sigil::model::{Model, PromptInput, PromptOutput};
use crate::sigil::proposal::Proposal;
use crate::sigil::result::AgentResult;
use crate::sigil::review::{Comment, CommentType, ReviewDecision, ReviewResult};
use crate::sigil::task::{Priority, Task, TaskType};

/// A named ability an agent may possess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    CodeGeneration,
    CodeReview,
    Refactor,
    TestGeneration,
    Documentation,
    SecurityAnalysis,
    PerformanceAnalysis,
    ArchitectureReview,
}

impl Capability {
    /// The capability a task type requires of its lead, per the orchestrator's selection
    /// algorithm.
    pub fn required_for(task_type: TaskType) -> Capability {
        match task_type {
            TaskType::Edit => Capability::CodeGeneration,
            TaskType::Generate => Capability::CodeGeneration,
            TaskType::Refactor => Capability::Refactor,
            TaskType::Review => Capability::CodeReview,
            TaskType::Test => Capability::TestGeneration,
            TaskType::Document => Capability::Documentation,
            TaskType::Optimize => Capability::PerformanceAnalysis,
            TaskType::Analyze => Capability::CodeReview,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Lead,
    Reviewer,
    Expert,
}

/// A reviewer's specialization tag: biases the review prompt and scoring heuristics without
/// changing the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialization {
    Security,
    Performance,
    Architecture,
    Testing,
}

/// Pluggable proposal extraction from free-form model text. Implementations parse
/// `output.text` into zero or more proposals for a completed task.
pub trait ProposalExtractor: Send + Sync {
    fn extract(&self, task: &Task, agent_id: &str, output: &PromptOutput) -> Vec<Proposal>;
}

/// The fixed default: the entire response is treated as one proposal, one `Replacement` change
/// per referenced file (or, absent any referenced file, a single change against the task's own
/// description as its path placeholder).
pub struct WholeResponseExtractor;

impl ProposalExtractor for WholeResponseExtractor {
    fn extract(&self, task: &Task, agent_id: &str, output: &PromptOutput) -> Vec<Proposal> {
        let mut proposal = Proposal::new(
            task.id,
            agent_id,
            format!("response to: {}", task.description),
            output.text.clone(),
            0.75,
        );
        if task.context.files.is_empty() {
            proposal = proposal.with_change(crate::sigil::proposal::Change::replacement(
                "response",
                "whole-response proposal",
                output.text.clone(),
            ));
        } else {
            for file in &task.context.files {
                proposal = proposal.with_change(crate::sigil::proposal::Change::replacement(
                    file.path.clone(),
                    "whole-response proposal",
                    output.text.clone(),
                ));
            }
        }
        vec![proposal]
    }
}

/// An agent: a role, a capability set, an optional specialization, and the `Model` it is bound
/// to. Owned by exactly one `Orchestrator` for its lifetime.
pub struct Agent {
    pub id: String,
    pub role: AgentRole,
    pub capabilities: HashSet<Capability>,
    pub priority: u32,
    pub max_concurrency: usize,
    pub specialization: Option<Specialization>,
    model: Arc<dyn Model>,
    extractor: Arc<dyn ProposalExtractor>,
}

impl Agent {
    pub fn new(id: impl Into<String>, role: AgentRole, model: Arc<dyn Model>) -> Self {
        Self {
            id: id.into(),
            role,
            capabilities: HashSet::new(),
            priority: 0,
            max_concurrency: 1,
            specialization: None,
            model,
            extractor: Arc::new(WholeResponseExtractor),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_specialization(mut self, specialization: Specialization) -> Self {
        self.specialization = Some(specialization);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ProposalExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Composes a prompt from the task's description, requirements, constraints, and file
    /// contents; calls the bound model; parses the response into proposals via the configured
    /// extractor.
    pub async fn execute(&self, task: &Task) -> AgentResult {
        let system_prompt = format!(
            "You are a {:?} agent performing a '{}' task. Respond with the complete solution.",
            self.role, task.task_type
        );

        let mut user_prompt = task.description.clone();
        if !task.context.requirements.is_empty() {
            user_prompt.push_str("\n\nRequirements:\n");
            for requirement in &task.context.requirements {
                user_prompt.push_str(&format!("- {}\n", requirement));
            }
        }
        if !task.context.constraints.is_empty() {
            user_prompt.push_str("\nConstraints:\n");
            for constraint in &task.context.constraints {
                user_prompt.push_str(&format!("- {}\n", constraint));
            }
        }

        let input = PromptInput::new(system_prompt, user_prompt)
            .with_files(task.context.files.clone())
            .with_max_tokens(prompt_token_budget(task.priority));

        match self.model.run_prompt(input).await {
            Ok(output) => {
                let proposals = self.extractor.extract(task, &self.id, &output);
                if proposals.is_empty() {
                    AgentResult::failed(task.id, &self.id, "model produced no usable proposal")
                } else {
                    AgentResult::success(task.id, &self.id, proposals, output.text)
                }
            }
            Err(e) => AgentResult::failed(task.id, &self.id, e.to_string()),
        }
    }

    /// Composes a review prompt describing the proposal and its changes, calls the bound
    /// model, and parses the response into a `ReviewResult`.
    pub async fn review(&self, proposal: &Proposal) -> ReviewResult {
        let system_prompt = match self.specialization {
            Some(Specialization::Security) => {
                "You are a security-focused reviewer. Flag any vulnerability as a blocker."
            }
            Some(Specialization::Performance) => {
                "You are a performance-focused reviewer. Flag regressions as blockers."
            }
            Some(Specialization::Architecture) => {
                "You are an architecture-focused reviewer. Flag structural issues as blockers."
            }
            Some(Specialization::Testing) => {
                "You are a test-coverage-focused reviewer. Flag missing coverage as blockers."
            }
            None => "You are a code reviewer.",
        };
        let system_prompt = format!(
            "{} Respond with a JSON object: {{\"decision\": \"accept\"|\"accept-with-changes\"|\
             \"reject\"|\"abstain\", \"score\": 0.0-1.0, \"confidence\": 0.0-1.0, \"comments\": \
             [{{\"type\": \"info\"|\"suggestion\"|\"issue\"|\"blocker\", \"message\": \"...\"}}]}}.",
            system_prompt
        );

        let mut user_prompt = format!(
            "Review this proposal: {}\n\nReasoning: {}\n\nChanges:\n",
            proposal.description, proposal.reasoning
        );
        for change in &proposal.changes {
            user_prompt.push_str(&format!("- {}: {}\n", change.path, change.description));
        }

        let input = PromptInput::new(system_prompt, user_prompt);

        match self.model.run_prompt(input).await {
            Ok(output) => parse_review_response(proposal.id, &self.id, &output.text),
            Err(e) => ReviewResult::new(
                proposal.id,
                &self.id,
                ReviewDecision::Abstain,
                0.0,
                0.0,
            )
            .with_comment(Comment::new(CommentType::Blocker, e.to_string())),
        }
    }
}

/// Per-task-priority token budget; a cheap proxy for deadline-sensitive generation length.
fn prompt_token_budget(priority: Priority) -> u32 {
    match priority {
        Priority::Critical => 8192,
        Priority::High => 4096,
        Priority::Normal => 2048,
        Priority::Low => 1024,
    }
}

#[derive(Deserialize)]
struct StructuredReview {
    decision: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    comments: Vec<StructuredComment>,
}

#[derive(Deserialize)]
struct StructuredComment {
    #[serde(rename = "type")]
    comment_type: String,
    message: String,
    #[serde(default)]
    location: Option<String>,
}

fn parse_decision(s: &str) -> ReviewDecision {
    match s.to_lowercase().as_str() {
        "accept" => ReviewDecision::Accept,
        "accept-with-changes" | "accept_with_changes" => ReviewDecision::AcceptWithChanges,
        "reject" => ReviewDecision::Reject,
        _ => ReviewDecision::Abstain,
    }
}

fn parse_comment_type(s: &str) -> CommentType {
    match s.to_lowercase().as_str() {
        "suggestion" => CommentType::Suggestion,
        "issue" => CommentType::Issue,
        "blocker" => CommentType::Blocker,
        _ => CommentType::Info,
    }
}

/// Parse a model's review response. Tries a structured JSON object first (the format the
/// review prompt asks for); falls back to a keyword heuristic over the raw text so a reviewer
/// backed by a model that ignores formatting instructions still yields a usable verdict rather
/// than a hard failure.
fn parse_review_response(proposal_id: Uuid, reviewer_id: &str, text: &str) -> ReviewResult {
    if let Some(json_start) = text.find('{') {
        if let Ok(structured) = serde_json::from_str::<StructuredReview>(&text[json_start..]) {
            let mut result = ReviewResult::new(
                proposal_id,
                reviewer_id,
                parse_decision(&structured.decision),
                structured.score,
                structured.confidence,
            );
            for comment in structured.comments {
                let mut c = Comment::new(parse_comment_type(&comment.comment_type), comment.message);
                if let Some(location) = comment.location {
                    c = c.with_location(location);
                }
                result = result.with_comment(c);
            }
            return result;
        }
    }

    let lowered = text.to_lowercase();
    let decision = if lowered.contains("reject") {
        ReviewDecision::Reject
    } else if lowered.contains("accept-with-changes") || lowered.contains("changes requested") {
        ReviewDecision::AcceptWithChanges
    } else if lowered.contains("accept") {
        ReviewDecision::Accept
    } else {
        ReviewDecision::Abstain
    };
    ReviewResult::new(proposal_id, reviewer_id, decision, 0.5, 0.5)
        .with_comment(Comment::new(CommentType::Info, "unstructured review response"))
}

#[async_trait]
impl crate::sigil::model::Model for NullModel {
    async fn run_prompt(&self, _input: PromptInput) -> Result<PromptOutput, SigilError> {
        Ok(PromptOutput {
            text: self.response.clone(),
            tokens_used: 0,
            model: "null".to_string(),
            metadata: Default::default(),
        })
    }

    fn capabilities(&self) -> crate::sigil::model::ModelCapabilities {
        crate::sigil::model::ModelCapabilities {
            max_tokens: 4096,
            supports_images: false,
            supports_tools: false,
            supports_streaming: false,
        }
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// A fixed-response `Model` stub, used by this module's own tests and handy for integration
/// tests elsewhere that need a deterministic agent without a live provider.
pub struct NullModel {
    pub response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigil::task::TaskType;

    fn agent_with_response(response: &str, role: AgentRole) -> Agent {
        Agent::new(
            "agent-a",
            role,
            Arc::new(NullModel {
                response: response.to_string(),
            }),
        )
        .with_capability(Capability::CodeGeneration)
        .with_capability(Capability::CodeReview)
    }

    #[tokio::test]
    async fn execute_produces_one_whole_response_proposal() {
        let agent = agent_with_response("fn hi() -> &'static str { \"hi\" }", AgentRole::Lead);
        let task = Task::new(TaskType::Generate, "write a function that returns hi");
        let result = agent.execute(&task).await;
        assert!(result.is_success());
        assert_eq!(result.proposals.len(), 1);
        assert!(result.proposals[0].confidence > 0.0);
    }

    #[tokio::test]
    async fn review_parses_structured_json_response() {
        let json = r#"{"decision": "accept", "score": 0.9, "confidence": 1.0, "comments": [{"type": "info", "message": "looks fine"}]}"#;
        let agent = agent_with_response(json, AgentRole::Reviewer);
        let proposal = Proposal::new(Uuid::new_v4(), "lead", "desc", "why", 0.8);
        let review = agent.review(&proposal).await;
        assert_eq!(review.decision, ReviewDecision::Accept);
        assert_eq!(review.score, 0.9);
        assert_eq!(review.comments.len(), 1);
    }

    #[tokio::test]
    async fn review_falls_back_to_keyword_heuristic_on_unstructured_text() {
        let agent = agent_with_response("I reject this change, it breaks the build.", AgentRole::Reviewer);
        let proposal = Proposal::new(Uuid::new_v4(), "lead", "desc", "why", 0.8);
        let review = agent.review(&proposal).await;
        assert_eq!(review.decision, ReviewDecision::Reject);
    }

    #[test]
    fn required_capability_maps_task_types() {
        assert_eq!(Capability::required_for(TaskType::Edit), Capability::CodeGeneration);
        assert_eq!(Capability::required_for(TaskType::Refactor), Capability::Refactor);
        assert_eq!(Capability::required_for(TaskType::Analyze), Capability::CodeReview);
    }
}
