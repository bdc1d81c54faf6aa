//! Orchestrator: task dispatch, review fan-out, consensus, and the event bus.
//!
//! An `RwLock`-guarded agent map with `with_*` builders, plus a task-execution algorithm that
//! selects a lead, fans reviews out, and folds them into a consensus verdict.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::sigil::agent::{Agent, AgentRole, Capability};
use crate::sigil::consensus::Consensus;
use crate::sigil::event::{EventBus, OrchestrationEvent};
use crate::sigil::orchestration_result::OrchestrationResult;
use crate::sigil::result::ResultStatus;
use crate::sigil::review::{Comment, CommentType, ReviewDecision, ReviewResult};
use crate::sigil::task::Task;

/// Default cap on registered agents.
const DEFAULT_MAX_AGENTS: usize = 5;

/// Prefix convention for a requirement entry that requests a reviewer specialization, e.g.
/// `"specialization:security"`. `Task`'s data model has no dedicated field for this;
/// piggybacking on free-form requirements is the only channel available, per `DESIGN.md`.
const SPECIALIZATION_PREFIX: &str = "specialization:";

fn requested_specializations(task: &Task) -> Vec<String> {
    task.context
        .requirements
        .iter()
        .filter_map(|r| r.strip_prefix(SPECIALIZATION_PREFIX).map(|s| s.to_string()))
        .collect()
}

/// Running totals and rolling rates, read without blocking task execution. Each field is its
/// own atomic so a reader never contends with a writer's lock.
#[derive(Debug, Default)]
struct MetricsState {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    /// EWMA of task latency in milliseconds, fixed-point as `value * 1000`.
    latency_ewma_micros: AtomicU64,
    consensus_reached: AtomicU64,
    conflicts_detected: AtomicU64,
    reviewed_tasks: AtomicU64,
}

/// Smoothing factor for the latency EWMA.
const EWMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub latency_ewma: Duration,
    pub consensus_rate: f64,
    pub conflict_rate: f64,
}

impl MetricsState {
    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self, status: ResultStatus, elapsed: Duration) {
        match status {
            ResultStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
        }
        let sample = elapsed.as_micros() as f64;
        let prev = self.latency_ewma_micros.load(Ordering::Relaxed) as f64;
        let next = if prev == 0.0 {
            sample
        } else {
            EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev
        };
        self.latency_ewma_micros
            .store(next as u64, Ordering::Relaxed);
    }

    fn record_review_round(&self, had_conflict: bool) {
        self.reviewed_tasks.fetch_add(1, Ordering::Relaxed);
        self.consensus_reached.fetch_add(1, Ordering::Relaxed);
        if had_conflict {
            self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> OrchestratorMetrics {
        let reviewed = self.reviewed_tasks.load(Ordering::Relaxed) as f64;
        let consensus_rate = if reviewed > 0.0 {
            self.consensus_reached.load(Ordering::Relaxed) as f64 / reviewed
        } else {
            0.0
        };
        let conflict_rate = if reviewed > 0.0 {
            self.conflicts_detected.load(Ordering::Relaxed) as f64 / reviewed
        } else {
            0.0
        };
        OrchestratorMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            latency_ewma: Duration::from_micros(self.latency_ewma_micros.load(Ordering::Relaxed)),
            consensus_rate,
            conflict_rate,
        }
    }
}

/// Task scheduler that dispatches one task across a lead and, optionally, reviewer agents.
/// Owns every registered `Agent` for its lifetime.
pub struct Orchestrator {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    registration_order: RwLock<Vec<String>>,
    max_agents: usize,
    enable_review: bool,
    running: AtomicBool,
    event_bus: EventBus,
    metrics: MetricsState,
    in_flight: Arc<AtomicU64>,
}

/// RAII guard decrementing the orchestrator's in-flight task counter on every return path out
/// of `execute_task`, so `stop`'s drain loop observes an accurate count.
struct InFlightGuard(Arc<AtomicU64>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_max_agents(DEFAULT_MAX_AGENTS)
    }

    pub fn with_max_agents(max_agents: usize) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            registration_order: RwLock::new(Vec::new()),
            max_agents,
            enable_review: true,
            running: AtomicBool::new(false),
            event_bus: EventBus::new(),
            metrics: MetricsState::default(),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_review_enabled(mut self, enabled: bool) -> Self {
        self.enable_review = enabled;
        self
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Allocates worker machinery. Idempotent.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Drains in-flight tasks up to a grace period, then returns regardless of stragglers;
    /// cancellation of outstanding work is advisory, not forced. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let grace = Duration::from_secs(5);
        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Registers an agent. Rejects duplicate ids, rejects registration past the configured
    /// cap, and rejects registration while the orchestrator is not running.
    pub async fn register_agent(&self, agent: Agent) -> Result<(), String> {
        if !self.is_running() {
            return Err("orchestrator is not running".to_string());
        }
        let mut agents = self.agents.write().await;
        if agents.len() >= self.max_agents {
            return Err(format!(
                "agent cap reached: at most {} agents may be registered",
                self.max_agents
            ));
        }
        if agents.contains_key(&agent.id) {
            return Err(format!("agent id '{}' is already registered", agent.id));
        }
        let id = agent.id.clone();
        agents.insert(id.clone(), Arc::new(agent));
        self.registration_order.write().await.push(id);
        Ok(())
    }

    pub async fn get_agents(&self) -> Vec<Arc<Agent>> {
        let order = self.registration_order.read().await;
        let agents = self.agents.read().await;
        order
            .iter()
            .filter_map(|id| agents.get(id).cloned())
            .collect()
    }

    pub async fn get_agents_by_role(&self, role: AgentRole) -> Vec<Arc<Agent>> {
        self.get_agents()
            .await
            .into_iter()
            .filter(|a| a.role == role)
            .collect()
    }

    pub fn get_metrics(&self) -> OrchestratorMetrics {
        self.metrics.snapshot()
    }

    /// Highest-priority lead with every capability the task type requires; ties broken by
    /// registration order.
    async fn select_lead(&self, task: &Task) -> Option<Arc<Agent>> {
        let required = Capability::required_for(task.task_type);
        let leads = self.get_agents_by_role(AgentRole::Lead).await;
        leads
            .into_iter()
            .filter(|a| a.has_capability(required))
            .max_by_key(|a| a.priority)
    }

    async fn select_reviewers(&self, task: &Task) -> Vec<Arc<Agent>> {
        let requested = requested_specializations(task);
        self.get_agents()
            .await
            .into_iter()
            .filter(|a| matches!(a.role, AgentRole::Reviewer | AgentRole::Expert))
            .filter(|a| a.has_capability(Capability::CodeReview))
            .filter(|a| {
                if requested.is_empty() {
                    true
                } else {
                    a.specialization
                        .map(|s| requested.iter().any(|r| format!("{:?}", s).eq_ignore_ascii_case(r)))
                        .unwrap_or(false)
                }
            })
            .collect()
    }

    /// The central task execution algorithm: select lead, run it, fan reviews out if enabled,
    /// fold into a consensus verdict.
    pub async fn execute_task(&self, task: Task) -> OrchestrationResult {
        self.metrics.record_submitted();
        let start = Instant::now();
        let mut events = Vec::new();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        let Some(lead) = self.select_lead(&task).await else {
            events.push(OrchestrationEvent::TaskFailed {
                task_id: task.id,
                reason: "no agent available".to_string(),
            });
            self.publish_last(&events);
            self.metrics.record_completion(ResultStatus::Failed, start.elapsed());
            return OrchestrationResult::failed(task.id, events);
        };

        events.push(OrchestrationEvent::TaskStarted { task_id: task.id });
        self.publish_last(&events);
        events.push(OrchestrationEvent::LeadSelected {
            task_id: task.id,
            agent_id: lead.id.clone(),
        });
        self.publish_last(&events);

        let deadline = task.deadline();
        let lead_result = match deadline {
            Some(d) => match timeout(d, lead.execute(&task)).await {
                Ok(result) => result,
                Err(_) => crate::sigil::result::AgentResult::failed(
                    task.id,
                    lead.id.clone(),
                    "lead execution exceeded its task deadline",
                ),
            },
            None => lead.execute(&task).await,
        };

        if lead_result.status == ResultStatus::Failed || lead_result.proposals.is_empty() {
            events.push(OrchestrationEvent::TaskFailed {
                task_id: task.id,
                reason: lead_result
                    .error
                    .clone()
                    .unwrap_or_else(|| "lead execution failed".to_string()),
            });
            self.publish_last(&events);
            self.metrics.record_completion(ResultStatus::Failed, start.elapsed());
            return OrchestrationResult::completed(task.id, lead.id.clone(), lead_result, None, events);
        }

        events.push(OrchestrationEvent::ProposalReceived {
            task_id: task.id,
            agent_id: lead.id.clone(),
        });
        self.publish_last(&events);

        let proposal = lead_result.proposals[0].clone();

        let consensus = if self.enable_review {
            let reviewers = self.select_reviewers(&task).await;
            if reviewers.is_empty() {
                None
            } else {
                let review_deadline = deadline.map(|d| d / 2);
                let specialized_ids: Vec<String> = reviewers
                    .iter()
                    .filter(|r| r.specialization.is_some())
                    .map(|r| r.id.clone())
                    .collect();

                for reviewer in &reviewers {
                    events.push(OrchestrationEvent::ReviewerSelected {
                        task_id: task.id,
                        agent_id: reviewer.id.clone(),
                    });
                    self.publish_last(&events);
                }

                let mut handles = Vec::with_capacity(reviewers.len());
                for reviewer in reviewers.clone() {
                    let proposal = proposal.clone();
                    let reviewer_id = reviewer.id.clone();
                    let handle = tokio::spawn(async move {
                        match review_deadline {
                            Some(d) => timeout(d, reviewer.review(&proposal)).await.ok(),
                            None => Some(reviewer.review(&proposal).await),
                        }
                    });
                    handles.push((reviewer_id, handle));
                }

                let mut reviews = Vec::with_capacity(handles.len());
                for (reviewer_id, handle) in handles {
                    let review = match handle.await {
                        Ok(Some(review)) => review,
                        Ok(None) | Err(_) => {
                            ReviewResult::new(
                                proposal.id,
                                reviewer_id.clone(),
                                ReviewDecision::Abstain,
                                0.0,
                                0.0,
                            )
                            .with_comment(Comment::new(
                                CommentType::Blocker,
                                "review deadline exceeded",
                            ))
                        }
                    };
                    let approved = matches!(
                        review.decision,
                        ReviewDecision::Accept | ReviewDecision::AcceptWithChanges
                    );
                    events.push(OrchestrationEvent::ReviewReceived {
                        task_id: task.id,
                        agent_id: reviewer_id,
                        approved,
                    });
                    self.publish_last(&events);
                    reviews.push(review);
                }

                let consensus = Consensus::compute(reviews, &specialized_ids);
                let had_conflict = !consensus.conflicts.is_empty();
                if had_conflict {
                    for conflict in &consensus.conflicts {
                        events.push(OrchestrationEvent::ConflictDetected {
                            task_id: task.id,
                            weight_fraction: conflict.weight_fraction,
                        });
                        self.publish_last(&events);
                    }
                } else {
                    events.push(OrchestrationEvent::ConsensusReached {
                        task_id: task.id,
                        approved: matches!(
                            consensus.decision,
                            ReviewDecision::Accept | ReviewDecision::AcceptWithChanges
                        ),
                    });
                    self.publish_last(&events);
                }
                self.metrics.record_review_round(had_conflict);
                Some(consensus)
            }
        } else {
            None
        };

        let approved = consensus
            .as_ref()
            .map(|c| matches!(c.decision, ReviewDecision::Accept | ReviewDecision::AcceptWithChanges))
            .unwrap_or(true);
        events.push(OrchestrationEvent::TaskCompleted {
            task_id: task.id,
            approved,
        });
        self.publish_last(&events);

        self.metrics
            .record_completion(lead_result.status, start.elapsed());
        OrchestrationResult::completed(task.id, lead.id.clone(), lead_result, consensus, events)
    }

    fn publish_last(&self, events: &[OrchestrationEvent]) {
        if let Some(event) = events.last() {
            self.event_bus.publish(event.clone());
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigil::agent::NullModel;
    use crate::sigil::task::{Priority, TaskType};

    fn lead_agent(response: &str) -> Agent {
        Agent::new(
            "lead-1",
            AgentRole::Lead,
            Arc::new(NullModel {
                response: response.to_string(),
            }),
        )
        .with_capability(Capability::CodeGeneration)
    }

    fn reviewer_agent(id: &str, response: &str) -> Agent {
        Agent::new(
            id,
            AgentRole::Reviewer,
            Arc::new(NullModel {
                response: response.to_string(),
            }),
        )
        .with_capability(Capability::CodeReview)
    }

    #[tokio::test]
    async fn happy_path_single_agent_no_reviewers() {
        let orchestrator = Orchestrator::new().with_review_enabled(false);
        orchestrator.start();
        orchestrator
            .register_agent(lead_agent("fn hi() -> &'static str { \"hi\" }"))
            .await
            .unwrap();

        let task = Task::new(TaskType::Generate, "write a function that returns the string 'hi'")
            .with_priority(Priority::Normal)
            .with_context(
                crate::sigil::task::Context::new().with_requirement("no side effects"),
            );

        let result = orchestrator.execute_task(task).await;
        assert!(result.is_success());
        assert_eq!(result.result.as_ref().unwrap().proposals.len(), 1);
        assert!(result.result.as_ref().unwrap().proposals[0].confidence > 0.0);
        assert!(matches!(result.events[0], OrchestrationEvent::TaskStarted { .. }));
        assert!(matches!(
            result.events.last().unwrap(),
            OrchestrationEvent::TaskCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn review_consensus_unanimous_accept() {
        let orchestrator = Orchestrator::new();
        orchestrator.start();
        orchestrator.register_agent(lead_agent("a proposal")).await.unwrap();
        let accept_json = r#"{"decision": "accept", "score": 0.9, "confidence": 1.0, "comments": []}"#;
        orchestrator
            .register_agent(reviewer_agent("reviewer-1", accept_json))
            .await
            .unwrap();
        orchestrator
            .register_agent(reviewer_agent("reviewer-2", accept_json))
            .await
            .unwrap();

        let task = Task::new(TaskType::Generate, "write something");
        let result = orchestrator.execute_task(task).await;

        let consensus = result.consensus.expect("consensus ran");
        assert_eq!(consensus.decision, ReviewDecision::Accept);
        assert!(consensus.aggregate_score > 0.85 && consensus.aggregate_score < 0.95);
        assert!(consensus.conflicts.is_empty());

        let review_completed = result
            .events
            .iter()
            .filter(|e| matches!(e, OrchestrationEvent::ReviewReceived { .. }))
            .count();
        assert_eq!(review_completed, 2);
        let consensus_events = result
            .events
            .iter()
            .filter(|e| matches!(e, OrchestrationEvent::ConsensusReached { .. }))
            .count();
        assert_eq!(consensus_events, 1);
    }

    #[tokio::test]
    async fn conflict_resolution_specialist_tips_the_balance() {
        let orchestrator = Orchestrator::new();
        orchestrator.start();
        orchestrator.register_agent(lead_agent("a proposal")).await.unwrap();

        // Numbers chosen so the specialist multiplier flips the weighted majority: without it
        // reject (0.3) trails accept (0.5); the 1.5x weight on the security reviewer's reject
        // pushes the reject total past accept. See `consensus.rs`'s own test for the identical
        // mechanic.
        let reject = r#"{"decision": "reject", "score": 0.3, "confidence": 1.0, "comments": []}"#;
        let accept = r#"{"decision": "accept", "score": 0.5, "confidence": 1.0, "comments": []}"#;
        let security_reject = r#"{"decision": "reject", "score": 0.3, "confidence": 1.0, "comments": []}"#;

        orchestrator.register_agent(reviewer_agent("r1", reject)).await.unwrap();
        orchestrator.register_agent(reviewer_agent("r2", accept)).await.unwrap();
        orchestrator
            .register_agent(
                reviewer_agent("r3", security_reject).with_specialization(
                    crate::sigil::agent::Specialization::Security,
                ),
            )
            .await
            .unwrap();

        let task = Task::new(TaskType::Generate, "write something")
            .with_context(Default::default());
        let result = orchestrator.execute_task(task).await;
        let consensus = result.consensus.expect("consensus ran");
        assert_eq!(consensus.decision, ReviewDecision::Reject);
        assert!(!consensus.conflicts.is_empty());
        let resolution = consensus.resolution.expect("resolution recorded");
        assert_eq!(
            resolution.method,
            crate::sigil::consensus::ResolutionMethod::WeightedMajority
        );
    }

    #[tokio::test]
    async fn no_eligible_lead_fails_with_no_agent_available() {
        let orchestrator = Orchestrator::new();
        orchestrator.start();
        let task = Task::new(TaskType::Generate, "write something");
        let result = orchestrator.execute_task(task).await;
        assert!(!result.is_success());
        assert!(matches!(result.events[0], OrchestrationEvent::TaskFailed { .. }));
    }

    #[tokio::test]
    async fn registration_rejects_duplicate_ids() {
        let orchestrator = Orchestrator::new();
        orchestrator.start();
        orchestrator.register_agent(lead_agent("x")).await.unwrap();
        let err = orchestrator.register_agent(lead_agent("y")).await;
        assert!(err.is_err());
        assert_eq!(orchestrator.get_agents().await.len(), 1);
    }

    #[tokio::test]
    async fn registration_rejects_past_the_agent_cap() {
        let orchestrator = Orchestrator::with_max_agents(1);
        orchestrator.start();
        orchestrator.register_agent(lead_agent("lead-1")).await.unwrap();
        let mut second = lead_agent("x");
        second.id = "lead-2".to_string();
        assert!(orchestrator.register_agent(second).await.is_err());
    }

    #[tokio::test]
    async fn registration_requires_running_orchestrator() {
        let orchestrator = Orchestrator::new();
        let err = orchestrator.register_agent(lead_agent("lead-1")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let orchestrator = Orchestrator::new();
        orchestrator.start();
        orchestrator.stop().await;
        orchestrator.stop().await;
        assert!(!orchestrator.is_running());
    }

    struct SlowModel {
        delay: std::time::Duration,
        response: String,
    }

    #[async_trait::async_trait]
    impl crate::sigil::model::Model for SlowModel {
        async fn run_prompt(
            &self,
            _input: crate::sigil::model::PromptInput,
        ) -> Result<crate::sigil::model::PromptOutput, crate::sigil::error::SigilError> {
            tokio::time::sleep(self.delay).await;
            Ok(crate::sigil::model::PromptOutput {
                text: self.response.clone(),
                tokens_used: 0,
                model: "slow".to_string(),
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
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_reviewer_is_recorded_as_an_abstaining_blocker_review() {
        let orchestrator = Orchestrator::new();
        orchestrator.start();
        orchestrator.register_agent(lead_agent("a proposal")).await.unwrap();
        let accept_json = r#"{"decision": "accept", "score": 0.9, "confidence": 1.0, "comments": []}"#;
        orchestrator
            .register_agent(reviewer_agent("on-time", accept_json))
            .await
            .unwrap();
        // Low priority gives a 120s deadline, so a 60s review deadline; this reviewer's model
        // takes 90s and never returns before the review window closes.
        orchestrator
            .register_agent(Agent::new(
                "slow-reviewer",
                AgentRole::Reviewer,
                Arc::new(SlowModel {
                    delay: std::time::Duration::from_secs(90),
                    response: accept_json.to_string(),
                }),
            ).with_capability(Capability::CodeReview))
            .await
            .unwrap();

        let task = Task::new(TaskType::Generate, "write something").with_priority(Priority::Low);
        let result = orchestrator.execute_task(task).await;

        let consensus = result.consensus.expect("consensus ran");
        assert_eq!(consensus.reviews.len(), 2);
        let timed_out = consensus
            .reviews
            .iter()
            .find(|r| r.reviewer_id == "slow-reviewer")
            .expect("slow reviewer's review was recorded");
        assert_eq!(timed_out.decision, ReviewDecision::Abstain);
        assert!(timed_out.has_blocker());
    }
}
