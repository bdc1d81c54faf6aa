//! Consensus: the orchestrator's aggregated verdict across a proposal's reviews.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sigil::review::{ReviewDecision, ReviewResult};

/// How a conflict among reviewers was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    WeightedMajority,
    BlockerEscalation,
}

/// A record of how a detected conflict was resolved: method, description, and a rationale
/// enumerating the influential reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub method: ResolutionMethod,
    pub description: String,
    pub rationale: Vec<String>,
}

impl Resolution {
    pub fn new(
        method: ResolutionMethod,
        description: impl Into<String>,
        rationale: Vec<String>,
    ) -> Self {
        Self {
            method,
            description: description.into(),
            rationale,
        }
    }
}

/// A detected split among reviewers: a decision class and the fraction of total weight it
/// commands. Recorded whenever that fraction exceeds the conflict threshold alongside at least
/// one other class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub decision: ReviewDecision,
    pub weight_fraction: f64,
}

/// The aggregated verdict across a proposal's reviews: decision, aggregate score, the
/// underlying reviews, any detected conflicts, and an optional resolution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    pub decision: ReviewDecision,
    pub aggregate_score: f64,
    pub reviews: Vec<ReviewResult>,
    pub conflicts: Vec<Conflict>,
    pub resolution: Option<Resolution>,
}

/// Fraction of total weight a decision class must exceed, alongside another class, to count as
/// a conflict.
const CONFLICT_THRESHOLD: f64 = 0.25;

impl Consensus {
    /// Compute consensus from a set of reviews, weighting each review's `score * confidence`
    /// (multiplied by 1.5 for reviewers in `specialized_reviewer_ids`). The decision is the
    /// weighted-majority class; the aggregate score is the weight-normalized mean of reviewer
    /// scores. A conflict exists iff at least two decision classes each exceed 25% of total
    /// weight.
    pub fn compute(reviews: Vec<ReviewResult>, specialized_reviewer_ids: &[String]) -> Self {
        if reviews.is_empty() {
            return Self {
                decision: ReviewDecision::Abstain,
                aggregate_score: 0.0,
                reviews,
                conflicts: Vec::new(),
                resolution: None,
            };
        }

        let mut weight_by_decision: HashMap<ReviewDecision, f64> = HashMap::new();
        let mut total_weight = 0.0_f64;
        let mut score_weight_sum = 0.0_f64;

        for review in &reviews {
            let specialized = specialized_reviewer_ids
                .iter()
                .any(|id| id == &review.reviewer_id);
            let weight = review.weight(specialized);
            *weight_by_decision.entry(review.decision).or_insert(0.0) += weight;
            total_weight += weight;
            score_weight_sum += review.score * weight;
        }

        let decision = weight_by_decision
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(decision, _)| *decision)
            .unwrap_or(ReviewDecision::Abstain);

        let aggregate_score = if total_weight > 0.0 {
            score_weight_sum / total_weight
        } else {
            0.0
        };

        let exceeding: Vec<Conflict> = if total_weight > 0.0 {
            weight_by_decision
                .iter()
                .filter_map(|(decision, weight)| {
                    let fraction = weight / total_weight;
                    if fraction > CONFLICT_THRESHOLD {
                        Some(Conflict {
                            decision: *decision,
                            weight_fraction: fraction,
                        })
                    } else {
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        // A conflict exists only when at least two decision classes each clear the threshold; a
        // lone dominant (or unanimous) class is not a conflict even though it exceeds 25%.
        let conflicts: Vec<Conflict> = if exceeding.len() >= 2 {
            exceeding
        } else {
            Vec::new()
        };

        let (decision, resolution) = if !conflicts.is_empty() {
            Self::resolve_conflict(&reviews, &weight_by_decision, decision)
        } else {
            (decision, None)
        };

        Self {
            decision,
            aggregate_score,
            reviews,
            conflicts,
            resolution,
        }
    }

    /// Resolve a detected conflict: prefer the weighted-majority decision already computed; if
    /// the vote is effectively tied, fall back to blocker escalation (accept-with-changes if any
    /// review carries a blocker comment, else reject). Returns the decision consensus should
    /// settle on alongside the resolution record describing how it got there.
    fn resolve_conflict(
        reviews: &[ReviewResult],
        weight_by_decision: &HashMap<ReviewDecision, f64>,
        majority_decision: ReviewDecision,
    ) -> (ReviewDecision, Option<Resolution>) {
        let mut sorted: Vec<(&ReviewDecision, &f64)> = weight_by_decision.iter().collect();
        sorted.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        let is_clear_majority = sorted.len() < 2 || sorted[0].1 > sorted[1].1;

        if is_clear_majority {
            let rationale = reviews
                .iter()
                .filter(|r| r.decision == majority_decision)
                .map(|r| format!("{}: score={:.2} confidence={:.2}", r.reviewer_id, r.score, r.confidence))
                .collect();
            let resolution = Resolution::new(
                ResolutionMethod::WeightedMajority,
                format!("{:?} carries the largest weighted share of reviews", majority_decision),
                rationale,
            );
            (majority_decision, Some(resolution))
        } else {
            let has_blocker = reviews.iter().any(ReviewResult::has_blocker);
            let decision = if has_blocker {
                ReviewDecision::AcceptWithChanges
            } else {
                ReviewDecision::Reject
            };
            let rationale = reviews
                .iter()
                .filter(|r| r.has_blocker())
                .map(|r| format!("{}: raised a blocker", r.reviewer_id))
                .collect();
            let resolution = Resolution::new(
                ResolutionMethod::BlockerEscalation,
                format!("no clear weighted majority; escalated to {:?}", decision),
                rationale,
            );
            (decision, Some(resolution))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn review(reviewer_id: &str, decision: ReviewDecision, score: f64, confidence: f64) -> ReviewResult {
        ReviewResult::new(Uuid::new_v4(), reviewer_id, decision, score, confidence)
    }

    #[test]
    fn unanimous_accept_has_no_conflicts() {
        let reviews = vec![
            review("r1", ReviewDecision::Accept, 0.9, 1.0),
            review("r2", ReviewDecision::Accept, 0.9, 1.0),
        ];
        let consensus = Consensus::compute(reviews, &[]);
        assert_eq!(consensus.decision, ReviewDecision::Accept);
        assert!(consensus.aggregate_score > 0.85 && consensus.aggregate_score < 0.95);
        assert!(consensus.conflicts.is_empty());
        assert!(consensus.resolution.is_none());
    }

    #[test]
    fn specialist_weight_tips_a_split_vote() {
        // Without the specialist multiplier, reject (0.3) trails accept (0.5). The 1.5x
        // specialist weighting on the security reviewer's reject pushes it to 0.75, flipping
        // the weighted majority.
        let reviews = vec![
            review("r1", ReviewDecision::Reject, 0.3, 1.0),
            review("r2", ReviewDecision::Accept, 0.5, 1.0),
            review("security", ReviewDecision::Reject, 0.3, 1.0),
        ];
        let consensus = Consensus::compute(reviews, &["security".to_string()]);
        assert_eq!(consensus.decision, ReviewDecision::Reject);
        assert!(!consensus.conflicts.is_empty());
        let resolution = consensus.resolution.expect("resolution recorded");
        assert_eq!(resolution.method, ResolutionMethod::WeightedMajority);
    }

    #[test]
    fn tied_vote_with_blocker_escalates_to_accept_with_changes() {
        use crate::sigil::review::{Comment, CommentType};

        // Equal weight (0.5 each) on two decision classes: no clear weighted majority.
        let reviews = vec![
            review("r1", ReviewDecision::Accept, 0.5, 1.0),
            review("r2", ReviewDecision::Reject, 0.5, 1.0)
                .with_comment(Comment::new(CommentType::Blocker, "breaks the build")),
        ];
        let consensus = Consensus::compute(reviews, &[]);
        assert_eq!(consensus.decision, ReviewDecision::AcceptWithChanges);
        assert!(!consensus.conflicts.is_empty());
        let resolution = consensus.resolution.expect("resolution recorded");
        assert_eq!(resolution.method, ResolutionMethod::BlockerEscalation);
    }

    #[test]
    fn tied_vote_without_blocker_escalates_to_reject() {
        let reviews = vec![
            review("r1", ReviewDecision::Accept, 0.5, 1.0),
            review("r2", ReviewDecision::Reject, 0.5, 1.0),
        ];
        let consensus = Consensus::compute(reviews, &[]);
        assert_eq!(consensus.decision, ReviewDecision::Reject);
        let resolution = consensus.resolution.expect("resolution recorded");
        assert_eq!(resolution.method, ResolutionMethod::BlockerEscalation);
    }

    #[test]
    fn empty_reviews_abstain() {
        let consensus = Consensus::compute(Vec::new(), &[]);
        assert_eq!(consensus.decision, ReviewDecision::Abstain);
        assert_eq!(consensus.aggregate_score, 0.0);
    }
}
