//! ReviewResult: a reviewer's verdict on a proposal.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewDecision {
    Accept,
    AcceptWithChanges,
    Reject,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentType {
    Info,
    Suggestion,
    Issue,
    Blocker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub comment_type: CommentType,
    pub message: String,
    pub location: Option<String>,
}

impl Comment {
    pub fn new(comment_type: CommentType, message: impl Into<String>) -> Self {
        Self {
            comment_type,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_blocker(&self) -> bool {
        self.comment_type == CommentType::Blocker
    }
}

/// A reviewer's verdict on a proposal: decision, score, confidence, an ordered list of comments,
/// and the reviewer's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub proposal_id: Uuid,
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    pub score: f64,
    pub confidence: f64,
    pub comments: Vec<Comment>,
}

impl ReviewResult {
    pub fn new(
        proposal_id: Uuid,
        reviewer_id: impl Into<String>,
        decision: ReviewDecision,
        score: f64,
        confidence: f64,
    ) -> Self {
        Self {
            proposal_id,
            reviewer_id: reviewer_id.into(),
            decision,
            score: score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            comments: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: Comment) -> Self {
        self.comments.push(comment);
        self
    }

    pub fn has_blocker(&self) -> bool {
        self.comments.iter().any(Comment::is_blocker)
    }

    /// The weight this review contributes to consensus arithmetic: `score * confidence`,
    /// multiplied by 1.5 if the reviewer is specialized for the task at hand.
    pub fn weight(&self, specialized: bool) -> f64 {
        let base = self.score * self.confidence;
        if specialized {
            base * 1.5
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_and_confidence_are_clamped() {
        let r = ReviewResult::new(Uuid::new_v4(), "reviewer-a", ReviewDecision::Accept, 2.0, -1.0);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn has_blocker_detects_blocker_comments() {
        let r = ReviewResult::new(Uuid::new_v4(), "reviewer-a", ReviewDecision::Reject, 0.2, 0.9)
            .with_comment(Comment::new(CommentType::Suggestion, "minor nit"))
            .with_comment(Comment::new(CommentType::Blocker, "breaks the build"));
        assert!(r.has_blocker());
    }

    #[test]
    fn specialized_weight_is_multiplied() {
        let r = ReviewResult::new(Uuid::new_v4(), "reviewer-a", ReviewDecision::Accept, 0.8, 0.5);
        assert_eq!(r.weight(false), 0.4);
        assert_eq!(r.weight(true), 0.6);
    }
}
