//! Proposal: one candidate solution produced by a lead agent, made up of one or more changes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The content transformation carried by a `Change`: either a full replacement body or a patch
/// to apply against the existing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transformation {
    Replacement { content: String },
    Patch { diff: String },
}

/// A single file-level change within a proposal: a path, a textual description, and the content
/// transformation to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub description: String,
    pub transformation: Transformation,
}

impl Change {
    pub fn replacement(
        path: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            transformation: Transformation::Replacement {
                content: content.into(),
            },
        }
    }

    pub fn patch(
        path: impl Into<String>,
        description: impl Into<String>,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            transformation: Transformation::Patch { diff: diff.into() },
        }
    }
}

/// One candidate solution produced by a lead: description, reasoning, confidence, and an
/// ordered list of changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub description: String,
    pub reasoning: String,
    pub confidence: f64,
    pub changes: Vec<Change>,
}

impl Proposal {
    pub fn new(
        task_id: Uuid,
        agent_id: impl Into<String>,
        description: impl Into<String>,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            agent_id: agent_id.into(),
            description: description.into(),
            reasoning: reasoning.into(),
            confidence: confidence.clamp(0.0, 1.0),
            changes: Vec::new(),
        }
    }

    pub fn with_change(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        let p = Proposal::new(Uuid::new_v4(), "agent-a", "desc", "reasoning", 1.5);
        assert_eq!(p.confidence, 1.0);
        let p = Proposal::new(Uuid::new_v4(), "agent-a", "desc", "reasoning", -0.5);
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn with_change_appends_in_order() {
        let p = Proposal::new(Uuid::new_v4(), "agent-a", "desc", "reasoning", 0.8)
            .with_change(Change::replacement("a.rs", "rewrite", "fn a() {}"))
            .with_change(Change::patch("b.rs", "tweak", "+line"));
        assert_eq!(p.changes.len(), 2);
        assert_eq!(p.changes[0].path, "a.rs");
        assert_eq!(p.changes[1].path, "b.rs");
    }
}
