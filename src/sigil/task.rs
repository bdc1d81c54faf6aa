//! Task: a unit of work submitted to the orchestrator. Immutable once created.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Edit,
    Generate,
    Refactor,
    Document,
    Test,
    Review,
    Optimize,
    Analyze,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Edit => "edit",
            TaskType::Generate => "generate",
            TaskType::Refactor => "refactor",
            TaskType::Document => "document",
            TaskType::Test => "test",
            TaskType::Review => "review",
            TaskType::Optimize => "optimize",
            TaskType::Analyze => "analyze",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(TaskType::Edit),
            "generate" => Ok(TaskType::Generate),
            "refactor" => Ok(TaskType::Refactor),
            "document" => Ok(TaskType::Document),
            "test" => Ok(TaskType::Test),
            "review" => Ok(TaskType::Review),
            "optimize" => Ok(TaskType::Optimize),
            "analyze" => Ok(TaskType::Analyze),
            other => Err(format!("unknown task type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// A file referenced by a task's context: a path plus optional content and language tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReference {
    pub path: String,
    pub content: Option<String>,
    pub language: Option<String>,
}

impl FileReference {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
            language: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Free-form surrounding material for a task: referenced files plus requirements/constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub files: Vec<FileReference>,
    pub requirements: Vec<String>,
    pub constraints: Vec<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file: FileReference) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub description: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub context: Context,
}

impl Task {
    pub fn new(task_type: TaskType, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            description: description.into(),
            priority: Priority::Normal,
            created_at: Utc::now(),
            context: Context::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// The per-task deadline derived from priority, per the orchestrator's execution
    /// algorithm: critical has no bound.
    pub fn deadline(&self) -> Option<std::time::Duration> {
        match self.priority {
            Priority::Critical => None,
            Priority::High => Some(std::time::Duration::from_secs(10 * 60)),
            Priority::Normal => Some(std::time::Duration::from_secs(5 * 60)),
            Priority::Low => Some(std::time::Duration::from_secs(2 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_from_str_round_trip_for_task_type() {
        for t in [
            TaskType::Edit,
            TaskType::Generate,
            TaskType::Refactor,
            TaskType::Document,
            TaskType::Test,
            TaskType::Review,
            TaskType::Optimize,
            TaskType::Analyze,
        ] {
            let parsed: TaskType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn critical_priority_has_no_deadline() {
        let task = Task::new(TaskType::Generate, "x").with_priority(Priority::Critical);
        assert!(task.deadline().is_none());
    }

    #[test]
    fn low_priority_deadline_is_two_minutes() {
        let task = Task::new(TaskType::Generate, "x").with_priority(Priority::Low);
        assert_eq!(task.deadline(), Some(std::time::Duration::from_secs(120)));
    }
}
