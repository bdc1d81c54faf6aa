//! Memory store: a directory of plain-text entries with a frontmatter header.
//!
//! A persistence collaborator offering store/list/search, kept deliberately out of the
//! orchestration core; this module is its concrete leaf, so the `Agent`'s prompt assembly
//! (memory entries become prior assistant turns) has something real to read from.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sigil::error::SigilError;

/// One memory entry: a frontmatter header plus a free-form body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub entry_type: String,
    pub timestamp: DateTime<Utc>,
    pub command: Option<String>,
    pub model: Option<String>,
    pub tags: Vec<String>,
    pub body: String,
}

impl MemoryEntry {
    pub fn new(entry_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entry_type: entry_type.into(),
            timestamp: Utc::now(),
            command: None,
            model: None,
            tags: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Render as `---`-delimited frontmatter followed by the body. Key order is fixed but
    /// parsing accepts any order.
    pub fn to_frontmatter(&self) -> String {
        let mut header = String::new();
        header.push_str("---\n");
        header.push_str(&format!("id: {}\n", self.id));
        header.push_str(&format!("type: {}\n", self.entry_type));
        header.push_str(&format!("timestamp: {}\n", self.timestamp.to_rfc3339()));
        if let Some(command) = &self.command {
            header.push_str(&format!("command: {}\n", command));
        }
        if let Some(model) = &self.model {
            header.push_str(&format!("model: {}\n", model));
        }
        if !self.tags.is_empty() {
            header.push_str(&format!("tags: {}\n", self.tags.join(",")));
        }
        header.push_str("---\n");
        header.push_str(&self.body);
        header
    }

    /// Parse a frontmatter-delimited document. Any key ordering within the header is accepted;
    /// `id`, `type`, and `timestamp` are required, everything else is optional.
    pub fn from_frontmatter(text: &str) -> Result<Self, SigilError> {
        let mut lines = text.lines();
        let first = lines
            .next()
            .ok_or_else(|| SigilError::input("parse-memory-entry", "empty document"))?;
        if first.trim() != "---" {
            return Err(SigilError::input(
                "parse-memory-entry",
                "document does not open with a '---' frontmatter delimiter",
            ));
        }

        let mut id = None;
        let mut entry_type = None;
        let mut timestamp = None;
        let mut command = None;
        let mut model = None;
        let mut tags = Vec::new();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut in_header = true;

        for line in lines {
            if in_header {
                if line.trim() == "---" {
                    in_header = false;
                    continue;
                }
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let key = key.trim();
                let value = value.trim();
                match key {
                    "id" => id = Some(value.to_string()),
                    "type" => entry_type = Some(value.to_string()),
                    "timestamp" => {
                        timestamp = Some(DateTime::parse_from_rfc3339(value).map_err(|e| {
                            SigilError::input("parse-memory-entry", e.to_string())
                        })?.with_timezone(&Utc));
                    }
                    "command" => command = Some(value.to_string()),
                    "model" => model = Some(value.to_string()),
                    "tags" => {
                        tags = value
                            .split(',')
                            .map(|t| t.trim().to_string())
                            .filter(|t| !t.is_empty())
                            .collect();
                    }
                    _ => {}
                }
            } else {
                body_lines.push(line);
            }
        }

        if in_header {
            return Err(SigilError::input(
                "parse-memory-entry",
                "frontmatter header was never closed with a second '---'",
            ));
        }

        Ok(Self {
            id: id.ok_or_else(|| SigilError::input("parse-memory-entry", "missing id"))?,
            entry_type: entry_type
                .ok_or_else(|| SigilError::input("parse-memory-entry", "missing type"))?,
            timestamp: timestamp
                .ok_or_else(|| SigilError::input("parse-memory-entry", "missing timestamp"))?,
            command,
            model,
            tags,
            body: body_lines.join("\n"),
        })
    }
}

/// Store/list/search contract for the memory collaborator.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, entry: MemoryEntry) -> Result<(), SigilError>;
    async fn list(&self) -> Result<Vec<MemoryEntry>, SigilError>;
    async fn search(&self, query: &str) -> Result<Vec<MemoryEntry>, SigilError>;
}

/// A directory of one frontmatter-delimited `.md` file per entry, named `<id>.md`.
pub struct FileMemoryStore {
    dir: PathBuf,
}

impl FileMemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    fn ensure_dir(&self) -> Result<(), SigilError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            SigilError::filesystem("memory-ensure-dir", e.to_string())
                .with_context("dir", self.dir.to_string_lossy())
        })
    }

    fn read_all(dir: &Path) -> Result<Vec<MemoryEntry>, SigilError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(dir).map_err(|e| {
            SigilError::filesystem("memory-list", e.to_string())
                .with_context("dir", dir.to_string_lossy())
        })?;
        for item in read_dir {
            let item = item.map_err(|e| SigilError::filesystem("memory-list", e.to_string()))?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let text = fs::read_to_string(&path)
                .map_err(|e| SigilError::filesystem("memory-read", e.to_string()))?;
            entries.push(MemoryEntry::from_frontmatter(&text)?);
        }
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> Result<(), SigilError> {
        self.ensure_dir()?;
        let path = self.entry_path(&entry.id);
        fs::write(&path, entry.to_frontmatter()).map_err(|e| {
            SigilError::filesystem("memory-store", e.to_string())
                .with_context("path", path.to_string_lossy())
        })
    }

    async fn list(&self) -> Result<Vec<MemoryEntry>, SigilError> {
        Self::read_all(&self.dir)
    }

    async fn search(&self, query: &str) -> Result<Vec<MemoryEntry>, SigilError> {
        let query = query.to_lowercase();
        Ok(Self::read_all(&self.dir)?
            .into_iter()
            .filter(|e| {
                e.body.to_lowercase().contains(&query)
                    || e.tags.iter().any(|t| t.to_lowercase().contains(&query))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_round_trips_all_fields() {
        let entry = MemoryEntry::new("session", "remember this")
            .with_command("cargo test")
            .with_model("openai:gpt-4o")
            .with_tags(vec!["testing".to_string(), "ci".to_string()]);
        let text = entry.to_frontmatter();
        let parsed = MemoryEntry::from_frontmatter(&text).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn frontmatter_parses_any_key_order() {
        let text = "---\ntype: note\ntimestamp: 2024-01-01T00:00:00Z\nid: abc\n---\nbody text";
        let parsed = MemoryEntry::from_frontmatter(text).unwrap();
        assert_eq!(parsed.id, "abc");
        assert_eq!(parsed.entry_type, "note");
        assert_eq!(parsed.body, "body text");
    }

    #[test]
    fn unterminated_header_is_rejected() {
        let text = "---\nid: abc\ntype: note\ntimestamp: 2024-01-01T00:00:00Z\n";
        assert!(MemoryEntry::from_frontmatter(text).is_err());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path());
        let entry = MemoryEntry::new("session", "hello world").with_tags(vec!["greeting".into()]);
        store.store(entry.clone()).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], entry);

        let found = store.search("hello").await.unwrap();
        assert_eq!(found.len(), 1);
        let not_found = store.search("nonexistent").await.unwrap();
        assert!(not_found.is_empty());
    }
}
