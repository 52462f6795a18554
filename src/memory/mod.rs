//! Hierarchical context assembly and durable semantic memory.
//!
//! The service answers one question for every node execution: what is the
//! smallest sufficient context? [`MemoryService::load_context`] assembles a
//! [`ContextBundle`] in strict priority order (task data, project summary,
//! recent session history, then semantically similar prior memories) so
//! callers can truncate from the tail before exhausting a model's context
//! window, and the cheapest, most specific context always survives.
//!
//! Memory records are append-only and never mutated; project summaries and
//! task data are plain data pushed in by the surrounding application (the
//! engine never queries the relational store).

pub mod embedder;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;

pub use embedder::{Embedder, EmbedderError, HashEmbedder};

/// Metadata attached to every memory record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    /// Free-form classification, e.g. "node_output" or "research_report".
    pub record_type: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryMetadata {
    #[must_use]
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            project_id: None,
            session_id: None,
            record_type: record_type.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A durably stored, embedding-indexed piece of content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
}

/// A memory record paired with its similarity to a query.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub similarity: f32,
}

/// One recent conversational/history entry for a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Context assembled for one node execution, in priority order.
#[derive(Clone, Debug, Default)]
pub struct ContextBundle {
    /// The task's own data, when the session is task-scoped.
    pub task: Option<Value>,
    /// Short project summary supplied by the application.
    pub project_summary: Option<String>,
    /// Last N history entries for the session, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Top-K semantically similar prior memories for the project.
    pub similar: Vec<ScoredMemory>,
}

impl ContextBundle {
    /// Render the bundle as system messages, preserving priority order so
    /// downstream truncation drops the cheapest-to-lose context last.
    #[must_use]
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(task) = &self.task {
            messages.push(Message::system(format!("Task data: {task}")));
        }
        if let Some(summary) = &self.project_summary {
            messages.push(Message::system(format!("Project summary: {summary}")));
        }
        for entry in &self.history {
            messages.push(Message::system(format!(
                "Earlier step [{}]: {}",
                entry.node, entry.content
            )));
        }
        for scored in &self.similar {
            messages.push(Message::system(format!(
                "Related memory ({}): {}",
                scored.record.metadata.record_type, scored.record.content
            )));
        }
        messages
    }

    /// Whether the bundle carries any context at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.task.is_none()
            && self.project_summary.is_none()
            && self.history.is_empty()
            && self.similar.is_empty()
    }
}

/// Errors surfaced by the memory service.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedder(#[from] EmbedderError),
}

/// Tuning knobs for context assembly.
#[derive(Clone, Copy, Debug)]
pub struct MemoryConfig {
    /// How many recent history entries to include in context (default 10).
    pub history_limit: usize,
    /// How many similar memories to include in context (default 5).
    pub search_limit: usize,
    /// Per-session cap on retained history entries.
    pub history_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            search_limit: 5,
            history_capacity: 64,
        }
    }
}

/// In-process memory/context service backed by a swappable [`Embedder`].
///
/// Writes are append-only: records and history entries are never mutated,
/// which keeps the service free of write-write conflicts under concurrent
/// sessions. `store` completes the write before returning, so there are no
/// fire-and-forget drops, but callers are not expected to block workflow
/// state updates on anything beyond that.
pub struct MemoryService {
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
    records: Mutex<Vec<MemoryRecord>>,
    summaries: Mutex<FxHashMap<String, String>>,
    tasks: Mutex<FxHashMap<String, Value>>,
    history: Mutex<FxHashMap<String, VecDeque<HistoryEntry>>>,
}

impl MemoryService {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, config: MemoryConfig) -> Self {
        Self {
            embedder,
            config,
            records: Mutex::new(Vec::new()),
            summaries: Mutex::new(FxHashMap::default()),
            tasks: Mutex::new(FxHashMap::default()),
            history: Mutex::new(FxHashMap::default()),
        }
    }

    /// Service with the deterministic local embedder and default limits.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(HashEmbedder::default()), MemoryConfig::default())
    }

    /// Install/replace the short project summary (application-supplied).
    pub fn set_project_summary(&self, project_id: impl Into<String>, summary: impl Into<String>) {
        self.summaries.lock().insert(project_id.into(), summary.into());
    }

    /// Install/replace task data (application-supplied).
    pub fn set_task_data(&self, task_id: impl Into<String>, data: Value) {
        self.tasks.lock().insert(task_id.into(), data);
    }

    /// Append a history entry for a session, evicting the oldest beyond
    /// the retention capacity.
    pub fn push_history(
        &self,
        session_id: &str,
        node: impl Into<String>,
        content: impl Into<String>,
    ) {
        let mut history = self.history.lock();
        let entries = history.entry(session_id.to_string()).or_default();
        entries.push_back(HistoryEntry {
            node: node.into(),
            content: content.into(),
            at: Utc::now(),
        });
        while entries.len() > self.config.history_capacity {
            entries.pop_front();
        }
    }

    /// Assemble context for one node execution.
    ///
    /// Ordering is a cost-control measure: task data and the project
    /// summary are cheap and specific, history is bounded, and the
    /// similarity search is last so callers may truncate it first.
    pub async fn load_context(
        &self,
        project_id: Option<&str>,
        session_id: &str,
        task_id: Option<&str>,
    ) -> Result<ContextBundle, MemoryError> {
        let task = task_id.and_then(|id| self.tasks.lock().get(id).cloned());
        let project_summary = project_id.and_then(|id| self.summaries.lock().get(id).cloned());

        let history = {
            let history = self.history.lock();
            history
                .get(session_id)
                .map(|entries| {
                    let skip = entries.len().saturating_sub(self.config.history_limit);
                    entries.iter().skip(skip).cloned().collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        // Seed the similarity query from the freshest session activity;
        // with no history yet there is nothing meaningful to search for.
        let similar = match (project_id, history.last()) {
            (Some(project), Some(latest)) => {
                self.search(&latest.content, project, self.config.search_limit)
                    .await?
            }
            _ => Vec::new(),
        };

        Ok(ContextBundle {
            task,
            project_summary,
            history,
            similar,
        })
    }

    /// Embed and persist one memory record. The record is durable (within
    /// this store) once this returns.
    pub async fn store(
        &self,
        content: impl Into<String>,
        metadata: MemoryMetadata,
    ) -> Result<MemoryRecord, MemoryError> {
        let content = content.into();
        let embedding = self.embedder.embed(&content).await?;
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            content,
            embedding,
            metadata,
        };
        self.records.lock().push(record.clone());
        tracing::debug!(
            record_id = %record.id,
            record_type = %record.metadata.record_type,
            "memory record stored"
        );
        Ok(record)
    }

    /// Nearest-neighbor search over stored records, filtered to a project.
    ///
    /// Returns up to `limit` records ranked by cosine similarity
    /// descending; an empty result is not an error.
    pub async fn search(
        &self,
        query: &str,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            // An unembeddable query matches nothing rather than failing.
            Err(EmbedderError::EmptyContent) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records = self.records.lock();
        let mut scored: Vec<ScoredMemory> = records
            .iter()
            .filter(|r| r.metadata.project_id.as_deref() == Some(project_id))
            .map(|r| ScoredMemory {
                similarity: cosine_similarity(&query_embedding, &r.embedding),
                record: r.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Number of stored memory records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

/// Cosine similarity between two vectors; 0.0 when either is degenerate.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn search_filters_by_project_and_ranks() {
        let service = MemoryService::in_memory();
        service
            .store(
                "sprint planning and task estimates",
                MemoryMetadata::new("node_output").with_project_id("p1"),
            )
            .await
            .unwrap();
        service
            .store(
                "completely unrelated penguin trivia",
                MemoryMetadata::new("node_output").with_project_id("p1"),
            )
            .await
            .unwrap();
        service
            .store(
                "task estimates for another project",
                MemoryMetadata::new("node_output").with_project_id("p2"),
            )
            .await
            .unwrap();

        let results = service
            .search("estimates for sprint tasks", "p1", 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].similarity >= results[1].similarity);
        assert!(results[0].record.content.contains("sprint planning"));
    }

    #[tokio::test]
    async fn empty_search_is_not_an_error() {
        let service = MemoryService::in_memory();
        assert!(service.search("anything", "ghost", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_is_assembled_in_priority_order() {
        let service = MemoryService::in_memory();
        service.set_project_summary("p1", "A project about widgets");
        service.set_task_data("t1", json!({"title": "ship widget v2"}));
        service.push_history("s1", "gather", "collected widget specs");
        service
            .store(
                "widget specs from last quarter",
                MemoryMetadata::new("research").with_project_id("p1"),
            )
            .await
            .unwrap();

        let bundle = service
            .load_context(Some("p1"), "s1", Some("t1"))
            .await
            .unwrap();
        assert!(bundle.task.is_some());
        assert_eq!(bundle.project_summary.as_deref(), Some("A project about widgets"));
        assert_eq!(bundle.history.len(), 1);
        assert_eq!(bundle.similar.len(), 1);

        let messages = bundle.to_messages();
        assert!(messages[0].content.starts_with("Task data:"));
        assert!(messages[1].content.starts_with("Project summary:"));
        assert!(messages[2].content.starts_with("Earlier step"));
        assert!(messages[3].content.starts_with("Related memory"));
    }

    #[tokio::test]
    async fn history_respects_limit_and_capacity() {
        let config = MemoryConfig {
            history_limit: 3,
            search_limit: 5,
            history_capacity: 5,
        };
        let service = MemoryService::new(Arc::new(HashEmbedder::default()), config);
        for i in 0..10 {
            service.push_history("s1", "node", format!("entry {i}"));
        }
        let bundle = service.load_context(None, "s1", None).await.unwrap();
        assert_eq!(bundle.history.len(), 3);
        assert_eq!(bundle.history.last().unwrap().content, "entry 9");
    }
}
