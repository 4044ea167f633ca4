//! Core data model: working memory, long-term memory records, and the
//! shared enums that describe them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::ulid::next_message_id;

/// Long-term record identity. Assigned monotonically by the store.
pub type MemoryId = i64;

/// Role of the speaker that produced a [`MemoryMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = crate::error::MemoryCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(crate::error::MemoryCoreError::InputInvalid(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

/// A single turn in a conversation staged in working memory.
///
/// `id` is a lexicographically sortable, monotonic identifier (ULID-shape):
/// ids generated within the same process strictly increase even across
/// messages produced in the same millisecond.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Coarse category of a long-term memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A fact or preference extracted independent of conversation time.
    Semantic,
    /// An event tied to a domain timestamp (`event_date`).
    Episodic,
    /// A raw, unextracted message promoted verbatim.
    Message,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryType::Semantic => "semantic",
            MemoryType::Episodic => "episodic",
            MemoryType::Message => "message",
        };
        f.write_str(s)
    }
}

impl FromStr for MemoryType {
    type Err = crate::error::MemoryCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(MemoryType::Semantic),
            "episodic" => Ok(MemoryType::Episodic),
            "message" => Ok(MemoryType::Message),
            other => Err(crate::error::MemoryCoreError::InputInvalid(format!(
                "unknown memory_type: {other}"
            ))),
        }
    }
}

/// Extraction strategy applied by the pipeline's ExtractFromSession stage.
///
/// A closed set plus one escape hatch: custom prompts are run through
/// [`crate::pipeline::strategy::validate_custom_prompt`] before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExtractionStrategy {
    /// Atomic facts/preferences as semantic records.
    Discrete,
    /// One episodic record summarizing the segment.
    Summary,
    /// Records restricted to first-person user traits.
    Preferences,
    /// Strategy-provided extraction prompt.
    Custom { prompt: String },
}

impl Default for ExtractionStrategy {
    fn default() -> Self {
        ExtractionStrategy::Discrete
    }
}

/// Session-scoped, ephemeral memory keyed by `(namespace, user_id, session_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub session_id: String,
    pub user_id: Option<String>,
    pub namespace: Option<String>,
    pub messages: Vec<MemoryMessage>,
    /// Staged records not yet promoted to long-term memory.
    pub memories: Vec<MemoryRecord>,
    /// Running summary of the conversation, if one has been produced.
    pub context: Option<String>,
    /// Opaque agent-specific scratch space.
    pub data: HashMap<String, serde_json::Value>,
    pub strategy: ExtractionStrategy,
    pub ttl_seconds: u64,
    /// Cached token count of `messages` + `context`; recomputed on write.
    pub tokens_estimate: u64,
    pub last_accessed_at: DateTime<Utc>,
    /// Highest message id whose promotion is known complete (invariant 6).
    pub promotion_watermark: Option<String>,
    /// Monotonic counter bumped whenever a summarization task is enqueued,
    /// so concurrent triggers for the same epoch coalesce into one task.
    pub summarization_epoch: u64,
}

impl WorkingMemory {
    pub fn new(session_id: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            namespace: None,
            messages: Vec::new(),
            memories: Vec::new(),
            context: None,
            data: HashMap::new(),
            strategy: ExtractionStrategy::default(),
            ttl_seconds,
            tokens_estimate: 0,
            last_accessed_at: Utc::now(),
            promotion_watermark: None,
            summarization_epoch: 0,
        }
    }
}

/// A persistent, individually searchable long-term memory record.
///
/// Immutable once `persisted_at` is set, except for the enrichment-owned
/// fields `vector`, `topics`, `entities`, `last_accessed_at`, `access_count`,
/// and `superseded_by` (invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub text: String,
    pub memory_type: MemoryType,
    pub topics: HashSet<String>,
    pub entities: HashSet<String>,
    pub namespace: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    /// Set exactly once when the record enters the long-term store.
    pub persisted_at: Option<DateTime<Utc>>,
    /// Deterministic content+identity hash; see `storage::long_term::compute_hash`.
    pub hash: String,
    pub vector: Option<Vec<f32>>,
    pub superseded_by: Option<MemoryId>,
    pub discrete_source_ids: Vec<String>,
}

impl MemoryRecord {
    /// True once the record has entered the long-term store (invariant 1).
    pub fn is_persisted(&self) -> bool {
        self.persisted_at.is_some()
    }

    /// True if this record has been soft-replaced and must be excluded from
    /// search results (invariant 4).
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// A candidate long-term record produced by an extraction or enrichment
/// stage, not yet assigned a store id.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub text: String,
    pub memory_type: MemoryType,
    pub namespace: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub discrete_source_ids: Vec<String>,
}

/// A field-level patch applied by `LongTermStore::update`. Every field is
/// enrichment-owned; anything else is rejected with `Conflict`.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub vector: Option<Vec<f32>>,
    pub topics: Option<HashSet<String>>,
    pub entities: Option<HashSet<String>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: Option<u64>,
    pub superseded_by: Option<MemoryId>,
}

/// A single search hit: the record plus the score it was ranked by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_message_ids_strictly_increase() {
        let a = MemoryMessage::new(Role::User, "hi");
        let b = MemoryMessage::new(Role::User, "there");
        assert!(b.id > a.id);
    }

    #[test]
    fn memory_type_round_trips() {
        for t in [MemoryType::Semantic, MemoryType::Episodic, MemoryType::Message] {
            assert_eq!(MemoryType::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn unpersisted_record_is_not_persisted() {
        let r = MemoryRecord {
            id: 1,
            text: "x".into(),
            memory_type: MemoryType::Semantic,
            topics: HashSet::new(),
            entities: HashSet::new(),
            namespace: None,
            user_id: None,
            session_id: None,
            event_date: None,
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
            persisted_at: None,
            hash: "h".into(),
            vector: None,
            superseded_by: None,
            discrete_source_ids: vec![],
        };
        assert!(!r.is_persisted());
        assert!(!r.is_superseded());
    }
}
