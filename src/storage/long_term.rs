//! Long-Term Memory Store (C4): a thin facade over the [`VectorStore`]
//! adapter that owns the content+identity hash, the exact-dedup fast path,
//! and the invariants from §3.2 that the adapter itself does not enforce.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{MemoryCoreError, Result};
use crate::types::{CandidateRecord, MemoryId, MemoryPatch, MemoryRecord};
use crate::vectorstore::VectorStore;

const FIELD_SEP: u8 = 0x1F;

/// `sha256(lowercase_trim(text) ||0x1F|| user_id ||0x1F|| namespace ||0x1F||
/// session_id ||0x1F|| memory_type ||0x1F|| event_date_iso_or_empty)`.
pub fn compute_hash(candidate: &CandidateRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(candidate.text.trim().to_lowercase().as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(candidate.user_id.as_deref().unwrap_or("").as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(candidate.namespace.as_deref().unwrap_or("").as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(candidate.session_id.as_deref().unwrap_or("").as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(candidate.memory_type.to_string().as_bytes());
    hasher.update([FIELD_SEP]);
    let event_date = candidate
        .event_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();
    hasher.update(event_date.as_bytes());
    hex::encode(hasher.finalize())
}

/// Facade over a [`VectorStore`] implementing C4's create/update/supersede/
/// touch operations and the invariants §3.2 assigns to this layer.
pub struct LongTermStore {
    adapter: Arc<dyn VectorStore>,
    max_chain_depth: usize,
}

impl LongTermStore {
    pub fn new(adapter: Arc<dyn VectorStore>, max_chain_depth: usize) -> Self {
        Self {
            adapter,
            max_chain_depth,
        }
    }

    /// Assigns an id if absent, computes the hash, and either returns the
    /// existing non-superseded record with that hash (exact-dedup fast
    /// path) or persists a new one with enrichment fields empty.
    pub async fn create(&self, candidate: CandidateRecord) -> Result<MemoryRecord> {
        let hash = compute_hash(&candidate);

        if let Some(existing) = self.adapter.find_by_hash(&hash).await? {
            return Ok(existing);
        }

        let id = self.adapter.next_id().await?;
        let now = Utc::now();
        let record = MemoryRecord {
            id,
            text: candidate.text,
            memory_type: candidate.memory_type,
            topics: Default::default(),
            entities: Default::default(),
            namespace: candidate.namespace,
            user_id: candidate.user_id,
            session_id: candidate.session_id,
            event_date: candidate.event_date,
            created_at: now,
            last_accessed_at: None,
            access_count: 0,
            persisted_at: Some(now),
            hash,
            vector: None,
            superseded_by: None,
            discrete_source_ids: candidate.discrete_source_ids,
        };

        self.adapter.put(&record).await?;
        Ok(record)
    }

    /// Applies an enrichment-owned patch. The adapter itself validates
    /// invariant 3 by only ever touching those columns; here we just
    /// confirm the target exists so callers get `NotFound` rather than a
    /// silent no-op.
    pub async fn update(&self, id: MemoryId, patch: MemoryPatch) -> Result<()> {
        self.adapter.update_fields(id, &patch).await
    }

    /// Sets `old_id.superseded_by = new_id`, idempotent, refusing to create
    /// a cycle by walking `new_id`'s existing chain up to the configured
    /// depth cap.
    pub async fn supersede(&self, old_id: MemoryId, new_id: MemoryId) -> Result<()> {
        if old_id == new_id {
            return Err(MemoryCoreError::Conflict(
                "a record cannot supersede itself".into(),
            ));
        }

        let mut cursor = new_id;
        for _ in 0..self.max_chain_depth {
            if cursor == old_id {
                return Err(MemoryCoreError::Conflict(format!(
                    "supersede({old_id}, {new_id}) would create a cycle"
                )));
            }
            let Some(record) = self.adapter.get(cursor).await? else {
                break;
            };
            match record.superseded_by {
                Some(next) => cursor = next,
                None => break,
            }
        }
        if cursor == old_id {
            return Err(MemoryCoreError::Conflict(format!(
                "supersede({old_id}, {new_id}) would create a cycle"
            )));
        }

        let existing = self
            .adapter
            .get(old_id)
            .await?
            .ok_or_else(|| MemoryCoreError::NotFound(format!("record {old_id}")))?;
        if existing.superseded_by == Some(new_id) {
            return Ok(());
        }

        self.adapter
            .update_fields(
                old_id,
                &MemoryPatch {
                    superseded_by: Some(new_id),
                    ..Default::default()
                },
            )
            .await
    }

    /// Bumps `last_accessed_at` to now and increments `access_count` for
    /// every id, best-effort per id (a missing id is silently skipped —
    /// the caller scheduled this as a background side effect, not a
    /// user-facing operation).
    pub async fn touch(&self, ids: &[MemoryId]) -> Result<()> {
        let now = Utc::now();
        for &id in ids {
            let Some(record) = self.adapter.get(id).await? else {
                continue;
            };
            self.adapter
                .update_fields(
                    id,
                    &MemoryPatch {
                        last_accessed_at: Some(now),
                        access_count: Some(record.access_count + 1),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }
}
