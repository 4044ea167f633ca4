//! Vector Store Adapter (C2): a narrow, backend-agnostic contract over a
//! pluggable vector+metadata store. One concrete implementation ships
//! ([`sqlite::SqliteVectorStore`], backed by `sqlite-vec`); Redis/Chroma/
//! Pinecone-shaped adapters are swap-ins behind the same trait.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::filter::FilterExpr;
use crate::types::{MemoryId, MemoryPatch, MemoryRecord};

/// Parameters for a vector/filter search against the adapter.
#[derive(Debug, Clone, Default)]
pub struct VectorQuery {
    pub vector: Option<Vec<f32>>,
    pub filter: Option<FilterExpr>,
    pub limit: usize,
    pub offset: usize,
    pub distance_threshold: Option<f32>,
}

/// A single adapter-level search hit: id, cosine similarity (1.0 = identical,
/// meaningless when `vector` was absent from the query), and the full record.
#[derive(Debug, Clone)]
pub struct AdapterHit {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Uniform put/get/delete/search contract over the backing vector+metadata
/// store (§4.2). Implementations must make `put` idempotent on `id` and
/// `update_fields` atomic relative to concurrent `search`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a long-term record with full metadata and optional vector.
    async fn put(&self, record: &MemoryRecord) -> Result<()>;

    /// Fetch by primary id; `Ok(None)` if absent.
    async fn get(&self, id: MemoryId) -> Result<Option<MemoryRecord>>;

    /// Remove by primary id, in bulk.
    async fn delete(&self, ids: &[MemoryId]) -> Result<()>;

    /// Partial update restricted to enrichment-owned fields. Returns
    /// `NotFound` if `id` does not exist.
    async fn update_fields(&self, id: MemoryId, patch: &MemoryPatch) -> Result<()>;

    /// Vector and/or filter search. Always excludes records with
    /// `superseded_by != null` or `persisted_at = null` (invariants 1, 4).
    async fn search(&self, query: &VectorQuery) -> Result<Vec<AdapterHit>>;

    /// Exact cardinality for a filter expression (no limit/offset applied).
    async fn count(&self, filter: Option<&FilterExpr>) -> Result<u64>;

    /// Exact-hash lookup, restricted to non-superseded records — the
    /// primitive the Long-Term Memory Store's exact-dedup fast path (§4.4)
    /// is built on. Not part of the minimal adapter contract in §4.2, but
    /// every backend needs some equivalent of a hash secondary index to
    /// support create()'s dedup check without a full scan.
    async fn find_by_hash(&self, hash: &str) -> Result<Option<MemoryRecord>>;

    /// Allocate the next monotonic record id. Id assignment belongs to C4
    /// (§4.4 item 1), not the adapter, so that a non-SQLite backend can
    /// supply its own monotonic sequence.
    async fn next_id(&self) -> Result<MemoryId>;
}
