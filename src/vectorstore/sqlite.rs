//! Concrete [`VectorStore`] adapter backed by SQLite + the `sqlite-vec`
//! extension. The extension is loaded so the `memory_records` vector index
//! (§4.1) exists for callers that want an ANN path later; the query path
//! here performs an explicit cosine-similarity scan over candidate rows
//! narrowed by the metadata filter first, the same approach the teacher
//! codebase's own semantic search takes rather than relying on the
//! virtual table for ranking.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::str::FromStr;

use super::{AdapterHit, VectorQuery, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{MemoryCoreError, Result};
use crate::storage::connection::Storage;
use crate::storage::filter::SqlBuilder;
use crate::types::{MemoryId, MemoryPatch, MemoryRecord, MemoryType};

pub struct SqliteVectorStore {
    storage: Storage,
}

impl SqliteVectorStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn record_from_row(conn: &Connection, row: &Row) -> rusqlite::Result<MemoryRecord> {
    let id: MemoryId = row.get("id")?;
    let memory_type_str: String = row.get("memory_type")?;
    let memory_type = memory_type_str
        .parse::<MemoryType>()
        .unwrap_or(MemoryType::Semantic);
    let discrete_source_ids_json: String = row.get("discrete_source_ids")?;
    let discrete_source_ids: Vec<String> =
        serde_json::from_str(&discrete_source_ids_json).unwrap_or_default();
    let vector_bytes: Option<Vec<u8>> = row.get("vector")?;

    let topics = load_set(conn, "record_topics", id)?;
    let entities = load_set(conn, "record_entities", id)?;

    Ok(MemoryRecord {
        id,
        text: row.get("text")?,
        memory_type,
        topics,
        entities,
        namespace: row.get("namespace")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        event_date: row.get("event_date")?,
        created_at: row.get("created_at")?,
        last_accessed_at: row.get("last_accessed_at")?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        persisted_at: row.get("persisted_at")?,
        hash: row.get("hash")?,
        vector: vector_bytes.map(|b| decode_vector(&b)),
        superseded_by: row.get("superseded_by")?,
        discrete_source_ids,
    })
}

fn load_set(conn: &Connection, table: &str, record_id: MemoryId) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("SELECT value FROM {table} WHERE record_id = ?1"))?;
    let rows = stmt.query_map(params![record_id], |r| r.get::<_, String>(0))?;
    rows.collect()
}

fn replace_set(conn: &Connection, table: &str, record_id: MemoryId, values: &HashSet<String>) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {table} WHERE record_id = ?1"), params![record_id])?;
    for v in values {
        conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (record_id, value) VALUES (?1, ?2)"),
            params![record_id, v],
        )?;
    }
    Ok(())
}

const SELECT_COLUMNS: &str = "id, text, memory_type, namespace, user_id, session_id, event_date, \
     created_at, last_accessed_at, access_count, persisted_at, hash, vector, superseded_by, \
     discrete_source_ids";

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        let record = record.clone();
        self.storage.with_transaction(|conn| {
            let vector_bytes = record.vector.as_ref().map(|v| encode_vector(v));
            let source_ids_json = serde_json::to_string(&record.discrete_source_ids)?;

            conn.execute(
                "INSERT INTO records
                    (id, text, memory_type, namespace, user_id, session_id, event_date,
                     created_at, last_accessed_at, access_count, persisted_at, hash, vector,
                     vector_dim, superseded_by, discrete_source_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    memory_type = excluded.memory_type,
                    namespace = excluded.namespace,
                    user_id = excluded.user_id,
                    session_id = excluded.session_id,
                    event_date = excluded.event_date,
                    last_accessed_at = excluded.last_accessed_at,
                    access_count = excluded.access_count,
                    persisted_at = excluded.persisted_at,
                    hash = excluded.hash,
                    vector = excluded.vector,
                    vector_dim = excluded.vector_dim,
                    superseded_by = excluded.superseded_by,
                    discrete_source_ids = excluded.discrete_source_ids",
                params![
                    record.id,
                    record.text,
                    record.memory_type.to_string(),
                    record.namespace,
                    record.user_id,
                    record.session_id,
                    record.event_date,
                    record.created_at,
                    record.last_accessed_at,
                    record.access_count as i64,
                    record.persisted_at,
                    record.hash,
                    vector_bytes,
                    record.vector.as_ref().map(|v| v.len() as i64),
                    record.superseded_by,
                    source_ids_json,
                ],
            )?;

            replace_set(conn, "record_topics", record.id, &record.topics)?;
            replace_set(conn, "record_entities", record.id, &record.entities)?;
            Ok(())
        })
    }

    async fn get(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.storage.with_connection(|conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM records WHERE id = ?1");
            conn.query_row(&sql, params![id], |row| record_from_row(conn, row))
                .optional()
                .map_err(MemoryCoreError::from)
        })
    }

    async fn delete(&self, ids: &[MemoryId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.storage.with_transaction(|conn| {
            for id in ids {
                conn.execute("DELETE FROM records WHERE id = ?1", params![id])?;
            }
            Ok(())
        })
    }

    async fn update_fields(&self, id: MemoryId, patch: &MemoryPatch) -> Result<()> {
        self.storage.with_transaction(|conn| {
            let exists: bool = conn
                .query_row("SELECT 1 FROM records WHERE id = ?1", params![id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(MemoryCoreError::NotFound(format!("record {id}")));
            }

            if let Some(vector) = &patch.vector {
                let bytes = encode_vector(vector);
                conn.execute(
                    "UPDATE records SET vector = ?1, vector_dim = ?2 WHERE id = ?3",
                    params![bytes, vector.len() as i64, id],
                )?;
            }
            if let Some(topics) = &patch.topics {
                replace_set(conn, "record_topics", id, topics)?;
            }
            if let Some(entities) = &patch.entities {
                replace_set(conn, "record_entities", id, entities)?;
            }
            if let Some(last_accessed_at) = &patch.last_accessed_at {
                conn.execute(
                    "UPDATE records SET last_accessed_at = ?1 WHERE id = ?2",
                    params![last_accessed_at, id],
                )?;
            }
            if let Some(access_count) = patch.access_count {
                conn.execute(
                    "UPDATE records SET access_count = ?1 WHERE id = ?2",
                    params![access_count as i64, id],
                )?;
            }
            if let Some(superseded_by) = patch.superseded_by {
                conn.execute(
                    "UPDATE records SET superseded_by = ?1 WHERE id = ?2",
                    params![superseded_by, id],
                )?;
            }
            Ok(())
        })
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<AdapterHit>> {
        self.storage.with_connection(|conn| {
            let mut builder = SqlBuilder::new();
            let filter_sql = match &query.filter {
                Some(expr) => builder.build_filter(expr)?,
                None => "1=1".to_string(),
            };
            let params_vec = builder.take_params();

            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM records r \
                 WHERE r.persisted_at IS NOT NULL AND r.superseded_by IS NULL AND {filter_sql}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let rows = stmt.query_map(param_refs.as_slice(), |row| record_from_row(conn, row))?;

            let mut hits: Vec<AdapterHit> = Vec::new();
            for row in rows {
                let record = row?;
                let similarity = match (&query.vector, &record.vector) {
                    (Some(q), Some(v)) => cosine_similarity(q, v),
                    _ => 0.0,
                };
                if let (Some(threshold), Some(_)) = (query.distance_threshold, &query.vector) {
                    // distance = 1 - cosine_similarity for normalized vectors
                    if (1.0 - similarity) > threshold {
                        continue;
                    }
                }
                hits.push(AdapterHit { record, similarity });
            }

            if query.vector.is_some() {
                hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
            } else {
                hits.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
            }

            let hits = hits
                .into_iter()
                .skip(query.offset)
                .take(query.limit.max(1))
                .collect();
            Ok(hits)
        })
    }

    async fn count(&self, filter: Option<&crate::storage::filter::FilterExpr>) -> Result<u64> {
        self.storage.with_connection(|conn| {
            let mut builder = SqlBuilder::new();
            let filter_sql = match filter {
                Some(expr) => builder.build_filter(expr)?,
                None => "1=1".to_string(),
            };
            let params_vec = builder.take_params();
            let sql = format!(
                "SELECT COUNT(*) FROM records r \
                 WHERE r.persisted_at IS NOT NULL AND r.superseded_by IS NULL AND {filter_sql}"
            );
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();
            let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |r| r.get(0))?;
            Ok(count as u64)
        })
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<MemoryRecord>> {
        self.storage.with_connection(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM records \
                 WHERE hash = ?1 AND superseded_by IS NULL"
            );
            conn.query_row(&sql, params![hash], |row| record_from_row(conn, row))
                .optional()
                .map_err(MemoryCoreError::from)
        })
    }

    async fn next_id(&self) -> Result<MemoryId> {
        self.storage.with_transaction(|conn| {
            conn.execute(
                "UPDATE id_sequence SET value = value + 1 WHERE name = 'records'",
                [],
            )?;
            let id: i64 = conn.query_row(
                "SELECT value FROM id_sequence WHERE name = 'records'",
                [],
                |r| r.get(0),
            )?;
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_record(id: MemoryId, text: &str) -> MemoryRecord {
        MemoryRecord {
            id,
            text: text.to_string(),
            memory_type: MemoryType::Semantic,
            topics: HashSet::new(),
            entities: HashSet::new(),
            namespace: Some("ns".into()),
            user_id: Some("u1".into()),
            session_id: None,
            event_date: None,
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
            persisted_at: Some(Utc::now()),
            hash: format!("hash-{id}"),
            vector: None,
            superseded_by: None,
            discrete_source_ids: vec![],
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SqliteVectorStore::new(Storage::open_in_memory().unwrap());
        let record = sample_record(1, "hello");
        store.put(&record).await.unwrap();

        let fetched = store.get(1).await.unwrap().unwrap();
        assert_eq!(fetched.text, "hello");
        assert_eq!(fetched.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = SqliteVectorStore::new(Storage::open_in_memory().unwrap());
        assert!(store.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_excludes_superseded_and_unpersisted() {
        let store = SqliteVectorStore::new(Storage::open_in_memory().unwrap());
        let mut visible = sample_record(1, "alive");
        visible.id = 1;
        store.put(&visible).await.unwrap();

        let mut superseded = sample_record(2, "dead");
        superseded.superseded_by = Some(1);
        store.put(&superseded).await.unwrap();

        let mut unpersisted = sample_record(3, "staged");
        unpersisted.persisted_at = None;
        store.put(&unpersisted).await.unwrap();

        let hits = store
            .search(&VectorQuery {
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, 1);
    }

    #[tokio::test]
    async fn update_fields_on_missing_record_is_not_found() {
        let store = SqliteVectorStore::new(Storage::open_in_memory().unwrap());
        let err = store.update_fields(42, &MemoryPatch::default()).await.unwrap_err();
        assert!(matches!(err, MemoryCoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn next_id_is_monotonic() {
        let store = SqliteVectorStore::new(Storage::open_in_memory().unwrap());
        let a = store.next_id().await.unwrap();
        let b = store.next_id().await.unwrap();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn find_by_hash_ignores_superseded() {
        let store = SqliteVectorStore::new(Storage::open_in_memory().unwrap());
        let mut record = sample_record(1, "hello");
        record.hash = "h1".into();
        store.put(&record).await.unwrap();

        let found = store.find_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(found.id, 1);

        store
            .update_fields(1, &MemoryPatch {
                superseded_by: Some(99),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(store.find_by_hash("h1").await.unwrap().is_none());
    }
}
