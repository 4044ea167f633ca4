//! Working Memory Store (C3): a short-lived, session-scoped store for
//! in-flight conversation turns and records staged for promotion.
//!
//! Per-key writes are serialized through a `DashMap` of per-key mutexes so
//! concurrent callers for the same session never interleave partial
//! updates, while reads stay lock-free (§5).

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use rusqlite::{params, OptionalExtension};
use tiktoken_rs::CoreBPE;

use crate::config::ConfigHandle;
use crate::error::Result;
use crate::storage::connection::Storage;
use crate::types::{ExtractionStrategy, MemoryMessage, MemoryRecord, Role, WorkingMemory};

static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());

/// Token count for a piece of text. Falls back to a `len/4` heuristic if
/// the `cl100k_base` vocabulary failed to load (§9 "pluggable-with-fallback").
fn estimate_tokens(text: &str) -> u64 {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        None => {
            if text.is_empty() {
                0
            } else {
                (text.len() as u64 / 4).max(1)
            }
        }
    }
}

fn tokens_for(wm: &WorkingMemory) -> u64 {
    let mut total: u64 = wm.context.as_deref().map(estimate_tokens).unwrap_or(0);
    for m in &wm.messages {
        total += estimate_tokens(&m.content);
    }
    total
}

/// Sink for background tasks emitted by this store (currently just
/// `SummarizeSession`). `runtime::queue::TaskQueue` implements this.
pub trait TaskSink: Send + Sync {
    fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()>;
}

pub struct WorkingMemoryStore {
    storage: Storage,
    config: ConfigHandle,
    locks: dashmap::DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    task_sink: Option<Arc<dyn TaskSink>>,
}

impl WorkingMemoryStore {
    pub fn new(storage: Storage, config: ConfigHandle) -> Self {
        Self {
            storage,
            config,
            locks: dashmap::DashMap::new(),
            task_sink: None,
        }
    }

    pub fn with_task_sink(mut self, sink: Arc<dyn TaskSink>) -> Self {
        self.task_sink = Some(sink);
        self
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn get(&self, key: &str, recent_messages_limit: Option<usize>) -> Result<Option<WorkingMemory>> {
        self.storage.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, user_id, namespace, context, data, strategy, ttl_seconds, \
                     tokens_estimate, last_accessed_at, promotion_watermark, summarization_epoch \
                     FROM working_memory WHERE key = ?1",
                    params![key],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, Option<String>>(1)?,
                            r.get::<_, Option<String>>(2)?,
                            r.get::<_, Option<String>>(3)?,
                            r.get::<_, String>(4)?,
                            r.get::<_, String>(5)?,
                            r.get::<_, i64>(6)?,
                            r.get::<_, i64>(7)?,
                            r.get::<_, chrono::DateTime<Utc>>(8)?,
                            r.get::<_, Option<String>>(9)?,
                            r.get::<_, i64>(10)?,
                        ))
                    },
                )
                .optional()?;

            let Some((
                session_id,
                user_id,
                namespace,
                context,
                data_json,
                strategy_json,
                ttl_seconds,
                tokens_estimate,
                last_accessed_at,
                promotion_watermark,
                summarization_epoch,
            )) = row
            else {
                return Ok(None);
            };

            let limit_sql = recent_messages_limit
                .map(|n| format!(" ORDER BY id DESC LIMIT {n}"))
                .unwrap_or_else(|| " ORDER BY id ASC".to_string());
            let sql = format!(
                "SELECT id, role, content, created_at FROM working_memory_messages \
                 WHERE wm_key = ?1{limit_sql}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages: Vec<MemoryMessage> = stmt
                .query_map(params![key], |r| {
                    let role_str: String = r.get(1)?;
                    Ok(MemoryMessage {
                        id: r.get(0)?,
                        role: role_str.parse::<Role>().unwrap_or(Role::User),
                        content: r.get(2)?,
                        created_at: r.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;
            if recent_messages_limit.is_some() {
                messages.sort_by(|a, b| a.id.cmp(&b.id));
            }

            let mut stmt = conn.prepare(
                "SELECT record FROM working_memory_staged WHERE wm_key = ?1 ORDER BY seq ASC",
            )?;
            let memories: Vec<MemoryRecord> = stmt
                .query_map(params![key], |r| r.get::<_, String>(0))?
                .filter_map(|json| json.ok())
                .filter_map(|json| serde_json::from_str(&json).ok())
                .collect();

            let data = serde_json::from_str(&data_json).unwrap_or_default();
            let strategy: ExtractionStrategy =
                serde_json::from_str(&strategy_json).unwrap_or_default();

            Ok(Some(WorkingMemory {
                session_id,
                user_id,
                namespace,
                messages,
                memories,
                context,
                data,
                strategy,
                ttl_seconds: ttl_seconds as u64,
                tokens_estimate: tokens_estimate as u64,
                last_accessed_at,
                promotion_watermark,
                summarization_epoch: summarization_epoch as u64,
            }))
        })
    }

    /// Whole-object replace. Assigns `last_accessed_at = now` and renews the
    /// TTL; recomputes `tokens_estimate` from the object as given.
    pub async fn set(&self, key: &str, mut wm: WorkingMemory) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        wm.last_accessed_at = Utc::now();
        wm.tokens_estimate = tokens_for(&wm);

        self.storage.with_transaction(|conn| {
            let data_json = serde_json::to_string(&wm.data)?;
            let strategy_json = serde_json::to_string(&wm.strategy)?;

            conn.execute(
                "INSERT INTO working_memory
                    (key, session_id, user_id, namespace, context, data, strategy, ttl_seconds,
                     tokens_estimate, last_accessed_at, promotion_watermark, summarization_epoch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(key) DO UPDATE SET
                    session_id = excluded.session_id,
                    user_id = excluded.user_id,
                    namespace = excluded.namespace,
                    context = excluded.context,
                    data = excluded.data,
                    strategy = excluded.strategy,
                    ttl_seconds = excluded.ttl_seconds,
                    tokens_estimate = excluded.tokens_estimate,
                    last_accessed_at = excluded.last_accessed_at,
                    promotion_watermark = excluded.promotion_watermark,
                    summarization_epoch = excluded.summarization_epoch",
                params![
                    key,
                    wm.session_id,
                    wm.user_id,
                    wm.namespace,
                    wm.context,
                    data_json,
                    strategy_json,
                    wm.ttl_seconds as i64,
                    wm.tokens_estimate as i64,
                    wm.last_accessed_at,
                    wm.promotion_watermark,
                    wm.summarization_epoch as i64,
                ],
            )?;

            conn.execute(
                "DELETE FROM working_memory_messages WHERE wm_key = ?1",
                params![key],
            )?;
            for m in &wm.messages {
                conn.execute(
                    "INSERT INTO working_memory_messages (wm_key, id, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![key, m.id, m.role.to_string(), m.content, m.created_at],
                )?;
            }

            conn.execute(
                "DELETE FROM working_memory_staged WHERE wm_key = ?1",
                params![key],
            )?;
            for (seq, record) in wm.memories.iter().enumerate() {
                let mut record = record.clone();
                record.persisted_at = None;
                let json = serde_json::to_string(&record)?;
                conn.execute(
                    "INSERT INTO working_memory_staged (wm_key, seq, record) VALUES (?1, ?2, ?3)",
                    params![key, seq as i64, json],
                )?;
            }

            Ok(())
        })
    }

    /// Atomic append; returns the ids of the appended messages (already
    /// assigned by `MemoryMessage::new` before the call). May trigger a
    /// `SummarizeSession` task if the token ratio crosses the threshold.
    pub async fn append_messages(&self, key: &str, messages: Vec<MemoryMessage>) -> Result<Vec<String>> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let added_tokens: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();

        let (new_tokens_estimate, epoch, should_summarize) = self.storage.with_transaction(|conn| {
            for m in &messages {
                conn.execute(
                    "INSERT INTO working_memory_messages (wm_key, id, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![key, m.id, m.role.to_string(), m.content, m.created_at],
                )?;
            }

            let (tokens_estimate, epoch): (i64, i64) = conn.query_row(
                "SELECT tokens_estimate, summarization_epoch FROM working_memory WHERE key = ?1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            let new_tokens_estimate = tokens_estimate + added_tokens as i64;

            conn.execute(
                "UPDATE working_memory SET tokens_estimate = ?1, last_accessed_at = ?2 WHERE key = ?3",
                params![new_tokens_estimate, Utc::now(), key],
            )?;

            Ok((new_tokens_estimate as u64, epoch as u64, false))
        })?;
        let _ = should_summarize;

        let config = self.config.current();
        let ratio = new_tokens_estimate as f32 / config.context_window_max.max(1) as f32;
        if ratio >= config.summarization_threshold {
            let next_epoch = epoch + 1;
            let claimed = self.storage.with_transaction(|conn| {
                let current: i64 = conn.query_row(
                    "SELECT summarization_epoch FROM working_memory WHERE key = ?1",
                    params![key],
                    |r| r.get(0),
                )?;
                if current as u64 == epoch {
                    conn.execute(
                        "UPDATE working_memory SET summarization_epoch = ?1 WHERE key = ?2",
                        params![next_epoch as i64, key],
                    )?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            })?;

            if claimed {
                if let Some(sink) = &self.task_sink {
                    sink.enqueue(
                        "SummarizeSession",
                        serde_json::json!({ "key": key, "epoch": next_epoch }),
                    )?;
                }
            }
        }

        Ok(ids)
    }

    /// Appends to `memories`, forcing `persisted_at = null` on each per §4.3.
    pub async fn stage_memories(&self, key: &str, records: Vec<MemoryRecord>) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        self.storage.with_transaction(|conn| {
            let base: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), -1) FROM working_memory_staged WHERE wm_key = ?1",
                    params![key],
                    |r| r.get(0),
                )
                .unwrap_or(-1);

            for (offset, record) in records.iter().enumerate() {
                let mut record = record.clone();
                record.persisted_at = None;
                let json = serde_json::to_string(&record)?;
                conn.execute(
                    "INSERT INTO working_memory_staged (wm_key, seq, record) VALUES (?1, ?2, ?3)",
                    params![key, base + 1 + offset as i64, json],
                )?;
            }
            Ok(())
        })
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        self.storage.with_transaction(|conn| {
            conn.execute("DELETE FROM working_memory WHERE key = ?1", params![key])?;
            Ok(())
        })?;
        self.locks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        calls: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    impl TaskSink for RecordingSink {
        fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()> {
            self.calls.lock().unwrap().push((task_name.to_string(), args));
            Ok(())
        }
    }

    fn store() -> WorkingMemoryStore {
        WorkingMemoryStore::new(Storage::open_in_memory().unwrap(), ConfigHandle::default())
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = store();
        let wm = WorkingMemory::new("s1", 3600);
        store.set("wm:s1", wm).await.unwrap();

        let fetched = store.get("wm:s1", None).await.unwrap().unwrap();
        assert_eq!(fetched.session_id, "s1");
    }

    #[tokio::test]
    async fn append_messages_returns_ids_and_persists() {
        let store = store();
        store.set("wm:s1", WorkingMemory::new("s1", 3600)).await.unwrap();

        let msgs = vec![
            MemoryMessage::new(Role::User, "hello"),
            MemoryMessage::new(Role::Assistant, "hi there"),
        ];
        let expected_ids: Vec<String> = msgs.iter().map(|m| m.id.clone()).collect();
        let ids = store.append_messages("wm:s1", msgs).await.unwrap();
        assert_eq!(ids, expected_ids);

        let fetched = store.get("wm:s1", None).await.unwrap().unwrap();
        assert_eq!(fetched.messages.len(), 2);
    }

    #[tokio::test]
    async fn recent_messages_limit_returns_tail_in_order() {
        let store = store();
        store.set("wm:s1", WorkingMemory::new("s1", 3600)).await.unwrap();
        for i in 0..5 {
            store
                .append_messages("wm:s1", vec![MemoryMessage::new(Role::User, format!("m{i}"))])
                .await
                .unwrap();
        }

        let fetched = store.get("wm:s1", Some(2)).await.unwrap().unwrap();
        assert_eq!(fetched.messages.len(), 2);
        assert_eq!(fetched.messages[0].content, "m3");
        assert_eq!(fetched.messages[1].content, "m4");
    }

    #[tokio::test]
    async fn summarization_trigger_fires_once_per_epoch() {
        let mut config = Config::default();
        config.context_window_max = 10;
        config.summarization_threshold = 0.5;
        let handle = ConfigHandle::new(config);

        let sink = Arc::new(RecordingSink {
            calls: StdMutex::new(Vec::new()),
        });
        let store = WorkingMemoryStore::new(Storage::open_in_memory().unwrap(), handle)
            .with_task_sink(sink.clone());
        store.set("wm:s1", WorkingMemory::new("s1", 3600)).await.unwrap();

        store
            .append_messages(
                "wm:s1",
                vec![MemoryMessage::new(Role::User, "word word word word word word word word")],
            )
            .await
            .unwrap();

        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stage_memories_forces_unpersisted() {
        let store = store();
        store.set("wm:s1", WorkingMemory::new("s1", 3600)).await.unwrap();

        let mut record = crate::types::MemoryRecord {
            id: 1,
            text: "x".into(),
            memory_type: crate::types::MemoryType::Semantic,
            topics: Default::default(),
            entities: Default::default(),
            namespace: None,
            user_id: None,
            session_id: None,
            event_date: None,
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
            persisted_at: Some(Utc::now()),
            hash: "h".into(),
            vector: None,
            superseded_by: None,
            discrete_source_ids: vec![],
        };
        store.stage_memories("wm:s1", vec![record.clone()]).await.unwrap();
        record.persisted_at = None;

        let fetched = store.get("wm:s1", None).await.unwrap().unwrap();
        assert_eq!(fetched.memories.len(), 1);
        assert!(fetched.memories[0].persisted_at.is_none());
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = store();
        store.set("wm:s1", WorkingMemory::new("s1", 3600)).await.unwrap();
        store.delete("wm:s1").await.unwrap();
        assert!(store.get("wm:s1", None).await.unwrap().is_none());
    }
}
