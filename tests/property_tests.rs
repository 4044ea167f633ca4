//! Property-based tests for the memory core's universal invariants.
//!
//! Each property is checked against a fresh in-memory SQLite-backed context
//! per case; case counts are kept modest since every case opens and drives
//! real storage, not a pure function.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use memvault::config::{Config, ConfigHandle};
use memvault::context::OpContext;
use memvault::embedding::provider::{DeterministicLlmProvider, TfIdfEmbeddingProvider};
use memvault::pipeline;
use memvault::search::{QueryService, SearchQuery};
use memvault::storage::connection::Storage;
use memvault::storage::filter::{FieldCondition, FilterExpr, FilterOp};
use memvault::storage::long_term::LongTermStore;
use memvault::storage::working_memory::WorkingMemoryStore;
use memvault::types::{CandidateRecord, ExtractionStrategy, MemoryMessage, MemoryPatch, MemoryType, Role, WorkingMemory};
use memvault::vectorstore::sqlite::SqliteVectorStore;
use memvault::vectorstore::{VectorQuery, VectorStore};
use serde_json::Value;

fn ctx() -> OpContext {
    let storage = Storage::open_in_memory().unwrap();
    let config = ConfigHandle::default();
    let vector_store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(storage.clone()));

    OpContext {
        request_id: "prop".to_string(),
        deadline: Instant::now() + Duration::from_secs(60),
        caller_identity: None,
        working_memory: Arc::new(WorkingMemoryStore::new(storage.clone(), config.clone())),
        long_term: Arc::new(LongTermStore::new(vector_store.clone(), 32)),
        vector_store,
        embedding_provider: Arc::new(TfIdfEmbeddingProvider::new(384)),
        llm_provider: Arc::new(DeterministicLlmProvider),
        config,
    }
}

fn candidate(text: &str, user_id: &str, ns: &str) -> CandidateRecord {
    CandidateRecord {
        text: text.to_string(),
        memory_type: MemoryType::Semantic,
        namespace: Some(ns.to_string()),
        user_id: Some(user_id.to_string()),
        session_id: None,
        event_date: None,
        discrete_source_ids: vec![],
    }
}

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// P1: create() is idempotent - calling it twice with an equal hash
    /// yields exactly one persisted record, keeping the first id.
    #[test]
    fn p1_create_is_idempotent(text in "[a-z ]{3,40}", user in "u[0-9]{1,3}", ns in "n[0-9]{1,3}") {
        let ctx = ctx();
        rt().block_on(async {
            let a = ctx.long_term.create(candidate(&text, &user, &ns)).await.unwrap();
            let b = ctx.long_term.create(candidate(&text, &user, &ns)).await.unwrap();
            prop_assert_eq!(a.id, b.id);
            let count = ctx.vector_store.count(Some(&FilterExpr::Condition(FieldCondition {
                field: "user_id".to_string(),
                op: FilterOp::Eq(Value::String(user.clone())),
            }))).await.unwrap();
            prop_assert_eq!(count, 1);
            Ok(())
        })?;
    }

    /// P2: once persisted, a record's identity fields never change across an
    /// enrichment-owned patch; only the patched fields move.
    #[test]
    fn p2_persisted_identity_fields_are_immutable(text in "[a-z ]{3,40}", user in "u[0-9]{1,3}") {
        let ctx = ctx();
        rt().block_on(async {
            let original = ctx.long_term.create(candidate(&text, &user, "n1")).await.unwrap();
            ctx.long_term.update(original.id, MemoryPatch {
                vector: Some(vec![0.1, 0.2, 0.3]),
                access_count: Some(7),
                ..Default::default()
            }).await.unwrap();

            let refreshed = ctx.vector_store.get(original.id).await.unwrap().unwrap();
            prop_assert_eq!(refreshed.id, original.id);
            prop_assert_eq!(refreshed.text, original.text);
            prop_assert_eq!(refreshed.hash, original.hash);
            prop_assert_eq!(refreshed.created_at, original.created_at);
            prop_assert_eq!(refreshed.access_count, 7);
            prop_assert!(refreshed.vector.is_some());
            Ok(())
        })?;
    }

    /// P3: search never returns a record with `superseded_by != null`,
    /// regardless of how many records in scope are superseded.
    #[test]
    fn p3_search_never_returns_superseded(texts in prop::collection::vec("[a-z ]{3,20}", 2..6), superseded_mask in prop::collection::vec(any::<bool>(), 2..6)) {
        let ctx = ctx();
        rt().block_on(async {
            let mut ids = Vec::new();
            for t in &texts {
                let r = ctx.long_term.create(candidate(t, "u1", "n1")).await.unwrap();
                ids.push(r.id);
            }
            // Supersede every id flagged true onto the next id in the list
            // (or the first, for the last one) so every chain stays acyclic.
            for (i, flag) in superseded_mask.iter().enumerate().take(ids.len()) {
                if *flag {
                    let target = ids[(i + 1) % ids.len()];
                    if target != ids[i] {
                        let _ = ctx.long_term.supersede(ids[i], target).await;
                    }
                }
            }

            let hits = ctx.vector_store.search(&VectorQuery {
                vector: None,
                filter: None,
                limit: 100,
                offset: 0,
                distance_threshold: None,
            }).await.unwrap();
            prop_assert!(hits.iter().all(|h| h.record.superseded_by.is_none()));
            Ok(())
        })?;
    }

    /// P4: the promotion watermark is non-decreasing across repeated
    /// promotion passes, including passes that find nothing new.
    #[test]
    fn p4_watermark_is_monotonic(batch_sizes in prop::collection::vec(0usize..4, 1..5)) {
        let ctx = ctx();
        rt().block_on(async {
            let key = "wm:n1:u1:s1";
            let mut wm = WorkingMemory::new("s1", 3600);
            wm.namespace = Some("n1".to_string());
            wm.user_id = Some("u1".to_string());
            wm.strategy = ExtractionStrategy::Summary;
            ctx.working_memory.set(key, wm).await.unwrap();

            let mut last_watermark: Option<String> = None;
            for size in batch_sizes {
                if size > 0 {
                    let batch: Vec<MemoryMessage> = (0..size)
                        .map(|i| MemoryMessage::new(Role::User, format!("msg {i}")))
                        .collect();
                    ctx.working_memory.append_messages(key, batch).await.unwrap();
                }
                pipeline::promote_session(key, &ctx).await.unwrap();

                let current = ctx.working_memory.get(key, None).await.unwrap().unwrap().promotion_watermark;
                if let (Some(prev), Some(cur)) = (&last_watermark, &current) {
                    prop_assert!(cur.as_str() >= prev.as_str());
                }
                if current.is_some() {
                    last_watermark = current;
                }
            }
            Ok(())
        })?;
    }

    /// P5: search with a single equality filter returns exactly the set of
    /// stored records matching that filter, up to the requested limit.
    #[test]
    fn p5_filter_correctness_round_trip(user_ids in prop::collection::vec(prop_oneof![Just("u1"), Just("u2"), Just("u3")], 3..12)) {
        let ctx = ctx();
        rt().block_on(async {
            for (i, user) in user_ids.iter().enumerate() {
                let _ = ctx.long_term.create(candidate(&format!("fact {i}"), user, "n1")).await.unwrap();
            }

            let expected = user_ids.iter().filter(|u| **u == "u1").count();
            let hits = ctx.vector_store.search(&VectorQuery {
                vector: None,
                filter: Some(FilterExpr::Condition(FieldCondition {
                    field: "user_id".to_string(),
                    op: FilterOp::Eq(Value::String("u1".to_string())),
                })),
                limit: 1000,
                offset: 0,
                distance_threshold: None,
            }).await.unwrap();

            prop_assert_eq!(hits.len(), expected);
            prop_assert!(hits.iter().all(|h| h.record.user_id.as_deref() == Some("u1")));
            Ok(())
        })?;
    }

    /// P6: two candidates whose texts are in a containment relation and
    /// whose vectors are within the dedup threshold collapse into exactly
    /// one non-superseded record.
    #[test]
    fn p6_dedup_locality_collapses_containment_pairs(suffix in "[a-z]{3,12}") {
        let ctx = ctx();
        rt().block_on(async {
            let base = "user likes tea".to_string();
            let superset = format!("user likes tea and also {suffix}");

            let outcome = pipeline::dedupe::dedupe_batch(vec![candidate(&base, "u1", "n1")], &ctx).await.unwrap();
            let first = pipeline::persist::persist_batch(outcome.surviving, &ctx).await.unwrap();
            pipeline::embed_stage::embed_batch(
                vec![pipeline::embed_stage::EmbedTarget { id: first[0].id, text: first[0].text.clone() }],
                &ctx,
            ).await.unwrap();

            // Force proximity the same way S2 does: both texts share almost
            // all tokens, so the TF-IDF vectors land close together.
            let outcome = pipeline::dedupe::dedupe_batch(vec![candidate(&superset, "u1", "n1")], &ctx).await.unwrap();
            if outcome.surviving.len() != 1 || outcome.surviving[0].supersedes.is_none() {
                // TF-IDF didn't land within the dedup threshold for this
                // pair, or landed as a near-duplicate without containment;
                // either way this case doesn't exercise the collapse path
                // this property is about.
                return Ok(());
            }
            let second = pipeline::persist::persist_batch(outcome.surviving, &ctx).await.unwrap();

            let hits = ctx.vector_store.search(&VectorQuery {
                vector: None,
                filter: Some(FilterExpr::Condition(FieldCondition {
                    field: "user_id".to_string(),
                    op: FilterOp::Eq(Value::String("u1".to_string())),
                })),
                limit: 10,
                offset: 0,
                distance_threshold: None,
            }).await.unwrap();
            prop_assert_eq!(hits.len(), 1);
            prop_assert_eq!(hits[0].record.id, second[0].id);
            Ok(())
        })?;
    }

    /// P7: search completes successfully with no task sink configured -
    /// the recency touch side effect is fire-and-forget and never blocks or
    /// fails the read path.
    #[test]
    fn p7_search_does_not_depend_on_touch_sink(count in 1usize..8) {
        let ctx = ctx();
        rt().block_on(async {
            for i in 0..count {
                ctx.long_term.create(candidate(&format!("fact {i}"), "u1", "n1")).await.unwrap();
            }
            let service = QueryService::new();
            let response = service.search(SearchQuery {
                text: None,
                filter: None,
                distance_threshold: None,
                limit: 10,
                offset: 0,
                optimize_query: false,
            }, &ctx).await;
            prop_assert!(response.is_ok());
            Ok(())
        })?;
    }
}

#[test]
fn config_default_chain_depth_matches_long_term_store_default_usage() {
    // Sanity anchor: the property tests above all construct `LongTermStore`
    // with a depth of 32, matching `Config::default().max_supersession_chain_depth`.
    assert_eq!(Config::default().max_supersession_chain_depth, 32);
}
