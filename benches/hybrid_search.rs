use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use memvault::config::ConfigHandle;
use memvault::context::OpContext;
use memvault::embedding::provider::{DeterministicLlmProvider, TfIdfEmbeddingProvider};
use memvault::embedding::EmbeddingProvider;
use memvault::search::{QueryService, SearchQuery};
use memvault::storage::connection::Storage;
use memvault::storage::long_term::LongTermStore;
use memvault::storage::working_memory::WorkingMemoryStore;
use memvault::types::{MemoryRecord, MemoryType};
use memvault::vectorstore::sqlite::SqliteVectorStore;
use memvault::vectorstore::VectorStore;
use tokio::time::Instant;

fn build_ctx_with_records(n: usize, rt: &tokio::runtime::Runtime) -> OpContext {
    let storage = Storage::open_in_memory().unwrap();
    let config = ConfigHandle::default();
    let vector_store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(storage.clone()));
    let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(TfIdfEmbeddingProvider::new(384));

    rt.block_on(async {
        for i in 0..n {
            let text = format!("note about project deadline number {i} and quarterly budget review");
            let vector = embedding_provider.embed(&[text.as_str()]).await.unwrap().remove(0);
            let record = MemoryRecord {
                id: i as i64 + 1,
                text,
                memory_type: MemoryType::Semantic,
                topics: Default::default(),
                entities: Default::default(),
                namespace: Some("bench".into()),
                user_id: Some("u1".into()),
                session_id: None,
                event_date: None,
                created_at: Utc::now(),
                last_accessed_at: Some(Utc::now()),
                access_count: (i % 7) as u64,
                persisted_at: Some(Utc::now()),
                hash: format!("hash-{i}"),
                vector: Some(vector),
                superseded_by: None,
                discrete_source_ids: vec![],
            };
            vector_store.put(&record).await.unwrap();
        }
    });

    OpContext {
        request_id: "bench".to_string(),
        deadline: Instant::now() + Duration::from_secs(60),
        caller_identity: None,
        working_memory: Arc::new(WorkingMemoryStore::new(storage.clone(), config.clone())),
        long_term: Arc::new(LongTermStore::new(vector_store.clone(), 32)),
        vector_store,
        embedding_provider,
        llm_provider: Arc::new(DeterministicLlmProvider),
        config,
    }
}

fn bench_hybrid_search(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ctx = build_ctx_with_records(500, &rt);
    let service = QueryService::new();

    c.bench_function("search_500_records_with_rerank", |b| {
        b.iter(|| {
            let query = SearchQuery {
                text: Some("project deadline budget".to_string()),
                filter: None,
                distance_threshold: None,
                limit: 20,
                offset: 0,
                optimize_query: false,
            };
            rt.block_on(service.search(black_box(query), &ctx)).unwrap()
        })
    });
}

criterion_group!(benches, bench_hybrid_search);
criterion_main!(benches);
