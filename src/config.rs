//! Configuration surface (§6) and the versioned handle that lets it be
//! hot-reloaded without any other global mutable state.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Where topic labels come from in the TagTopics stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum TopicModelSource {
    /// LLM classification clamped to a fixed, configured taxonomy.
    Fixed { taxonomy: Vec<String> },
    /// LLM classification, open-vocabulary; filter queries use exact-string match.
    Llm,
    /// Local topic-model inference, open-vocabulary.
    Local,
}

impl Default for TopicModelSource {
    fn default() -> Self {
        TopicModelSource::Llm
    }
}

/// Re-rank weights for `score' = α·similarity + β·recency + γ·log(1+access_count)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankWeights {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        // Pure similarity by default, per §4.6.
        Self {
            alpha: 1.0,
            beta: 0.0,
            gamma: 0.0,
        }
    }
}

/// The full configuration surface enumerated in §6. Parsing this from
/// environment/files is the outer binary's job; the core only ever consumes
/// the typed struct through a [`ConfigHandle`] snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db_path: String,
    pub embedding_model: String,
    pub generation_model_fast: String,
    pub generation_model_slow: String,
    pub vector_dimensions: usize,
    pub long_term_memory_enabled: bool,
    pub enable_discrete_extraction: bool,
    pub enable_topic_extraction: bool,
    pub enable_ner: bool,
    pub topic_model_source: TopicModelSource,
    /// Fraction of `context_window_max` at which SummarizeSession is triggered.
    pub summarization_threshold: f32,
    pub context_window_max: u64,
    pub forgetting_enabled: bool,
    pub forgetting_max_age_days: i64,
    pub forgetting_min_access: u64,
    pub compaction_every_minutes: u64,
    pub dedup_distance_threshold: f32,
    pub default_wm_ttl_seconds: u64,
    pub rerank_weights: RerankWeights,
    /// Cap on concurrent connections to the vector store backend.
    pub pool_size: usize,
    /// Cap on prompt length accepted for `ExtractionStrategy::Custom`.
    pub max_custom_prompt_chars: usize,
    /// Bound on `superseded_by` chain walks before returning `Conflict`.
    pub max_supersession_chain_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "memvault.db".to_string(),
            embedding_model: "tfidf".to_string(),
            generation_model_fast: "gpt-4o-mini".to_string(),
            generation_model_slow: "gpt-4o".to_string(),
            vector_dimensions: 384,
            long_term_memory_enabled: true,
            enable_discrete_extraction: true,
            enable_topic_extraction: true,
            enable_ner: true,
            topic_model_source: TopicModelSource::default(),
            summarization_threshold: 0.7,
            context_window_max: 8_000,
            forgetting_enabled: false,
            forgetting_max_age_days: 90,
            forgetting_min_access: 5,
            compaction_every_minutes: 60,
            dedup_distance_threshold: 0.1,
            default_wm_ttl_seconds: 3600,
            rerank_weights: RerankWeights::default(),
            pool_size: 4,
            max_custom_prompt_chars: 4_000,
            max_supersession_chain_depth: 32,
        }
    }
}

/// A hot-swappable snapshot of [`Config`]. Cloning the handle is cheap; all
/// clones observe the latest `set()` call. This is the only global mutable
/// state the core carries (§5).
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot. Readers never block writers and vice versa beyond
    /// the brief critical section of the swap itself.
    pub fn current(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    /// Atomically replace the active snapshot.
    pub fn set(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
