//! Explicit operation context (§9 "replace dependency injection... with
//! explicit context values"): every core operation takes one of these as
//! its first parameter rather than reaching into ambient/global state.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ConfigHandle;
use crate::embedding::{EmbeddingProvider, LlmProvider};
use crate::storage::long_term::LongTermStore;
use crate::storage::working_memory::WorkingMemoryStore;
use crate::vectorstore::VectorStore;

/// Everything a request handler or background task needs to act, bundled
/// so nothing below this point touches a global. Cheap to clone: every
/// field is an `Arc` or a small value type.
#[derive(Clone)]
pub struct OpContext {
    pub request_id: String,
    pub deadline: Instant,
    pub caller_identity: Option<String>,
    pub working_memory: Arc<WorkingMemoryStore>,
    pub long_term: Arc<LongTermStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub config: ConfigHandle,
}

impl OpContext {
    /// Convenience constructor for a context with a fresh deadline
    /// `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = Instant::now() + timeout;
        ctx
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Pipeline stages take the same bundle; named separately because §4.5
/// names it distinctly from request-path `OpContext`, though today it
/// carries no extra fields.
pub type PipelineContext = OpContext;
