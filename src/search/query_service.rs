//! Query Service (§4.6): composes C2-C4 to answer `search` and
//! `memory_prompt` requests. Thin on purpose — it never re-implements
//! invariants the stores below it already own.

use std::sync::Arc;

use crate::context::OpContext;
use crate::error::Result;
use crate::search::rerank;
use crate::storage::filter::FilterExpr;
use crate::storage::working_memory::TaskSink;
use crate::types::{MemoryId, MemoryMessage, Role, SearchHit};
use crate::vectorstore::VectorQuery;

/// Search caps the vector top-N regardless of requested `limit`/`offset`,
/// since a request for `offset=10000` shouldn't force a 10000-wide scan.
const MAX_VECTOR_TOP_N: usize = 200;

const OPTIMIZE_QUERY_TEMPLATE: &str = "Rewrite the following search query into a short, dense phrase \
    optimized for semantic vector search. Preserve named entities and specific \
    terms; drop filler words. Respond with only the rewritten query.\n\nQuery: {query}";

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub filter: Option<FilterExpr>,
    pub distance_threshold: Option<f32>,
    pub limit: usize,
    pub offset: usize,
    pub optimize_query: bool,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub total: u64,
    pub memories: Vec<SearchHit>,
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

const TOUCH_TASK: &str = "TouchRecords";

pub struct QueryService {
    task_sink: Option<Arc<dyn TaskSink>>,
}

impl QueryService {
    pub fn new() -> Self {
        Self { task_sink: None }
    }

    pub fn with_task_sink(mut self, sink: Arc<dyn TaskSink>) -> Self {
        self.task_sink = Some(sink);
        self
    }

    fn schedule_touch(&self, ids: &[MemoryId]) {
        if ids.is_empty() {
            return;
        }
        if let Some(sink) = &self.task_sink {
            let _ = sink.enqueue(TOUCH_TASK, serde_json::json!({ "ids": ids }));
        }
    }

    async fn optimize_query(&self, text: &str, ctx: &OpContext) -> Result<String> {
        let config = ctx.config.current();
        let prompt = OPTIMIZE_QUERY_TEMPLATE.replace("{query}", text);
        let rewritten = ctx
            .llm_provider
            .generate(&prompt, &config.generation_model_fast, 64)
            .await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            Ok(text.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    pub async fn search(&self, query: SearchQuery, ctx: &OpContext) -> Result<SearchResponse> {
        let config = ctx.config.current();
        let top_n = (query.limit + query.offset).min(MAX_VECTOR_TOP_N).max(query.limit);

        let hits = if let Some(text) = &query.text {
            let effective_text = if query.optimize_query {
                self.optimize_query(text, ctx).await?
            } else {
                text.clone()
            };
            let vectors = ctx.embedding_provider.embed(&[effective_text.as_str()]).await?;
            let vector = vectors.into_iter().next().unwrap_or_default();

            ctx.vector_store
                .search(&VectorQuery {
                    vector: Some(vector),
                    filter: query.filter.clone(),
                    limit: top_n,
                    offset: 0,
                    distance_threshold: query.distance_threshold,
                })
                .await?
        } else {
            ctx.vector_store
                .search(&VectorQuery {
                    vector: None,
                    filter: query.filter.clone(),
                    limit: query.limit + query.offset,
                    offset: 0,
                    distance_threshold: None,
                })
                .await?
        };

        let total = ctx.vector_store.count(query.filter.as_ref()).await?;

        let mut scored: Vec<SearchHit> = hits
            .into_iter()
            .map(|hit| SearchHit {
                score: hit.similarity,
                record: hit.record,
            })
            .collect();
        rerank::rerank(&mut scored, config.rerank_weights);

        let page: Vec<SearchHit> = scored
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        self.schedule_touch(&page.iter().map(|h| h.record.id).collect::<Vec<_>>());

        let next_offset = if query.offset + page.len() < total as usize {
            Some(query.offset + page.len())
        } else {
            None
        };

        Ok(SearchResponse {
            total,
            memories: page,
            next_offset,
        })
    }

    pub async fn memory_prompt(
        &self,
        query: &str,
        session_key: Option<&str>,
        filter: Option<FilterExpr>,
        ctx: &OpContext,
    ) -> Result<Vec<PromptMessage>> {
        let mut prompt = Vec::new();

        if let Some(key) = session_key {
            if let Some(wm) = ctx.working_memory.get(key, None).await? {
                if let Some(context) = &wm.context {
                    prompt.push(PromptMessage {
                        role: Role::System,
                        content: context.clone(),
                    });
                }
                for message in &wm.messages {
                    prompt.push(message_to_prompt(message));
                }
            }
        }

        let search_response = self
            .search(
                SearchQuery {
                    text: Some(query.to_string()),
                    filter,
                    distance_threshold: None,
                    limit: 10,
                    offset: 0,
                    optimize_query: false,
                },
                ctx,
            )
            .await?;

        if !search_response.memories.is_empty() {
            let bullets: Vec<String> = search_response
                .memories
                .iter()
                .map(|h| format!("- {}", h.record.text))
                .collect();
            prompt.push(PromptMessage {
                role: Role::System,
                content: format!("Relevant memories:\n{}", bullets.join("\n")),
            });
        }

        prompt.push(PromptMessage {
            role: Role::User,
            content: query.to_string(),
        });

        Ok(prompt)
    }
}

impl Default for QueryService {
    fn default() -> Self {
        Self::new()
    }
}

fn message_to_prompt(message: &MemoryMessage) -> PromptMessage {
    PromptMessage {
        role: message.role,
        content: message.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimize_query_template_has_placeholder() {
        assert!(OPTIMIZE_QUERY_TEMPLATE.contains("{query}"));
    }
}
