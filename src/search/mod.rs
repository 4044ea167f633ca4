//! Query Service (C-Query, §4.6): turns a text/filter query into ranked,
//! paginated [`crate::types::SearchHit`]s, and composes working memory plus
//! long-term search into a ready-to-send prompt.

pub mod query_service;
pub mod rerank;

pub use query_service::{PromptMessage, QueryService, SearchQuery, SearchResponse};
