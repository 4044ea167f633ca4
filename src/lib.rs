//! memvault-core - dual-tier agent memory service
//!
//! Session-scoped working memory plus a persistent, semantically searchable
//! long-term store, with background extraction, deduplication, compaction,
//! and forgetting.

pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod runtime;
pub mod search;
pub mod storage;
pub mod types;
pub mod vectorstore;

pub use config::{Config, ConfigHandle};
pub use context::OpContext;
pub use error::{MemoryCoreError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
