//! SQLite-backed storage: connection management, schema, the filter AST,
//! and the Working/Long-Term memory stores built on top of them.

pub mod connection;
pub mod filter;
pub mod long_term;
pub mod migrations;
pub mod working_memory;

pub use connection::{Storage, StoragePool};
