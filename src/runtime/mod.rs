//! Background Task Runtime (C6, §5): a durable, at-least-once task queue
//! with at-most-one-in-flight-per-fingerprint, plus a periodic scheduler for
//! Compact/Forget.

pub mod queue;
pub mod scheduler;

pub use queue::{RetryPolicy, TaskQueue};
pub use scheduler::PeriodicScheduler;
