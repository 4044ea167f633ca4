//! Durable task queue: at-least-once execution with at-most-one-in-flight
//! per fingerprint, backed by the `tasks` table's
//! `UNIQUE(fingerprint, status) ON CONFLICT IGNORE` constraint — a second
//! `enqueue` for the same fingerprint while one is still pending is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::storage::connection::Storage;
use crate::storage::working_memory::TaskSink;

/// Exponential backoff with a cap, applied between retry attempts of a
/// failed retryable task.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempts: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * 2f64.powi(attempts as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// A handler for one task name. Registered with [`TaskQueue::register`];
/// `handle` runs with the full operation context so it can drive the
/// pipeline or any other core operation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, args: serde_json::Value, ctx: &PipelineContext) -> Result<()>;
}

fn fingerprint(task_name: &str, args: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_name.as_bytes());
    hasher.update([0x1F]);
    hasher.update(args.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct TaskQueue {
    storage: Storage,
    retry_policy: RetryPolicy,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    notify: Arc<Notify>,
}

impl TaskQueue {
    pub fn new(storage: Storage, retry_policy: RetryPolicy) -> Self {
        Self {
            storage,
            retry_policy,
            handlers: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn register(&mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_name.into(), handler);
    }

    /// Inserts a task, ignored if an identical-fingerprint task is already
    /// pending (at-most-one-in-flight-per-fingerprint).
    pub fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()> {
        let fp = fingerprint(task_name, &args);
        self.storage.with_connection(|conn| {
            // The table's own `UNIQUE(fingerprint, status) ON CONFLICT IGNORE`
            // constraint silently drops this insert if an identical-fingerprint
            // task is already pending.
            conn.execute(
                "INSERT INTO tasks (task_name, args, fingerprint, status, scheduled_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                params![task_name, args.to_string(), fp, Utc::now()],
            )?;
            Ok(())
        })?;
        self.notify.notify_one();
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<(i64, String, serde_json::Value, u32)>> {
        self.storage.with_transaction(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, task_name, args, attempts FROM tasks
                     WHERE status = 'pending' AND scheduled_at <= ?1
                     ORDER BY scheduled_at ASC LIMIT 1",
                    params![Utc::now()],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, task_name, args_json, attempts)) = row else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE tasks SET status = 'in_progress' WHERE id = ?1",
                params![id],
            )?;
            let args: serde_json::Value = serde_json::from_str(&args_json)?;
            Ok(Some((id, task_name, args, attempts as u32)))
        })
    }

    fn mark_done(&self, id: i64) -> Result<()> {
        self.storage.with_connection(|conn| {
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    fn mark_retry_or_failed(&self, id: i64, attempts: u32, error: &str) -> Result<()> {
        self.storage.with_connection(|conn| {
            if attempts >= self.retry_policy.max_attempts {
                conn.execute(
                    "UPDATE tasks SET status = 'failed', attempts = ?1, last_error = ?2 WHERE id = ?3",
                    params![attempts as i64, error, id],
                )?;
            } else {
                let delay = self.retry_policy.backoff_for(attempts);
                let next_run = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                conn.execute(
                    "UPDATE tasks SET status = 'pending', attempts = ?1, last_error = ?2, scheduled_at = ?3 WHERE id = ?4",
                    params![attempts as i64, error, next_run, id],
                )?;
            }
            Ok(())
        })
    }

    /// Runs one claimed task to completion, if any is ready. Returns `true`
    /// if a task was processed (whether it succeeded or was retried/failed).
    pub async fn run_once(&self, ctx: &PipelineContext) -> Result<bool> {
        let Some((id, task_name, args, attempts)) = self.claim_next()? else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(&task_name) else {
            warn!(task_name = %task_name, "no handler registered, dropping task");
            self.mark_done(id)?;
            return Ok(true);
        };

        match handler.handle(args, ctx).await {
            Ok(()) => self.mark_done(id)?,
            Err(e) if e.is_retryable() => {
                self.mark_retry_or_failed(id, attempts + 1, &e.to_string())?;
            }
            Err(e) => {
                error!(task_name = %task_name, error = %e, "task failed non-retryably");
                self.mark_retry_or_failed(id, self.retry_policy.max_attempts, &e.to_string())?;
            }
        }
        Ok(true)
    }

    /// Runs the worker loop until `shutdown` fires, draining ready tasks and
    /// otherwise waiting on either a poll tick or an `enqueue` wakeup.
    pub async fn run_until(&self, ctx: PipelineContext, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut poll_interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.notify.notified() => {
                    while self.run_once(&ctx).await.unwrap_or(false) {}
                }
                _ = poll_interval.tick() => {
                    while self.run_once(&ctx).await.unwrap_or(false) {}
                }
            }
        }
    }
}

impl TaskSink for TaskQueue {
    fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()> {
        TaskQueue::enqueue(self, task_name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _args: serde_json::Value, _ctx: &PipelineContext) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(crate::error::MemoryCoreError::ProviderFailure("boom".into()));
            }
            Ok(())
        }
    }

    fn queue() -> TaskQueue {
        TaskQueue::new(Storage::open_in_memory().unwrap(), RetryPolicy::default())
    }

    #[test]
    fn fingerprint_is_stable_for_same_args() {
        let args = serde_json::json!({"key": "wm:s1"});
        assert_eq!(
            fingerprint("SummarizeSession", &args),
            fingerprint("SummarizeSession", &args)
        );
    }

    #[test]
    fn second_enqueue_with_same_fingerprint_is_ignored() {
        let q = queue();
        let args = serde_json::json!({"key": "wm:s1"});
        q.enqueue("SummarizeSession", args.clone()).unwrap();
        q.enqueue("SummarizeSession", args).unwrap();

        let count: i64 = q
            .storage
            .with_connection(|c| Ok(c.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn claim_next_transitions_to_in_progress() {
        let q = queue();
        q.enqueue("SummarizeSession", serde_json::json!({})).unwrap();
        let (id, name, _, attempts) = q.claim_next().unwrap().unwrap();
        assert_eq!(name, "SummarizeSession");
        assert_eq!(attempts, 0);

        let status: String = q
            .storage
            .with_connection(|c| {
                Ok(c.query_row("SELECT status FROM tasks WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(status, "in_progress");
    }
}
