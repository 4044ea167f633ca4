//! Periodic scheduler: drives Compact and Forget on their configured
//! intervals, tracked in `periodic_tasks` so a restart doesn't immediately
//! re-run everything.

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::pipeline::{compact, forget};
use crate::storage::connection::Storage;

pub struct PeriodicScheduler {
    storage: Storage,
}

impl PeriodicScheduler {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn due(&self, task_name: &str, interval_seconds: i64) -> Result<bool> {
        self.storage.with_transaction(|conn| {
            let last_run: Option<chrono::DateTime<Utc>> = conn
                .query_row(
                    "SELECT last_run_at FROM periodic_tasks WHERE task_name = ?1",
                    params![task_name],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();

            conn.execute(
                "INSERT INTO periodic_tasks (task_name, interval_seconds, last_run_at)
                 VALUES (?1, ?2, NULL)
                 ON CONFLICT(task_name) DO UPDATE SET interval_seconds = excluded.interval_seconds",
                params![task_name, interval_seconds],
            )?;

            let due = match last_run {
                None => true,
                Some(t) => (Utc::now() - t).num_seconds() >= interval_seconds,
            };
            Ok(due)
        })
    }

    fn record_run(&self, task_name: &str) -> Result<()> {
        self.storage.with_connection(|conn| {
            conn.execute(
                "UPDATE periodic_tasks SET last_run_at = ?1 WHERE task_name = ?2",
                params![Utc::now(), task_name],
            )?;
            Ok(())
        })
    }

    /// Runs Compact and/or Forget if their interval has elapsed. Safe to
    /// call on a short tick; each pass checks its own due time internally.
    pub async fn tick(&self, ctx: &PipelineContext) -> Result<()> {
        let config = ctx.config.current();

        if self.due("Compact", config.compaction_every_minutes as i64 * 60)? {
            let window_start = compact::default_window_start(Utc::now(), config.compaction_every_minutes);
            match compact::compact_once(window_start, ctx).await {
                Ok(outcome) => info!(
                    scanned = outcome.scanned,
                    superseded = outcome.superseded,
                    "compact pass complete"
                ),
                Err(e) => warn!(error = %e, "compact pass failed"),
            }
            self.record_run("Compact")?;
        }

        if config.forgetting_enabled && self.due("Forget", 3600)? {
            match forget::forget_once(ctx).await {
                Ok(outcome) => info!(deleted = outcome.deleted.len(), "forget pass complete"),
                Err(e) => warn!(error = %e, "forget pass failed"),
            }
            self.record_run("Forget")?;
        }

        Ok(())
    }

    /// Runs `tick` on a fixed wall-clock cadence until `shutdown` fires.
    pub async fn run_until(&self, ctx: PipelineContext, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&ctx).await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_always_due() {
        let scheduler = PeriodicScheduler::new(Storage::open_in_memory().unwrap());
        assert!(scheduler.due("Compact", 3600).unwrap());
    }

    #[test]
    fn recorded_run_is_not_immediately_due_again() {
        let scheduler = PeriodicScheduler::new(Storage::open_in_memory().unwrap());
        assert!(scheduler.due("Compact", 3600).unwrap());
        scheduler.record_run("Compact").unwrap();
        assert!(!scheduler.due("Compact", 3600).unwrap());
    }
}
