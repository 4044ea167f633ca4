//! Forget (§4.5 stage 9, periodic, optional): deletes records that have
//! aged out and are rarely accessed, exempting episodic records with a
//! future `event_date`.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::info;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::storage::filter::{FieldCondition, FilterExpr, FilterOp};
use crate::types::MemoryId;
use crate::vectorstore::VectorQuery;

const BATCH_SIZE: usize = 200;

pub struct ForgetOutcome {
    pub deleted: Vec<MemoryId>,
}

/// Runs one Forget pass. No-op (empty outcome) when `Config::forgetting_enabled`
/// is false — callers schedule this unconditionally and rely on the flag.
pub async fn forget_once(ctx: &PipelineContext) -> Result<ForgetOutcome> {
    let config = ctx.config.current();
    if !config.forgetting_enabled {
        return Ok(ForgetOutcome { deleted: vec![] });
    }

    let cutoff: DateTime<Utc> = Utc::now() - Duration::days(config.forgetting_max_age_days);
    // `created_at <= effective_last_active` always (a record can't be
    // accessed before it exists), so filtering on created_at is a safe
    // superset; the exact age predicate is re-checked below against
    // `last_accessed_at`, falling back to `created_at` when never touched.
    let filter = FilterExpr::Condition(FieldCondition {
        field: "created_at".to_string(),
        op: FilterOp::Lt(Value::String(cutoff.to_rfc3339())),
    });

    let hits = ctx
        .vector_store
        .search(&VectorQuery {
            vector: None,
            filter: Some(filter),
            limit: BATCH_SIZE,
            offset: 0,
            distance_threshold: None,
        })
        .await?;

    let now = Utc::now();
    let mut to_delete = Vec::new();
    for hit in hits {
        let record = hit.record;
        let effective_last_active = record.last_accessed_at.unwrap_or(record.created_at);
        if effective_last_active >= cutoff {
            continue;
        }
        if record.access_count >= config.forgetting_min_access {
            continue;
        }
        if let Some(event_date) = record.event_date {
            if event_date > now {
                continue;
            }
        }
        to_delete.push(record.id);
    }

    if !to_delete.is_empty() {
        ctx.vector_store.delete(&to_delete).await?;
        info!(count = to_delete.len(), "forget: deleted aged-out records");
    }

    Ok(ForgetOutcome { deleted: to_delete })
}
