//! Compact (§4.5 stage 8, periodic): re-runs the semantic-dedup decision
//! across records created in the last compaction interval, catching
//! cross-session duplicates DedupeBatch never saw side by side.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::pipeline::dedupe::is_strict_superset;
use crate::storage::filter::{FieldCondition, FilterExpr, FilterOp};
use crate::types::{MemoryId, MemoryRecord};
use crate::vectorstore::VectorQuery;

/// Bound on records scanned per run, independent of how many records exist,
/// so a single Compact pass stays cheap regardless of store size.
const MAX_RECORDS_PER_RUN: usize = 2_000;

pub struct CompactOutcome {
    pub scanned: usize,
    pub superseded: usize,
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

/// Runs one Compact pass over records created since `window_start`.
pub async fn compact_once(window_start: DateTime<Utc>, ctx: &PipelineContext) -> Result<CompactOutcome> {
    let config = ctx.config.current();

    let filter = FilterExpr::Condition(FieldCondition {
        field: "created_at".to_string(),
        op: FilterOp::Gte(Value::String(window_start.to_rfc3339())),
    });
    let hits = ctx
        .vector_store
        .search(&VectorQuery {
            vector: None,
            filter: Some(filter),
            limit: MAX_RECORDS_PER_RUN,
            offset: 0,
            distance_threshold: None,
        })
        .await?;

    let mut groups: HashMap<(Option<String>, Option<String>), Vec<MemoryRecord>> = HashMap::new();
    for hit in hits.iter() {
        groups
            .entry((hit.record.user_id.clone(), hit.record.namespace.clone()))
            .or_default()
            .push(hit.record.clone());
    }

    let mut superseded = 0;
    for records in groups.values() {
        let mut resolved: Vec<MemoryId> = Vec::new();
        for i in 0..records.len() {
            let a = &records[i];
            if a.vector.is_none() || a.superseded_by.is_some() || resolved.contains(&a.id) {
                continue;
            }
            for b in records.iter().skip(i + 1) {
                if b.vector.is_none() || b.superseded_by.is_some() || resolved.contains(&b.id) {
                    continue;
                }
                let (Some(va), Some(vb)) = (&a.vector, &b.vector) else {
                    continue;
                };
                if cosine_distance(va, vb) > config.dedup_distance_threshold {
                    continue;
                }
                let (winner, loser) = if is_strict_superset(&a.text, &b.text) {
                    (a.id, b.id)
                } else if is_strict_superset(&b.text, &a.text) {
                    (b.id, a.id)
                } else {
                    continue;
                };
                ctx.long_term.supersede(loser, winner).await?;
                resolved.push(loser);
                superseded += 1;
            }
        }
    }

    Ok(CompactOutcome {
        scanned: hits.len(),
        superseded,
    })
}

/// Default window: the configured compaction interval, doubled for safety
/// margin against scheduler jitter.
pub fn default_window_start(now: DateTime<Utc>, compaction_every_minutes: u64) -> DateTime<Utc> {
    now - Duration::minutes(compaction_every_minutes as i64 * 2)
}
