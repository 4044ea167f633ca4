//! DedupeBatch (§4.5 stage 2): exact-hash phase followed by a semantic
//! phase that resolves near-duplicates via vector proximity and token-set
//! containment.

use std::collections::HashSet;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::storage::filter::{FieldCondition, FilterExpr, FilterOp};
use crate::storage::long_term::compute_hash;
use crate::types::{CandidateRecord, MemoryId};
use crate::vectorstore::VectorQuery;

/// A surviving candidate, paired with the stale record it should supersede
/// once [`super::persist`] gives it an id — `None` when the candidate beat
/// no existing record and is just a plain new write.
pub struct SurvivingCandidate {
    pub candidate: CandidateRecord,
    pub supersedes: Option<MemoryId>,
}

/// What survives `DedupeBatch`, plus the side effects it wants applied:
/// records the winners supersede, and losing hits to `touch`.
pub struct DedupeOutcome {
    pub surviving: Vec<SurvivingCandidate>,
    pub touches: Vec<MemoryId>,
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// True if `candidate_text`'s token set is a strict superset of `hit_text`'s.
pub(crate) fn is_strict_superset(candidate_text: &str, hit_text: &str) -> bool {
    let candidate_tokens = token_set(candidate_text);
    let hit_tokens = token_set(hit_text);
    !hit_tokens.is_empty()
        && hit_tokens.is_subset(&candidate_tokens)
        && candidate_tokens.len() > hit_tokens.len()
}

fn scope_filter(candidate: &CandidateRecord) -> Option<FilterExpr> {
    let mut conditions = Vec::new();
    if let Some(user_id) = &candidate.user_id {
        conditions.push(FilterExpr::Condition(FieldCondition {
            field: "user_id".to_string(),
            op: FilterOp::Eq(serde_json::Value::String(user_id.clone())),
        }));
    }
    if let Some(namespace) = &candidate.namespace {
        conditions.push(FilterExpr::Condition(FieldCondition {
            field: "namespace".to_string(),
            op: FilterOp::Eq(serde_json::Value::String(namespace.clone())),
        }));
    }
    if conditions.is_empty() {
        None
    } else {
        Some(FilterExpr::And { conditions })
    }
}

pub async fn dedupe_batch(candidates: Vec<CandidateRecord>, ctx: &PipelineContext) -> Result<DedupeOutcome> {
    let config = ctx.config.current();

    // Exact phase: drop candidates whose hash already exists and is not superseded.
    let mut exact_survivors = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let hash = compute_hash(&candidate);
        if ctx.vector_store.find_by_hash(&hash).await?.is_none() {
            exact_survivors.push(candidate);
        }
    }

    if exact_survivors.is_empty() {
        return Ok(DedupeOutcome {
            surviving: vec![],
            touches: vec![],
        });
    }

    // Semantic phase.
    let texts: Vec<&str> = exact_survivors.iter().map(|c| c.text.as_str()).collect();
    let vectors = ctx.embedding_provider.embed(&texts).await?;

    let mut surviving = Vec::new();
    let mut touches = Vec::new();

    for (candidate, vector) in exact_survivors.into_iter().zip(vectors.into_iter()) {
        let hits = ctx
            .vector_store
            .search(&VectorQuery {
                vector: Some(vector),
                filter: scope_filter(&candidate),
                limit: 5,
                offset: 0,
                distance_threshold: None,
            })
            .await?;

        let top_hit = hits.into_iter().next();
        let near_duplicate = top_hit
            .as_ref()
            .map(|h| (1.0 - h.similarity) <= config.dedup_distance_threshold)
            .unwrap_or(false);

        match top_hit {
            Some(hit) if near_duplicate => {
                if is_strict_superset(&candidate.text, &hit.record.text) {
                    surviving.push(SurvivingCandidate {
                        candidate,
                        supersedes: Some(hit.record.id),
                    });
                } else {
                    touches.push(hit.record.id);
                }
            }
            _ => surviving.push(SurvivingCandidate {
                candidate,
                supersedes: None,
            }),
        }
    }

    Ok(DedupeOutcome { surviving, touches })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_superset_requires_full_containment_and_extra_tokens() {
        assert!(is_strict_superset(
            "the user likes hot green tea in the morning",
            "user likes tea"
        ));
        assert!(!is_strict_superset("user likes tea", "user likes tea"));
        assert!(!is_strict_superset("user likes coffee", "user likes tea"));
    }
}
