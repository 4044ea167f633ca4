//! Re-ranking (§4.6 step 4): `score' = α·similarity + β·recency + γ·log(1+access_count)`.

use chrono::Utc;

use crate::config::RerankWeights;
use crate::types::SearchHit;

/// Half-life, in days, for the exponential recency decay term. Not part of
/// the configurable weights — only α/β/γ are operator-tunable per §6.
const RECENCY_HALF_LIFE_DAYS: f32 = 30.0;

fn recency_score(last_accessed_at: Option<chrono::DateTime<Utc>>) -> f32 {
    let Some(t) = last_accessed_at else {
        return 0.0;
    };
    let age_days = (Utc::now() - t).num_seconds().max(0) as f32 / 86_400.0;
    0.5f32.powf(age_days / RECENCY_HALF_LIFE_DAYS)
}

/// Re-scores and sorts hits in place, descending by `score'`.
pub fn rerank(hits: &mut [SearchHit], weights: RerankWeights) {
    for hit in hits.iter_mut() {
        let recency = recency_score(hit.record.last_accessed_at);
        let access_term = (1.0 + hit.record.access_count as f32).ln();
        hit.score = weights.alpha * hit.score + weights.beta * recency + weights.gamma * access_term;
    }
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryRecord, MemoryType};
    use std::collections::HashSet;

    fn hit(score: f32, access_count: u64) -> SearchHit {
        SearchHit {
            record: MemoryRecord {
                id: 1,
                text: "x".into(),
                memory_type: MemoryType::Semantic,
                topics: HashSet::new(),
                entities: HashSet::new(),
                namespace: None,
                user_id: None,
                session_id: None,
                event_date: None,
                created_at: Utc::now(),
                last_accessed_at: Some(Utc::now()),
                access_count,
                persisted_at: Some(Utc::now()),
                hash: "h".into(),
                vector: None,
                superseded_by: None,
                discrete_source_ids: vec![],
            },
            score,
        }
    }

    #[test]
    fn pure_similarity_weights_preserve_order() {
        let mut hits = vec![hit(0.5, 0), hit(0.9, 0)];
        rerank(&mut hits, RerankWeights { alpha: 1.0, beta: 0.0, gamma: 0.0 });
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn access_count_term_breaks_ties() {
        let mut hits = vec![hit(0.5, 0), hit(0.5, 100)];
        rerank(&mut hits, RerankWeights { alpha: 1.0, beta: 0.0, gamma: 0.5 });
        assert!(hits[0].record.access_count > hits[1].record.access_count);
    }
}
