//! ExtractFromSession (§4.5 stage 1 driver): selects the slice of a
//! session's messages not yet covered by its promotion watermark and runs
//! the session's configured [`ExtractionStrategy`] over them.

use crate::context::PipelineContext;
use crate::error::{MemoryCoreError, Result};
use crate::types::{CandidateRecord, MemoryMessage, WorkingMemory};

fn unprocessed(wm: &WorkingMemory) -> Vec<MemoryMessage> {
    match &wm.promotion_watermark {
        None => wm.messages.clone(),
        Some(watermark) => wm
            .messages
            .iter()
            .filter(|m| m.id.as_str() > watermark.as_str())
            .cloned()
            .collect(),
    }
}

/// Extraction output plus the watermark [`promote_session`] should advance
/// to once these candidates have made it through the rest of the pipeline —
/// the highest message id actually read, not whatever is newest by the time
/// promotion finishes.
pub struct ExtractionOutcome {
    pub candidates: Vec<CandidateRecord>,
    pub watermark: Option<String>,
}

/// Runs extraction for `key`, filling in the candidates' scope fields
/// (`namespace`/`user_id`/`session_id`) from the session itself since
/// [`crate::types::ExtractionStrategy::extract`] only sees message text.
/// A no-op, returning an empty batch, once the watermark already covers
/// every message.
pub async fn extract_from_session(key: &str, ctx: &PipelineContext) -> Result<ExtractionOutcome> {
    let wm = ctx
        .working_memory
        .get(key, None)
        .await?
        .ok_or_else(|| MemoryCoreError::NotFound(format!("working memory {key}")))?;

    let pending = unprocessed(&wm);
    if pending.is_empty() {
        return Ok(ExtractionOutcome {
            candidates: vec![],
            watermark: None,
        });
    }
    let watermark = pending.last().map(|m| m.id.clone());

    let mut candidates = wm.strategy.extract(&pending, ctx).await?;
    for candidate in &mut candidates {
        candidate.namespace = wm.namespace.clone();
        candidate.user_id = wm.user_id.clone();
        candidate.session_id = Some(wm.session_id.clone());
    }
    Ok(ExtractionOutcome { candidates, watermark })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::Utc;

    fn message(id: &str) -> MemoryMessage {
        MemoryMessage {
            id: id.to_string(),
            role: Role::User,
            content: "hello".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unprocessed_returns_all_without_watermark() {
        let mut wm = WorkingMemory::new("s1", 3600);
        wm.messages = vec![message("01A"), message("01B")];
        assert_eq!(unprocessed(&wm).len(), 2);
    }

    #[test]
    fn unprocessed_filters_by_watermark() {
        let mut wm = WorkingMemory::new("s1", 3600);
        wm.messages = vec![message("01A"), message("01B"), message("01C")];
        wm.promotion_watermark = Some("01B".to_string());
        let remaining = unprocessed(&wm);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "01C");
    }
}
