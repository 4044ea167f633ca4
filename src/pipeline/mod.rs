//! The promotion pipeline (§4.5): the ordered stages that turn working-memory
//! messages into enriched, searchable long-term records, plus the two
//! periodic maintenance passes that run outside any single promotion.

pub mod compact;
pub mod dedupe;
pub mod embed_stage;
pub mod entities;
pub mod extract;
pub mod forget;
pub mod persist;
pub mod strategy;
pub mod tagging;
pub mod watermark;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::{MemoryId, MemoryRecord};

/// Runs the full promotion pipeline for one working-memory key: extract,
/// dedupe, embed, tag, extract entities, persist, advance watermark. Returns
/// the newly persisted records; a session with nothing unprocessed returns
/// an empty vec and leaves the watermark untouched.
pub async fn promote_session(key: &str, ctx: &PipelineContext) -> Result<Vec<MemoryRecord>> {
    let extraction = extract::extract_from_session(key, ctx).await?;
    if extraction.candidates.is_empty() {
        return Ok(vec![]);
    }

    let outcome = dedupe::dedupe_batch(extraction.candidates, ctx).await?;
    if !outcome.touches.is_empty() {
        ctx.long_term.touch(&outcome.touches).await?;
    }

    let persisted = if outcome.surviving.is_empty() {
        vec![]
    } else {
        let persisted = persist::persist_batch(outcome.surviving, ctx).await?;

        let targets = persisted
            .iter()
            .map(|r| embed_stage::EmbedTarget {
                id: r.id,
                text: r.text.clone(),
            })
            .collect();
        embed_stage::embed_batch(targets, ctx).await?;

        let config = ctx.config.current();
        for record in &persisted {
            if config.enable_topic_extraction {
                tagging::tag_topics_stage(record.id, &record.text, ctx).await?;
            }
            if config.enable_ner {
                entities::extract_entities_stage(record.id, &record.text, ctx).await?;
            }
        }
        persisted
    };

    // Every extracted message was either superseded into a surviving
    // candidate, dropped as a duplicate (and touched), or persisted — so the
    // watermark advances regardless of whether anything new was written.
    if let Some(watermark) = extraction.watermark {
        watermark::advance_watermark(key, &watermark, ctx).await?;
    }

    Ok(persisted)
}

/// Record ids surfaced in the Persist step that still lack a vector after
/// the pipeline's own retries (§4.5 "poisoned"); a caller (typically the
/// background runtime) may re-queue these for another Embed attempt.
pub type PoisonedIds = Vec<MemoryId>;
