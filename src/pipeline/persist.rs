//! Persist (§4.5 stage 6): writes surviving candidates into the long-term
//! store and completes any supersession decided by DedupeBatch.

use crate::context::PipelineContext;
use crate::error::Result;
use crate::pipeline::dedupe::SurvivingCandidate;
use crate::types::MemoryRecord;

pub async fn persist_batch(survivors: Vec<SurvivingCandidate>, ctx: &PipelineContext) -> Result<Vec<MemoryRecord>> {
    let mut persisted = Vec::with_capacity(survivors.len());
    for survivor in survivors {
        let record = ctx.long_term.create(survivor.candidate).await?;
        if let Some(old_id) = survivor.supersedes {
            if old_id != record.id {
                ctx.long_term.supersede(old_id, record.id).await?;
            }
        }
        persisted.push(record);
    }
    Ok(persisted)
}
