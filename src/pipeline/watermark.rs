//! AdvanceWatermark (§4.5 stage 7): moves `WorkingMemory::promotion_watermark`
//! forward to the last message that made it through extraction, never
//! backward (invariant 6).

use crate::context::PipelineContext;
use crate::error::{MemoryCoreError, Result};

/// No-op if `new_watermark` does not advance the stored one.
pub async fn advance_watermark(key: &str, new_watermark: &str, ctx: &PipelineContext) -> Result<()> {
    let mut wm = ctx
        .working_memory
        .get(key, None)
        .await?
        .ok_or_else(|| MemoryCoreError::NotFound(format!("working memory {key}")))?;

    let advances = match &wm.promotion_watermark {
        Some(current) => new_watermark > current.as_str(),
        None => true,
    };
    if !advances {
        return Ok(());
    }

    wm.promotion_watermark = Some(new_watermark.to_string());
    ctx.working_memory.set(key, wm).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_ordering_is_lexicographic() {
        assert!("01H" > "01A");
        assert!(!("01A" > "01H"));
    }
}
