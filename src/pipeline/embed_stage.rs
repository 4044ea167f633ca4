//! Embed (§4.5 stage 3): batched vector generation for persisted records
//! still missing a `vector`.

use crate::context::PipelineContext;
use crate::error::{MemoryCoreError, Result};
use crate::types::{MemoryId, MemoryPatch};

/// One record's text, keyed by its already-assigned id.
pub struct EmbedTarget {
    pub id: MemoryId,
    pub text: String,
}

/// Outcome of an embed pass: ids written successfully, and ids left
/// vectorless after the provider kept failing (§4.5 "poisoned records
/// retained vectorless").
pub struct EmbedOutcome {
    pub embedded: Vec<MemoryId>,
    pub poisoned: Vec<MemoryId>,
}

const MAX_ATTEMPTS: u32 = 3;

pub async fn embed_batch(targets: Vec<EmbedTarget>, ctx: &PipelineContext) -> Result<EmbedOutcome> {
    if targets.is_empty() {
        return Ok(EmbedOutcome {
            embedded: vec![],
            poisoned: vec![],
        });
    }

    let texts: Vec<&str> = targets.iter().map(|t| t.text.as_str()).collect();

    let mut attempt = 0;
    let vectors = loop {
        attempt += 1;
        match ctx.embedding_provider.embed(&texts).await {
            Ok(vectors) => break Some(vectors),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let backoff = std::time::Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
                continue;
            }
            Err(MemoryCoreError::ProviderFailure(_)) => break None,
            Err(e) => return Err(e),
        }
    };

    let Some(vectors) = vectors else {
        return Ok(EmbedOutcome {
            embedded: vec![],
            poisoned: targets.into_iter().map(|t| t.id).collect(),
        });
    };

    let mut embedded = Vec::with_capacity(targets.len());
    for (target, vector) in targets.into_iter().zip(vectors.into_iter()) {
        ctx.vector_store
            .update_fields(
                target.id,
                &MemoryPatch {
                    vector: Some(vector),
                    ..Default::default()
                },
            )
            .await?;
        embedded.push(target.id);
    }

    Ok(EmbedOutcome {
        embedded,
        poisoned: vec![],
    })
}
