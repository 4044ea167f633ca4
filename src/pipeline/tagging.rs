//! TagTopics (§4.5 stage 4): topic labels written into `MemoryRecord::topics`,
//! sourced per `Config::topic_model_source` (§6).

use std::collections::HashMap;
use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::config::TopicModelSource;
use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::{MemoryId, MemoryPatch};

const MAX_TOPICS: usize = 5;

/// Keyword -> topic mappings for `TopicModelSource::Local`, grounded in the
/// same coarse keyword-bucket idea as the old auto-tagger, minus the
/// confidence scoring machinery this spec doesn't need.
static LOCAL_TOPIC_KEYWORDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("code", "engineering"),
        ("bug", "engineering"),
        ("deploy", "engineering"),
        ("database", "engineering"),
        ("invoice", "finance"),
        ("payment", "finance"),
        ("budget", "finance"),
        ("meeting", "scheduling"),
        ("calendar", "scheduling"),
        ("deadline", "scheduling"),
        ("travel", "travel"),
        ("flight", "travel"),
        ("hotel", "travel"),
        ("recipe", "food"),
        ("restaurant", "food"),
        ("coffee", "food"),
    ])
});

fn local_topics(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let mut topics = HashSet::new();
    for (keyword, topic) in LOCAL_TOPIC_KEYWORDS.iter() {
        if lower.contains(keyword) {
            topics.insert(topic.to_string());
            if topics.len() >= MAX_TOPICS {
                break;
            }
        }
    }
    topics
}

pub async fn tag_topics_stage(id: MemoryId, text: &str, ctx: &PipelineContext) -> Result<()> {
    let config = ctx.config.current();
    if !config.enable_topic_extraction {
        return Ok(());
    }

    let topics: HashSet<String> = match &config.topic_model_source {
        TopicModelSource::Fixed { taxonomy } => {
            let hits = ctx.llm_provider.classify(text, taxonomy).await?;
            hits.into_iter().take(MAX_TOPICS).collect()
        }
        TopicModelSource::Llm => {
            let hits = ctx.llm_provider.classify(text, &[]).await?;
            hits.into_iter().take(MAX_TOPICS).collect()
        }
        TopicModelSource::Local => local_topics(text),
    };

    ctx.long_term
        .update(
            id,
            MemoryPatch {
                topics: Some(topics),
                ..Default::default()
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_topics_matches_keywords() {
        let topics = local_topics("We need to fix a bug before the deploy tomorrow.");
        assert!(topics.contains("engineering"));
    }

    #[test]
    fn local_topics_empty_for_unmatched_text() {
        assert!(local_topics("The sky is a color.").is_empty());
    }
}
