//! ExtractEntities (§4.5 stage 5): lightweight regex-based entity mentions
//! written into `MemoryRecord::entities`.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::MemoryId;

const MAX_ENTITIES: usize = 100;

static MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([a-zA-Z][a-zA-Z0-9_-]{1,30})").expect("valid regex"));

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex")
});

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://([a-zA-Z0-9.-]+)(?:/[^\s]*)?").expect("valid regex"));

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("valid regex"));

const COMMON_DOMAINS: &[&str] = &["example.com", "localhost", "gmail.com"];

/// Pulls out @mentions, email addresses, URL domains, and capitalized
/// multi-word names. Never panics on malformed input; bounded to
/// `MAX_ENTITIES` per text.
pub fn extract_entities(text: &str) -> HashSet<String> {
    let text = text.trim();
    if text.is_empty() {
        return HashSet::new();
    }

    let mut entities = HashSet::new();

    for cap in MENTION_PATTERN.captures_iter(text) {
        if entities.len() >= MAX_ENTITIES {
            break;
        }
        if let Some(m) = cap.get(1) {
            entities.insert(format!("@{}", m.as_str()));
        }
    }

    for m in EMAIL_PATTERN.find_iter(text) {
        if entities.len() >= MAX_ENTITIES {
            break;
        }
        entities.insert(m.as_str().to_string());
    }

    for cap in URL_PATTERN.captures_iter(text) {
        if entities.len() >= MAX_ENTITIES {
            break;
        }
        if let Some(domain) = cap.get(1) {
            let domain = domain.as_str();
            if !COMMON_DOMAINS.contains(&domain) {
                entities.insert(domain.to_string());
            }
        }
    }

    for cap in NAME_PATTERN.captures_iter(text) {
        if entities.len() >= MAX_ENTITIES {
            break;
        }
        if let Some(name) = cap.get(1) {
            entities.insert(name.as_str().to_string());
        }
    }

    entities
}

pub async fn extract_entities_stage(id: MemoryId, text: &str, ctx: &PipelineContext) -> Result<()> {
    let config = ctx.config.current();
    if !config.enable_ner {
        return Ok(());
    }

    let entities = extract_entities(text);
    ctx.long_term
        .update(
            id,
            crate::types::MemoryPatch {
                entities: Some(entities),
                ..Default::default()
            },
        )
        .await
}
