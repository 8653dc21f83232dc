//! Semantic chunker: pages in, enriched retrieval cards out
//!
//! Primary segmentation asks an LLM for a JSON array of coherent chunks.
//! The guaranteed fallback splits on heading heuristics and then packs each
//! block into overlapping fixed-size word windows. Every emitted chunk is
//! cleaned, labeled with a topic, summarized, and given a deterministic
//! card id.

use std::sync::OnceLock;

use chrono::Utc;
use futures_util::{stream, StreamExt};
use regex::Regex;
use serde_json::Value;

use crate::config::ChunkingConfig;
use crate::providers::{ChatOpts, LlmClient, ModelClass};
use crate::types::{Card, Page};

use super::summarizer::{cheap_summarize, clean_chunk_text};

/// Concurrent topic/summary enrichments per file
const ENRICH_CONCURRENCY: usize = 4;
/// Documents beyond this many chars are segmented with the large model
const LARGE_DOC_CHARS: usize = 200_000;
const TOPIC_MAX_CHARS: usize = 120;
const TOPIC_FALLBACK_CHARS: usize = 80;

/// Build the ordered card list for one file.
pub async fn build_cards_from_pages(
    llm: &LlmClient,
    config: &ChunkingConfig,
    pages: &[Page],
    filename: &str,
    user_id: &str,
    project_id: &str,
) -> Vec<Card> {
    let full = assemble_document(pages);
    if full.trim().is_empty() {
        return Vec::new();
    }

    let segments = match llm_segments(llm, &full).await {
        Some(segments) => {
            tracing::info!(
                "LLM segmentation produced {} chunks for {}",
                segments.len(),
                filename
            );
            segments
        }
        None => {
            let blocks = split_by_headings(&full);
            windowed_chunks(&blocks, config)
        }
    };

    let first_page = pages.first().map(|p| p.page_num).unwrap_or(1);
    let last_page = pages.last().map(|p| p.page_num).unwrap_or(1);
    let slug = slugify(filename);

    let contents: Vec<String> = segments
        .iter()
        .map(|s| clean_chunk_text(s))
        .filter(|s| !s.is_empty())
        .collect();

    let enrichments = contents.into_iter().enumerate().map(|(i, content)| {
        let card_id = format!("{}-c{:04}", slug, i + 1);
        let user_id = user_id.to_string();
        let project_id = project_id.to_string();
        let filename = filename.to_string();
        async move {
            let topic = topic_label(llm, &content).await;
            let summary = cheap_summarize(llm, &content, 3).await;
            Card {
                id: None,
                user_id,
                project_id,
                filename,
                topic_name: topic,
                summary,
                content,
                page_span: [first_page, last_page],
                card_id,
                embedding: Vec::new(),
                created_at: Utc::now(),
            }
        }
    });

    let cards: Vec<Card> = stream::iter(enrichments)
        .buffered(ENRICH_CONCURRENCY)
        .collect()
        .await;

    tracing::info!(
        "Built {} cards from {} pages for {}",
        cards.len(),
        pages.len(),
        filename
    );
    cards
}

/// Concatenate page texts with positional markers the cleaner strips later.
fn assemble_document(pages: &[Page]) -> String {
    let mut full = String::new();
    for page in pages {
        full.push_str(&format!("\n\n[[Page {}]]\n{}\n", page.page_num, page.text.trim()));
    }
    full
}

/// Ask the LLM for chunk boundaries. `None` unless a JSON array of
/// non-empty strings comes back.
async fn llm_segments(llm: &LlmClient, text: &str) -> Option<Vec<String>> {
    let model = if text.len() > LARGE_DOC_CHARS {
        ModelClass::Large
    } else {
        ModelClass::Small
    };
    let system = "You split documents into coherent chunks for retrieval. Return \
                  ONLY a JSON array of strings. Each string is a self-contained \
                  chunk of roughly 150-400 words that preserves the source \
                  wording. No commentary, no object keys, no text outside the \
                  JSON array.";
    let user = format!("Split this document into chunks:\n\n{}", text);

    let value = llm
        .chat_json_robust(
            system,
            &user,
            ChatOpts {
                model,
                max_tokens: 4096,
                temperature: 0.2,
            },
        )
        .await?;

    let Value::Array(items) = value else {
        return None;
    };
    let mut segments = Vec::with_capacity(items.len());
    for item in items {
        let Value::String(s) = item else {
            return None;
        };
        if s.trim().is_empty() {
            return None;
        }
        segments.push(s);
    }
    (!segments.is_empty()).then_some(segments)
}

static HEADING_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn heading_patterns() -> &'static [Regex] {
    HEADING_PATTERNS.get_or_init(|| {
        [
            r"(?m)^(#{1,6}\s.*)\s*$",
            r"(?m)^([0-9]+\.\s+[^\n]+)\s*$",
            r"(?m)^([A-Z][A-Za-z0-9\s\-]{2,}\n[-=]{3,})\s*$",
            r"(?m)^(Chapter\s+\d+.*|Section\s+\d+.*)\s*$",
            r"(?m)^(Abstract|Introduction|Conclusion|References|Bibliography)\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Split on heading heuristics. Matches from all patterns are collected,
/// sorted by position, and used as segment boundaries; intervening spans are
/// preserved so no text is lost.
pub(crate) fn split_by_headings(text: &str) -> Vec<String> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for pattern in heading_patterns() {
        for m in pattern.find_iter(text) {
            spans.push((m.start(), m.end()));
        }
    }
    spans.sort_unstable();

    let mut parts = Vec::new();
    let mut last = 0;
    for (start, end) in spans {
        if start < last {
            continue;
        }
        if start > last {
            parts.push(text[last..start].to_string());
        }
        parts.push(text[start..end].to_string());
        last = end;
    }
    if last < text.len() {
        parts.push(text[last..].to_string());
    }
    if parts.is_empty() {
        parts.push(text.to_string());
    }
    parts
}

/// Pack heading blocks into overlapping word windows.
///
/// Blocks of at most `max_words` are emitted verbatim. Larger blocks become
/// windows of up to `max_words` fresh words, each prefixed with the last
/// `overlap_words` words of the previously emitted chunk. When the tail of a
/// block would fall under `min_words`, the final two windows are balanced
/// instead of emitting a runt.
pub(crate) fn windowed_chunks(blocks: &[String], config: &ChunkingConfig) -> Vec<String> {
    let max_words = config.max_words.max(1);
    let overlap = config.overlap_words.min(max_words.saturating_sub(1));
    let mut chunks: Vec<String> = Vec::new();

    for block in blocks {
        let words: Vec<&str> = block.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if words.len() <= max_words {
            chunks.push(words.join(" "));
            continue;
        }

        let mut start = 0;
        while start < words.len() {
            let remaining = words.len() - start;
            let fresh = if remaining > max_words && remaining < max_words + config.min_words {
                remaining / 2 + remaining % 2
            } else {
                max_words.min(remaining)
            };
            let end = start + fresh;

            let mut piece: Vec<String> = Vec::new();
            if start > 0 {
                if let Some(prev) = chunks.last() {
                    let prev_words: Vec<&str> = prev.split_whitespace().collect();
                    let from = prev_words.len().saturating_sub(overlap);
                    piece.extend(prev_words[from..].iter().map(|w| w.to_string()));
                }
            }
            piece.extend(words[start..end].iter().map(|w| w.to_string()));
            chunks.push(piece.join(" "));
            start = end;
        }
    }

    chunks
}

async fn topic_label(llm: &LlmClient, content: &str) -> String {
    let topic = llm
        .chat_once(
            "Provide a short topic or title for the user's text. No preface, no \
             quotes, no markdown.",
            content,
            ChatOpts {
                model: ModelClass::Small,
                max_tokens: 24,
                temperature: 0.2,
            },
        )
        .await;

    let topic = if topic.is_empty() {
        format!("{}…", truncate_chars(content, TOPIC_FALLBACK_CHARS))
    } else {
        topic
    };
    truncate_chars(&topic, TOPIC_MAX_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Lowercase slug with non-alphanumeric runs collapsed to single dashes.
pub(crate) fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("file");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn keyless_llm() -> LlmClient {
        LlmClient::new(&LlmConfig {
            key_env_names: vec!["CARDFORGE_TEST_NO_KEY".to_string()],
            ..LlmConfig::default()
        })
    }

    fn word_block(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("T.pdf"), "t-pdf");
        assert_eq!(slugify("My Notes (final).docx"), "my-notes-final-docx");
        assert_eq!(slugify("___"), "file");
    }

    #[test]
    fn test_split_by_headings_preserves_text() {
        let text = "intro text\n# Heading One\nbody one\n## Heading Two\nbody two";
        let parts = split_by_headings(text);
        assert!(parts.len() >= 4);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_by_headings_academic_sections() {
        let text = "Abstract\nSome abstract text.\nIntroduction\nSome intro text.";
        let parts = split_by_headings(text);
        assert!(parts.iter().any(|p| p.trim_end() == "Abstract"));
        assert!(parts.iter().any(|p| p.trim_end() == "Introduction"));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_by_headings_no_headings() {
        let text = "just a plain paragraph without structure";
        assert_eq!(split_by_headings(text), vec![text.to_string()]);
    }

    #[test]
    fn test_windowed_chunks_small_block_verbatim() {
        let config = ChunkingConfig::default();
        let blocks = vec![word_block(100)];
        let chunks = windowed_chunks(&blocks, &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], word_block(100));
    }

    #[test]
    fn test_windowed_chunks_exact_max_single_chunk() {
        let config = ChunkingConfig::default();
        let blocks = vec![word_block(config.max_words)];
        let chunks = windowed_chunks(&blocks, &config);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_windowed_chunks_overlap_and_coverage() {
        let config = ChunkingConfig::default();
        let blocks = vec![word_block(1000)];
        let chunks = windowed_chunks(&blocks, &config);
        assert!(chunks.len() > 1);

        // First chunk carries no overlap prefix
        assert_eq!(chunks[0].split_whitespace().count(), config.max_words);

        // Every chunk is bounded by max + overlap words
        for chunk in &chunks {
            assert!(chunk.split_whitespace().count() <= config.max_words + config.overlap_words);
        }

        // Adjacent chunks share exactly the overlap as suffix/prefix
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].split_whitespace().collect();
            let next: Vec<&str> = pair[1].split_whitespace().collect();
            let shared = &prev[prev.len() - config.overlap_words..];
            assert_eq!(&next[..config.overlap_words], shared);
        }

        // Dropping each chunk's overlap prefix reconstructs the source
        let mut recovered: Vec<String> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let words: Vec<&str> = chunk.split_whitespace().collect();
            let fresh = if i == 0 { &words[..] } else { &words[config.overlap_words..] };
            recovered.extend(fresh.iter().map(|w| w.to_string()));
        }
        assert_eq!(recovered.join(" "), word_block(1000));
    }

    #[test]
    fn test_windowed_chunks_balances_runt_tail() {
        let config = ChunkingConfig::default();
        // 460 fresh words would leave a 10-word runt; expect two balanced windows
        let blocks = vec![word_block(460)];
        let chunks = windowed_chunks(&blocks, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].split_whitespace().count(), 230);
        for chunk in &chunks {
            let fresh = chunk.split_whitespace().count();
            assert!(fresh >= config.min_words.min(config.max_words));
        }
    }

    #[test]
    fn test_windowed_chunks_skips_empty_blocks() {
        let config = ChunkingConfig::default();
        let blocks = vec!["".to_string(), "  \n ".to_string(), "one two".to_string()];
        assert_eq!(windowed_chunks(&blocks, &config), vec!["one two".to_string()]);
    }

    #[tokio::test]
    async fn test_build_cards_deterministic_path() {
        let llm = keyless_llm();
        let config = ChunkingConfig::default();
        let pages = vec![Page::new(1, "Abstract\nHello world.")];
        let cards =
            build_cards_from_pages(&llm, &config, &pages, "T.pdf", "u1", "p1").await;

        assert!(!cards.is_empty());
        let first = &cards[0];
        assert_eq!(first.card_id, "t-pdf-c0001");
        assert_eq!(first.user_id, "u1");
        assert_eq!(first.project_id, "p1");
        assert_eq!(first.filename, "T.pdf");
        assert_eq!(first.page_span, [1, 1]);
        assert!(!first.content.is_empty());
        assert!(!first.content.contains("[[Page"));
        assert!(!first.topic_name.is_empty());
        assert!(first.topic_name.chars().count() <= 120);
        assert!(!first.summary.is_empty());
        assert!(first.embedding.is_empty());
    }

    #[tokio::test]
    async fn test_build_cards_ids_unique_and_ordered() {
        let llm = keyless_llm();
        let config = ChunkingConfig::default();
        let pages = vec![Page::new(1, word_block(1200))];
        let cards =
            build_cards_from_pages(&llm, &config, &pages, "big.pdf", "u1", "p1").await;

        assert!(cards.len() > 1);
        let ids: Vec<&str> = cards.iter().map(|c| c.card_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert_eq!(sorted, ids);
    }

    #[tokio::test]
    async fn test_build_cards_empty_document() {
        let llm = keyless_llm();
        let config = ChunkingConfig::default();
        let pages = vec![Page::new(1, "   ")];
        let cards = build_cards_from_pages(&llm, &config, &pages, "e.pdf", "u", "p").await;
        assert!(cards.is_empty());

        let cards = build_cards_from_pages(&llm, &config, &[], "e.pdf", "u", "p").await;
        assert!(cards.is_empty());
    }

    #[tokio::test]
    async fn test_build_cards_topic_fallback_truncates() {
        let llm = keyless_llm();
        let config = ChunkingConfig::default();
        let long_sentence = "alpha ".repeat(60);
        let pages = vec![Page::new(1, long_sentence)];
        let cards = build_cards_from_pages(&llm, &config, &pages, "f.pdf", "u", "p").await;
        assert_eq!(cards.len(), 1);
        assert!(cards[0].topic_name.ends_with('…'));
        assert!(cards[0].topic_name.chars().count() <= 81);
    }
}
