//! Short summaries and chunk cleaning

use std::sync::OnceLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::providers::{ChatOpts, LlmClient, ModelClass};

/// Inputs beyond this many chars route to the large model
const LONG_CONTEXT_CHARS: usize = 1500;

/// Concise summary of `text` in roughly `max_sentences` sentences.
///
/// LLM-backed; when no model is reachable, degrades to the first
/// `max_sentences` sentences of the input.
pub async fn cheap_summarize(llm: &LlmClient, text: &str, max_sentences: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let model = if text.len() > LONG_CONTEXT_CHARS {
        ModelClass::Large
    } else {
        ModelClass::Small
    };
    let system = format!(
        "You are a precise summarizer. Produce a clear, faithful summary of the \
         user's text. Return ~{} sentences, no comments, no preface, no markdown.",
        max_sentences
    );
    let user = format!("Summarize this text:\n\n{}", text);

    let summary = llm
        .chat_once(
            &system,
            &user,
            ChatOpts {
                model,
                max_tokens: 1024,
                temperature: 0.2,
            },
        )
        .await;

    if summary.is_empty() {
        naive_fallback(text, max_sentences)
    } else {
        summary
    }
}

/// First `max_sentences` sentences of the input, terminal punctuation kept.
pub fn naive_fallback(text: &str, max_sentences: usize) -> String {
    text.split_sentence_bounds()
        .take(max_sentences)
        .collect::<String>()
        .trim()
        .to_string()
}

static PAGE_MARKER: OnceLock<Regex> = OnceLock::new();

/// Normalize whitespace and strip the `[[Page N]]` markers the chunker
/// inserts between pages. Pure and deterministic.
pub fn clean_chunk_text(text: &str) -> String {
    let marker = PAGE_MARKER.get_or_init(|| Regex::new(r"\[\[Page \d+\]\]").unwrap());
    let stripped = marker.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naive_fallback_takes_sentences() {
        let text = "First sentence. Second one! Third here? Fourth ignored.";
        assert_eq!(
            naive_fallback(text, 3),
            "First sentence. Second one! Third here?"
        );
    }

    #[test]
    fn test_naive_fallback_short_text() {
        assert_eq!(naive_fallback("Only one sentence.", 3), "Only one sentence.");
    }

    #[test]
    fn test_clean_chunk_text_strips_markers() {
        let text = "[[Page 1]]\nHello   world\n[[Page 2]]\ngoodbye";
        assert_eq!(clean_chunk_text(text), "Hello world goodbye");
    }

    #[test]
    fn test_clean_chunk_text_collapses_whitespace() {
        assert_eq!(clean_chunk_text("  a \t b \n\n c "), "a b c");
        assert_eq!(clean_chunk_text(""), "");
    }
}
