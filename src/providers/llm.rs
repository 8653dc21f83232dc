//! One-shot LLM completions against an OpenAI-compatible chat endpoint
//!
//! Degradation policy: every helper here is soft. A missing key, HTTP
//! failure, or unparseable reply yields an empty string or `None`; callers
//! fall back to their deterministic paths.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmConfig;

/// Model class resolved to a concrete model name from config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Small,
    Large,
}

/// Options for a single completion
#[derive(Debug, Clone, Copy)]
pub struct ChatOpts {
    pub model: ModelClass,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOpts {
    fn default() -> Self {
        Self {
            model: ModelClass::Small,
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

/// Outcome of extracting JSON from a model reply
#[derive(Debug, Clone)]
pub enum JsonExtract {
    Parsed(Value),
    Malformed(String),
}

/// LLM client with stateless key rotation
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    fn model_for(&self, class: ModelClass) -> &str {
        match class {
            ModelClass::Small => &self.config.small_model,
            ModelClass::Large => &self.config.large_model,
        }
    }

    /// Multimodal caption model name
    pub fn caption_model(&self) -> &str {
        &self.config.caption_model
    }

    /// One-shot text completion. Returns an empty string on any failure so
    /// callers can use the reply directly as a label or summary.
    pub async fn chat_once(&self, system: &str, user: &str, opts: ChatOpts) -> String {
        let messages = json!([
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ]);
        let raw = self
            .complete_raw(self.model_for(opts.model), messages, opts.max_tokens, opts.temperature)
            .await
            .unwrap_or_default();
        normalize_reply(&raw)
    }

    /// One-shot JSON completion with tiered extraction. `None` when no JSON
    /// could be recovered.
    pub async fn chat_json(&self, system: &str, user: &str, opts: ChatOpts) -> Option<Value> {
        let messages = json!([
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ]);
        let raw = self
            .complete_raw(self.model_for(opts.model), messages, opts.max_tokens, opts.temperature)
            .await?;
        match extract_json(&raw) {
            JsonExtract::Parsed(value) => Some(value),
            JsonExtract::Malformed(raw) => {
                tracing::warn!("Could not extract JSON from model reply ({} chars)", raw.len());
                None
            }
        }
    }

    /// JSON completion that retries once with the large model and a bigger
    /// token budget when the primary attempt yields no parseable JSON.
    pub async fn chat_json_robust(&self, system: &str, user: &str, opts: ChatOpts) -> Option<Value> {
        if let Some(value) = self.chat_json(system, user, opts).await {
            return Some(value);
        }
        tracing::warn!("Primary JSON completion failed; retrying with large model");
        let retry = ChatOpts {
            model: ModelClass::Large,
            max_tokens: opts.max_tokens.max(4096),
            temperature: opts.temperature,
        };
        self.chat_json(system, user, retry).await
    }

    /// Raw completion against `{base_url}/chat/completions`. `None` on
    /// missing key, HTTP failure, or empty content.
    pub(crate) async fn complete_raw(
        &self,
        model: &str,
        messages: Value,
        max_tokens: u32,
        temperature: f32,
    ) -> Option<String> {
        let key = match resolve_key(&self.config.key_env_names) {
            Some(key) => key,
            None => {
                tracing::debug!("No LLM API key configured; skipping completion");
                return None;
            }
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let payload = json!({
            "model": model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "messages": messages,
        });

        let response = match self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(&payload)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("LLM request failed for {}: {}", model, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("LLM returned HTTP {} for {}", response.status(), model);
            return None;
        }

        let data: ChatResponse = match response.json().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Malformed LLM response body: {}", e);
                return None;
            }
        };

        let content = data.choices.into_iter().next()?.message.content?;
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(content.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Resolve the first usable API key from an ordered list of env var names.
pub fn resolve_key(names: &[String]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Strip conversational prefixes, leading list markers, and surrounding
/// quotes from a model reply, then collapse whitespace.
pub fn normalize_reply(text: &str) -> String {
    const BANNED_PREFIXES: &[&str] = &[
        "sure,", "sure.", "sure", "here is", "here are", "this image", "the image",
        "image shows", "the picture", "the photo", "the text describes",
        "the text describe", "it shows", "it depicts", "caption:", "description:",
        "output:", "result:", "answer:", "analysis:", "observation:", "topic:",
        "title:", "summary:",
    ];

    let mut t = text.trim().to_string();
    for prefix in BANNED_PREFIXES {
        if t.len() >= prefix.len()
            && t.is_char_boundary(prefix.len())
            && t[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            t = t[prefix.len()..]
                .trim_start_matches([' ', ':', '-', '\u{2014}', '\u{2013}'])
                .to_string();
        }
    }

    // Leading list markers
    let t = t
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '\u{2022}'))
        .trim();

    // Surrounding quotes and markdown artifacts
    let t = t.trim_matches(['"', '\'', '`']).trim();

    t.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tiered JSON extraction: strict parse, fenced code block, then the first
/// bracketed span.
pub fn extract_json(raw: &str) -> JsonExtract {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return JsonExtract::Parsed(value);
    }

    if let Some(inner) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return JsonExtract::Parsed(value);
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return JsonExtract::Parsed(value);
                }
            }
        }
    }

    JsonExtract::Malformed(raw.to_string())
}

/// Contents of the first ```-fenced block, if any
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_key_order() {
        env::set_var("CARDFORGE_TEST_KEY_B", "second");
        env::set_var("CARDFORGE_TEST_KEY_C", "third");
        let names = vec![
            "CARDFORGE_TEST_KEY_A".to_string(),
            "CARDFORGE_TEST_KEY_B".to_string(),
            "CARDFORGE_TEST_KEY_C".to_string(),
        ];
        assert_eq!(resolve_key(&names).as_deref(), Some("second"));
        env::remove_var("CARDFORGE_TEST_KEY_B");
        env::remove_var("CARDFORGE_TEST_KEY_C");
    }

    #[test]
    fn test_resolve_key_absent() {
        let names = vec!["CARDFORGE_TEST_KEY_MISSING".to_string()];
        assert_eq!(resolve_key(&names), None);
    }

    #[test]
    fn test_normalize_reply_strips_prefixes() {
        assert_eq!(normalize_reply("Sure, here is the summary text"), "the summary text");
        assert_eq!(normalize_reply("Caption: a red bicycle"), "a red bicycle");
        assert_eq!(normalize_reply("\"Quoted   label\""), "Quoted label");
        assert_eq!(normalize_reply("- Bulleted topic"), "Bulleted topic");
    }

    #[test]
    fn test_normalize_reply_collapses_whitespace() {
        assert_eq!(normalize_reply("  a\n  b\t c  "), "a b c");
    }

    #[test]
    fn test_extract_json_direct() {
        match extract_json(r#"["a", "b"]"#) {
            JsonExtract::Parsed(Value::Array(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_extract_json_fenced() {
        let raw = "Here you go:\n```json\n{\"k\": 1}\n```\nDone.";
        match extract_json(raw) {
            JsonExtract::Parsed(value) => assert_eq!(value["k"], 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_extract_json_span() {
        let raw = "The chunks are [\"one\", \"two\"] as requested.";
        match extract_json(raw) {
            JsonExtract::Parsed(Value::Array(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_extract_json_malformed() {
        match extract_json("no json here at all") {
            JsonExtract::Malformed(raw) => assert_eq!(raw, "no json here at all"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
