//! Best-effort image captioning through the multimodal chat endpoint
//!
//! Captions enrich page text before chunking; any failure yields an empty
//! caption and never blocks ingestion.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;

use super::llm::{normalize_reply, LlmClient};

const SYSTEM_PROMPT: &str = "You are an expert vision captioner. Produce a precise, \
information-dense caption of the image. Do not include conversational phrases, \
prefaces, meta commentary, or apologies. Avoid starting with phrases like 'The \
image shows' or 'Here is'. Write a single concise paragraph with concrete \
entities, text in the image, and notable details.";

const USER_PROMPT: &str = "Caption this image at the finest level of detail. \
Include any visible text verbatim. Return only the caption text.";

pub struct Captioner {
    llm: Arc<LlmClient>,
}

impl Captioner {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Caption a JPEG blob. Empty string on any failure.
    pub async fn caption_image(&self, jpeg: &[u8]) -> String {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        let messages = json!([
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": [
                {"type": "text", "text": USER_PROMPT},
                {"type": "image_url", "image_url": {"url": data_url}},
            ]},
        ]);

        let model = self.llm.caption_model().to_string();
        let raw = self
            .llm
            .complete_raw(&model, messages, 512, 0.2)
            .await
            .unwrap_or_default();
        normalize_reply(&raw)
    }
}
