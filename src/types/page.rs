//! Parsed pages of an uploaded document

/// One extracted page. Pages are transient and never persisted; they live in
/// memory only while their file moves through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// 1-based page number, monotonically increasing within a file
    pub page_num: u32,
    /// Extracted text
    pub text: String,
    /// Raw JPEG blobs extracted from the page, best-effort
    pub images: Vec<Vec<u8>>,
}

impl Page {
    pub fn new(page_num: u32, text: impl Into<String>) -> Self {
        Self {
            page_num,
            text: text.into(),
            images: Vec::new(),
        }
    }
}
