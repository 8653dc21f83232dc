//! Document parsing, chunking, and summarization

pub mod chunker;
pub mod parser;
pub mod summarizer;

pub use chunker::build_cards_from_pages;
pub use parser::extract_pages;
pub use summarizer::{cheap_summarize, clean_chunk_text};
