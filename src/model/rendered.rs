//! Output-layer types: what callers and the publisher consume.

use serde::{Deserialize, Serialize};

use super::document::DocumentMetadata;

/// A bounded span of rendered text submitted for embedding.
///
/// Chunks partition the rendered Markdown exactly: `start..end` byte ranges
/// are contiguous, and concatenating all chunk texts reproduces the source
/// string byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// Byte offset of the chunk start in the rendered Markdown.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
    /// Nearest heading preceding the chunk, for retrieval context.
    pub heading: Option<String>,
}

/// Counters and timings for one processing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_pages: usize,
    /// Pages whose text came from native extraction.
    pub extracted_pages: usize,
    /// Pages whose text came from OCR.
    pub ocr_pages: usize,
    /// Pages that ended up with a recovered issue marker.
    pub failed_pages: usize,
    pub image_regions: usize,
    pub images_described: usize,
    pub extract_duration_ms: u64,
    /// Time spent in the concurrent OCR/vision stage.
    pub recognize_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The final artifact of [`crate::process`]: rendered Markdown plus the
/// chunking used for embedding, metadata, and run diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub markdown: String,
    pub chunks: Vec<Chunk>,
    pub metadata: DocumentMetadata,
    /// Truncated SHA-256 of the source bytes.
    pub checksum: String,
    /// Indented outline derived from the rendered headings.
    pub table_of_contents: Vec<String>,
    /// Human-readable notes about recovered failures.
    pub warnings: Vec<String>,
    pub stats: ProcessingStats,
}

impl RenderedDocument {
    /// Reconstruct the rendered text from the chunk partition. Used by
    /// tests to assert the no-gaps / no-overlaps invariant.
    pub fn text_from_chunks(&self) -> String {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}
