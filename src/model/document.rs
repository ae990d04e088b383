//! Extraction-layer types: the document as the page extractor sees it.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in PDF user space (points, origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f32,
    /// Bottom edge.
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Top edge (PDF y grows upward).
    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    /// Right edge.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// A contiguous span of text sharing font attributes, as extracted from a
/// page (or recognised by OCR). Immutable once extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    /// Effective font size in points. For OCR runs this is approximated
    /// from the glyph bounding-box height.
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub bbox: BoundingBox,
    /// Index of the owning page. A run belongs to exactly one page.
    pub page_index: usize,
    /// Recognition confidence in 0.0–1.0, present only for OCR runs.
    pub confidence: Option<f32>,
}

impl TextRun {
    /// Create a run from native extraction, deriving style flags from the
    /// font name the way layout analysers conventionally do.
    pub fn native(
        text: String,
        font_size: f32,
        font_name: &str,
        bbox: BoundingBox,
        page_index: usize,
    ) -> Self {
        let lower = font_name.to_lowercase();
        let bold =
            lower.contains("bold") || lower.contains("black") || lower.contains("heavy");
        let italic = lower.contains("italic") || lower.contains("oblique");
        Self {
            text,
            font_size,
            bold,
            italic,
            bbox,
            page_index,
            confidence: None,
        }
    }
}

/// Raw bytes of an image region, with the MIME type they decode as.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// An image area on a page: an embedded picture, or the whole page when it
/// has no extractable text and is destined for OCR.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRegion {
    pub bbox: BoundingBox,
    /// Pixel data. Embedded JPEG streams are carried directly; other
    /// encodings are filled in by the raster stage, and stay `None` when
    /// rasterisation is unavailable.
    pub payload: Option<ImagePayload>,
    /// True for the synthetic full-page region of a text-less page.
    pub ocr_target: bool,
    /// Natural-language description from the vision model. Absent until
    /// the describer completes, or permanently when policy disables it or
    /// the call exhausts its retries.
    pub description: Option<String>,
}

/// A structural unit of a page prior to semantic classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(TextRun),
    Image(ImageRegion),
}

/// A recovered, page-scoped failure. Annotated on the page and rendered as
/// an inline marker; never aborts the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageIssue {
    /// The page's content stream could not be parsed.
    ExtractionFailed(String),
    /// The page needed OCR but the engine was missing or timed out.
    OcrUnavailable(String),
    /// The page has no extractable text and OCR is disabled.
    OcrSkipped,
}

/// One page of the document: extracted blocks in reading order.
#[derive(Debug, Clone)]
pub struct Page {
    /// Zero-based index; equals the source page order.
    pub index: usize,
    /// Media box width in points.
    pub width: f32,
    /// Media box height in points.
    pub height: f32,
    pub blocks: Vec<Block>,
    pub issue: Option<PageIssue>,
    /// Set once OCR text has replaced the page's (empty) native text.
    pub ocr_applied: bool,
}

impl Page {
    pub fn new(index: usize, width: f32, height: f32) -> Self {
        Self {
            index,
            width,
            height,
            blocks: Vec::new(),
            issue: None,
            ocr_applied: false,
        }
    }

    /// An empty page standing in for one that could not be parsed.
    pub fn failed(index: usize, detail: String) -> Self {
        Self {
            index,
            width: 612.0,
            height: 792.0,
            blocks: Vec::new(),
            issue: Some(PageIssue::ExtractionFailed(detail)),
            ocr_applied: false,
        }
    }

    /// Total characters of native or recognised text on the page.
    pub fn text_len(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| match b {
                Block::Text(run) => run.text.trim().len(),
                Block::Image(_) => 0,
            })
            .sum()
    }

    /// Iterator over the page's text runs.
    pub fn text_runs(&self) -> impl Iterator<Item = &TextRun> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Text(run) => Some(run),
            Block::Image(_) => None,
        })
    }

    /// The full-page OCR region, if this page was flagged for OCR.
    pub fn ocr_region(&self) -> Option<&ImageRegion> {
        self.blocks.iter().find_map(|b| match b {
            Block::Image(r) if r.ocr_target => Some(r),
            _ => None,
        })
    }
}

/// Document information-dictionary metadata plus derived flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: String,
    pub subject: String,
    pub page_count: usize,
    /// File name supplied by the caller.
    pub source_name: String,
    pub has_images: bool,
    /// More than half of the pages carry no extractable text.
    pub is_scanned: bool,
}

/// A document mid-pipeline: ordered pages, exclusively owned by one
/// processing run, discarded after rendering completes or fails terminally.
#[derive(Debug)]
pub struct Document {
    /// Truncated SHA-256 of the source bytes; identifies the document.
    pub checksum: String,
    pub metadata: DocumentMetadata,
    pub pages: Vec<Page>,
}
