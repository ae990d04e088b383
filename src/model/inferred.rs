//! Inference-layer types: classified blocks in document order.

/// Index-based reference into a page's block list. Inferred blocks point
/// back at the runs and regions they were derived from without owning them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub page: usize,
    pub block: usize,
}

/// A sequence of runs merged into continuous prose.
///
/// Geometry of the first and last line is kept so a second assembly pass
/// over already-assembled paragraphs reaches the same merge decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub text: String,
    /// Runs this paragraph was merged from, in order. Empty for synthetic
    /// placeholder paragraphs.
    pub sources: Vec<BlockRef>,
    pub first_page: usize,
    /// A paragraph may span a page boundary; its last run can live on a
    /// later page than its first.
    pub last_page: usize,
    /// The text currently ends mid-word (a wrap hyphen was seen), so a
    /// following run should be joined without a space.
    pub hyphen_pending: bool,
    /// Top edge of the first line, PDF points.
    pub first_line_top: f32,
    /// Bottom edge of the last line, PDF points.
    pub last_line_bottom: f32,
}

impl Paragraph {
    /// A paragraph carrying a marker string instead of extracted text
    /// (placeholders for failed or OCR-less pages).
    pub fn marker(text: String, page: usize) -> Self {
        Self {
            text,
            sources: Vec::new(),
            first_page: page,
            last_page: page,
            hyphen_pending: false,
            first_line_top: 0.0,
            last_line_bottom: 0.0,
        }
    }
}

/// A page block after semantic classification.
#[derive(Debug, Clone, PartialEq)]
pub enum InferredBlock {
    /// Heading level 1–3, assigned from the document-wide font-size rank.
    Heading {
        level: u8,
        text: String,
        page: usize,
        sources: Vec<BlockRef>,
    },
    Paragraph(Paragraph),
    ListItem {
        text: String,
        page: usize,
        sources: Vec<BlockRef>,
    },
    /// One row of a detected grid layout; consecutive rows are grouped
    /// into a single table at render time.
    TableRow { cells: Vec<String>, page: usize },
    /// An image region, with its vision description when one was produced.
    ImageCaption {
        page: usize,
        source: BlockRef,
        description: Option<String>,
    },
}

impl InferredBlock {
    /// The page this block belongs to (first page for spanning paragraphs).
    pub fn page(&self) -> usize {
        match self {
            InferredBlock::Heading { page, .. }
            | InferredBlock::ListItem { page, .. }
            | InferredBlock::TableRow { page, .. }
            | InferredBlock::ImageCaption { page, .. } => *page,
            InferredBlock::Paragraph(p) => p.first_page,
        }
    }
}
