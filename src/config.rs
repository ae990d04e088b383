//! Configuration for the conversion pipeline.
//!
//! All behaviour is controlled through one read-only [`PipelineConfig`],
//! built via its [`PipelineConfigBuilder`]. The pipeline never reads the
//! environment or mutates the config; callers construct it once and share
//! it across documents.
//!
//! The policy switches have a fixed effect table: `ocr_enabled = false`
//! means the OCR adapter is never invoked (text-less pages render a
//! placeholder block instead); `analyze_images = false` means the vision
//! describer is never invoked (images render without descriptions);
//! `scratch_dir` is the location for intermediate rasters and defaults to
//! the system temp directory.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::vision::VisionModel;
use crate::publish::{EmbeddingModel, VectorStore};

/// Configuration for PDF processing and publishing.
///
/// # Example
/// ```rust
/// use pagemill::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .ocr_enabled(true)
///     .ocr_languages("rus+eng")
///     .chunk_budget(1200)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Invoke the OCR adapter on pages with no native text. Default: false.
    pub ocr_enabled: bool,

    /// Language hint set passed to the OCR engine. Default: "rus+eng".
    pub ocr_languages: String,

    /// Invoke the vision describer on embedded images. Default: false.
    pub analyze_images: bool,

    /// Scratch location for intermediate rasters. `None` uses the system
    /// temp directory.
    pub scratch_dir: Option<PathBuf>,

    /// Maximum accepted input size in megabytes. Default: 50.
    pub max_file_size_mb: usize,

    /// Maximum accepted page count. Default: 500.
    pub max_pages: usize,

    /// Chunk character budget for embedding. Default: 1500.
    ///
    /// Splits prefer paragraph boundaries near the budget, so actual chunk
    /// lengths vary around it rather than hitting it exactly.
    pub chunk_budget: usize,

    /// Texts per embedding API call. Default: 50.
    pub embed_batch_size: usize,

    /// Pages processed concurrently through the OCR/vision stage. Default: 4.
    pub page_concurrency: usize,

    /// Concurrent OCR engine invocations, bounded by local CPU. Default: 2.
    pub ocr_concurrency: usize,

    /// Concurrent vision API calls, bounded by external rate limits.
    /// Default: 4.
    pub vision_concurrency: usize,

    /// Retry attempts for transient model-call failures. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles per attempt.
    /// Default: 500.
    pub retry_backoff_ms: u64,

    /// Longest raster edge in pixels. Default: 2000.
    ///
    /// A safety cap independent of page size: rasters feed OCR and region
    /// crops, and an unbounded render of a poster-sized page would exhaust
    /// memory before either gets to run.
    pub raster_max_pixels: u32,

    // ── Layout heuristics ───────────────────────────────────────────────
    /// How much larger than body text a size must be to qualify as a
    /// heading size, in points. Default: 1.5.
    pub heading_min_delta: f32,

    /// Tolerance when matching a run's size against a ranked heading size,
    /// in points. Default: 0.5.
    pub heading_match_tolerance: f32,

    /// Baseline grouping tolerance as a fraction of font size. Default: 0.3.
    pub line_y_tolerance: f32,

    /// Paragraph-merge gap ceiling as a fraction of page height.
    /// Default: 0.025.
    pub paragraph_gap_ratio: f32,

    /// Pages with less native text than this are treated as text-less and
    /// flagged for OCR. Default: 100.
    pub empty_page_text_floor: usize,

    /// A document whose text-less page ratio exceeds this is flagged as
    /// scanned. Default: 0.5.
    pub scanned_page_ratio: f32,

    // ── Output shaping ──────────────────────────────────────────────────
    /// Include YAML front matter with document metadata. Default: false.
    pub include_metadata: bool,

    /// Page separator in the rendered Markdown. Default: none.
    pub page_separator: PageSeparator,

    // ── Capability handles ──────────────────────────────────────────────
    /// OCR engine. Required only when `ocr_enabled` is true.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Vision model. Required only when `analyze_images` is true.
    pub vision: Option<Arc<dyn VisionModel>>,

    /// Embedding model, required by [`crate::publish()`].
    pub embedder: Option<Arc<dyn EmbeddingModel>>,

    /// Vector store, required by [`crate::publish()`].
    pub store: Option<Arc<dyn VectorStore>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: false,
            ocr_languages: "rus+eng".to_string(),
            analyze_images: false,
            scratch_dir: None,
            max_file_size_mb: 50,
            max_pages: 500,
            chunk_budget: 1500,
            embed_batch_size: 50,
            page_concurrency: 4,
            ocr_concurrency: 2,
            vision_concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            raster_max_pixels: 2000,
            heading_min_delta: 1.5,
            heading_match_tolerance: 0.5,
            line_y_tolerance: 0.3,
            paragraph_gap_ratio: 0.025,
            empty_page_text_floor: 100,
            scanned_page_ratio: 0.5,
            include_metadata: false,
            page_separator: PageSeparator::default(),
            ocr_engine: None,
            vision: None,
            embedder: None,
            store: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ocr_enabled", &self.ocr_enabled)
            .field("ocr_languages", &self.ocr_languages)
            .field("analyze_images", &self.analyze_images)
            .field("scratch_dir", &self.scratch_dir)
            .field("max_file_size_mb", &self.max_file_size_mb)
            .field("max_pages", &self.max_pages)
            .field("chunk_budget", &self.chunk_budget)
            .field("page_concurrency", &self.page_concurrency)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("vision_concurrency", &self.vision_concurrency)
            .field("max_retries", &self.max_retries)
            .field("page_separator", &self.page_separator)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("vision", &self.vision.as_ref().map(|_| "<dyn VisionModel>"))
            .field("embedder", &self.embedder.as_ref().map(|_| "<dyn EmbeddingModel>"))
            .field("store", &self.store.as_ref().map(|_| "<dyn VectorStore>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn ocr_enabled(mut self, v: bool) -> Self {
        self.config.ocr_enabled = v;
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn analyze_images(mut self, v: bool) -> Self {
        self.config.analyze_images = v;
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn max_file_size_mb(mut self, mb: usize) -> Self {
        self.config.max_file_size_mb = mb.max(1);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn chunk_budget(mut self, chars: usize) -> Self {
        self.config.chunk_budget = chars.max(100);
        self
    }

    pub fn embed_batch_size(mut self, n: usize) -> Self {
        self.config.embed_batch_size = n.max(1);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn vision_concurrency(mut self, n: usize) -> Self {
        self.config.vision_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn raster_max_pixels(mut self, px: u32) -> Self {
        self.config.raster_max_pixels = px.max(100);
        self
    }

    pub fn heading_min_delta(mut self, pts: f32) -> Self {
        self.config.heading_min_delta = pts.max(0.0);
        self
    }

    pub fn heading_match_tolerance(mut self, pts: f32) -> Self {
        self.config.heading_match_tolerance = pts.max(0.0);
        self
    }

    pub fn line_y_tolerance(mut self, factor: f32) -> Self {
        self.config.line_y_tolerance = factor.max(0.0);
        self
    }

    pub fn paragraph_gap_ratio(mut self, ratio: f32) -> Self {
        self.config.paragraph_gap_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn empty_page_text_floor(mut self, chars: usize) -> Self {
        self.config.empty_page_text_floor = chars;
        self
    }

    pub fn scanned_page_ratio(mut self, ratio: f32) -> Self {
        self.config.scanned_page_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn vision(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision = Some(model);
        self
    }

    pub fn embedder(mut self, model: Arc<dyn EmbeddingModel>) -> Self {
        self.config.embedder = Some(model);
        self
    }

    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.config.store = Some(store);
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<PipelineConfig, ProcessingError> {
        let c = &self.config;
        if c.ocr_enabled && c.ocr_languages.trim().is_empty() {
            return Err(ProcessingError::InvalidConfig(
                "OCR is enabled but the language hint set is empty".into(),
            ));
        }
        if c.paragraph_gap_ratio <= 0.0 {
            return Err(ProcessingError::InvalidConfig(
                "paragraph_gap_ratio must be positive".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How to separate pages in the rendered Markdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; blocks flow continuously. (default)
    #[default]
    None,
    /// Horizontal rule between pages.
    HorizontalRule,
    /// HTML comment with the page number: `<!-- page N -->`.
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator preceding the given page (1-indexed), or `None`
    /// when pages flow continuously.
    pub fn render(&self, page_num: usize) -> Option<String> {
        match self {
            PageSeparator::None => None,
            PageSeparator::HorizontalRule => Some("---".to_string()),
            PageSeparator::Comment => Some(format!("<!-- page {} -->", page_num)),
            PageSeparator::Custom(s) => Some(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = PipelineConfig::builder().build().unwrap();
        assert!(!config.ocr_enabled);
        assert!(!config.analyze_images);
        assert_eq!(config.chunk_budget, 1500);
        assert_eq!(config.ocr_languages, "rus+eng");
    }

    #[test]
    fn builder_clamps_floors() {
        let config = PipelineConfig::builder()
            .chunk_budget(1)
            .page_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.chunk_budget, 100);
        assert_eq!(config.page_concurrency, 1);
    }

    #[test]
    fn ocr_without_languages_is_rejected() {
        let err = PipelineConfig::builder()
            .ocr_enabled(true)
            .ocr_languages("  ")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("language"));
    }

    #[test]
    fn separator_rendering() {
        assert_eq!(PageSeparator::None.render(3), None);
        assert_eq!(
            PageSeparator::Comment.render(3).as_deref(),
            Some("<!-- page 3 -->")
        );
        assert_eq!(
            PageSeparator::HorizontalRule.render(3).as_deref(),
            Some("---")
        );
    }
}
