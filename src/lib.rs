//! # pagemill
//!
//! Convert PDF documents into structured Markdown, with optional OCR for
//! scanned pages, optional image understanding through a vision model, and
//! optional ingestion into a vector-search store.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Extract    native text runs + image regions (lopdf)
//!  ├─ 2. Raster     pixel data for OCR pages and image crops (pdfium)
//!  ├─ 3. Recognise  OCR on text-less pages ─┐ concurrent, bounded,
//!  ├─ 4. Describe   vision on image regions ┘ joined in page order
//!  ├─ 5. Structure  font-rank headings, lists, tables, paragraphs
//!  ├─ 6. Assemble   paragraph merging across line/page breaks
//!  ├─ 7. Render     deterministic Markdown (+ optional insert script)
//!  └─ 8. Publish    chunk → embed → upsert into the vector store
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagemill::{process, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bytes = std::fs::read("manual.pdf")?;
//!     let config = PipelineConfig::default();
//!     let output = process(&bytes, &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("{} chunks, {} warnings", output.chunks.len(), output.warnings.len());
//!     Ok(())
//! }
//! ```
//!
//! ## External services
//!
//! OCR, vision, embedding, and storage sit behind small capability traits
//! ([`OcrEngine`], [`VisionModel`], [`EmbeddingModel`], [`VectorStore`]) so
//! they can be swapped or stubbed in tests without touching pipeline logic.
//! Default implementations are provided for the tesseract CLI and
//! OpenAI-compatible / PostgREST-style HTTP services. Every external
//! failure is recovered: a bad page, a dead OCR engine, a rate-limited
//! vision call, or a failed chunk embedding each degrade into an inline
//! marker or a report entry — only structurally invalid input fails a
//! document.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod prompts;
pub mod publish;
pub mod render;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageSeparator, PipelineConfig, PipelineConfigBuilder};
pub use error::{ModelError, OcrError, ProcessingError, StoreError};
pub use model::{
    Block, BoundingBox, Chunk, Document, DocumentMetadata, ImagePayload, ImageRegion,
    InferredBlock, Page, PageIssue, Paragraph, ProcessingStats, RenderedDocument, TextRun,
};
pub use pipeline::ocr::{OcrEngine, OcrRun, TesseractOcr};
pub use pipeline::vision::{OpenAiVision, VisionModel};
pub use process::{process, process_file, process_named, process_with_cancel};
pub use publish::{
    publish, ChunkFailure, ChunkRecord, EmbeddingModel, OpenAiEmbeddings, PublishReport,
    RestVectorStore, VectorStore,
};
pub use render::{render_insert_script, InsertScriptOptions};
