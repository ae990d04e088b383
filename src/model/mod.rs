//! Data model for the conversion pipeline.
//!
//! Extraction types ([`Page`], [`TextRun`], [`ImageRegion`]) are produced by
//! the page extractor and mutated only by the OCR/vision stages that enrich
//! them. Inference types ([`InferredBlock`], [`Paragraph`]) reference the
//! extraction layer by index rather than by borrow, so the document can keep
//! being enriched while classification results accumulate. Output types
//! ([`RenderedDocument`], [`Chunk`]) are what callers and the publisher see.

pub mod document;
pub mod inferred;
pub mod rendered;

pub use document::{
    Block, BoundingBox, Document, DocumentMetadata, ImagePayload, ImageRegion, Page, PageIssue,
    TextRun,
};
pub use inferred::{BlockRef, InferredBlock, Paragraph};
pub use rendered::{Chunk, ProcessingStats, RenderedDocument};
