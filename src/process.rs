//! Top-level document processing.
//!
//! The eager entry points here drive the whole pipeline for one document:
//!
//! 1. input guards (magic bytes, size), source checksum
//! 2. native extraction on the blocking pool
//! 3. rasterisation of whatever OCR and vision will need
//! 4. the concurrent OCR/vision stage — pages fan out on a bounded worker
//!    pool, with independent semaphore ceilings for OCR and vision calls
//! 5. structure inference, paragraph assembly, rendering, chunking —
//!    single-threaded, since they traverse strict page order
//!
//! Page results are buffered and joined in page-index order before the
//! single-threaded phase, so output order always equals source order no
//! matter how the concurrent calls complete. A fired cancellation token
//! aborts in-flight page work and surfaces as
//! [`ProcessingError::Cancelled`] with no partial artifact.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::io::Write;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::ProcessingError;
use crate::model::{
    Block, BoundingBox, ImagePayload, Page, PageIssue, ProcessingStats, RenderedDocument, TextRun,
};
use crate::pipeline::ocr::OcrRun;
use crate::pipeline::raster::{self, FullPageRaster, PageRasterPlan, RasterOutput};
use crate::pipeline::{assemble, extract, structure, vision};
use crate::publish::chunk_text;
use crate::render::{extract_toc, render_markdown};

/// Process PDF bytes into a rendered document.
///
/// Returns `Ok` even when individual pages or images failed — those are
/// annotated inline and listed in `warnings`. Only structurally invalid
/// input, configured limits, or cancellation produce an `Err`, and then no
/// partial artifact is returned.
pub async fn process(
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<RenderedDocument, ProcessingError> {
    process_named(bytes, "document.pdf", config).await
}

/// [`process`] with an explicit source file name, used for metadata
/// fallbacks and the store record.
pub async fn process_named(
    bytes: &[u8],
    source_name: &str,
    config: &PipelineConfig,
) -> Result<RenderedDocument, ProcessingError> {
    process_with_cancel(bytes, source_name, config, CancellationToken::new()).await
}

/// Process a PDF file from disk.
pub async fn process_file(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RenderedDocument, ProcessingError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ProcessingError::ReadFailed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    process_named(&bytes, &name, config).await
}

/// [`process_named`] with a document-level cancellation signal.
pub async fn process_with_cancel(
    bytes: &[u8],
    source_name: &str,
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> Result<RenderedDocument, ProcessingError> {
    let total_start = Instant::now();

    // ── Step 1: input guards ─────────────────────────────────────────────
    let limit_bytes = config.max_file_size_mb * 1024 * 1024;
    if bytes.len() > limit_bytes {
        return Err(ProcessingError::TooLarge {
            size_mb: bytes.len() / (1024 * 1024),
            limit_mb: config.max_file_size_mb,
        });
    }
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ProcessingError::NotAPdf { magic });
    }
    let checksum = checksum_hex(bytes);
    info!(source = source_name, checksum, "processing document");

    // ── Step 2: native extraction ────────────────────────────────────────
    let extract_start = Instant::now();
    let mut doc = {
        let bytes = bytes.to_vec();
        let source = source_name.to_string();
        let cfg = config.clone();
        let sum = checksum.clone();
        tokio::task::spawn_blocking(move || {
            extract::extract_document(&bytes, &source, sum, &cfg)
        })
        .await
        .map_err(|e| ProcessingError::Internal(format!("extract task panicked: {e}")))??
    };
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    debug!(pages = doc.pages.len(), extract_duration_ms, "extraction done");

    let mut warnings: Vec<String> = Vec::new();
    if doc.metadata.is_scanned && !config.ocr_enabled {
        warnings.push("document looks scanned but OCR is disabled".to_string());
    }

    let ocr_active = config.ocr_enabled && config.ocr_engine.is_some();
    if config.ocr_enabled && config.ocr_engine.is_none() {
        warnings.push("OCR is enabled but no engine is configured".to_string());
    }
    let vision_active = config.analyze_images && config.vision.is_some();
    if config.analyze_images && config.vision.is_none() {
        warnings.push("image analysis is enabled but no vision model is configured".to_string());
    }

    // ── Step 3: rasterise what OCR and vision will need ──────────────────
    let mut rasters = RasterOutput::default();
    let plan = raster_plan(&doc.pages, ocr_active, vision_active);
    if !plan.is_empty() {
        let scratch = write_scratch_pdf(bytes, config)?;
        match raster::rasterize(scratch.path(), plan, config.raster_max_pixels).await {
            Ok(output) => rasters = output,
            Err(detail) => {
                warn!(%detail, "rasterisation unavailable");
                warnings.push(format!("rasterisation unavailable: {detail}"));
            }
        }
    }

    // Hand region crops to their image blocks.
    for ((page_idx, block_idx), png) in rasters.region_pngs.drain() {
        if let Some(Block::Image(region)) = doc
            .pages
            .get_mut(page_idx)
            .and_then(|p| p.blocks.get_mut(block_idx))
        {
            region.payload = Some(ImagePayload {
                bytes: png,
                mime: "image/png",
            });
        }
    }

    // ── Step 4: concurrent OCR/vision stage ──────────────────────────────
    let recognize_start = Instant::now();
    let ocr_sem = Arc::new(Semaphore::new(config.ocr_concurrency));
    let vision_sem = Arc::new(Semaphore::new(config.vision_concurrency));
    let mut full_pages = rasters.full_pages;

    let pages = std::mem::take(&mut doc.pages);
    let outcomes: Vec<Result<PageOutcome, ProcessingError>> =
        stream::iter(pages.into_iter().map(|page| {
            let config = config.clone();
            let cancel = cancel.clone();
            let ocr_sem = Arc::clone(&ocr_sem);
            let vision_sem = Arc::clone(&vision_sem);
            let raster = full_pages.remove(&page.index);
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ProcessingError::Cancelled),
                    outcome = run_page(page, raster, &config, ocr_sem, vision_sem) => Ok(outcome),
                }
            }
        }))
        .buffer_unordered(config.page_concurrency)
        .collect()
        .await;

    let mut page_outcomes = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        page_outcomes.push(outcome?);
    }
    // Join in page-index order: the ordering guarantee for everything
    // downstream (blocks, warnings), independent of completion order above.
    page_outcomes.sort_by_key(|o| o.page.index);

    let mut described = 0usize;
    let mut pages: Vec<Page> = Vec::with_capacity(page_outcomes.len());
    for outcome in page_outcomes {
        described += outcome.described;
        warnings.extend(outcome.warnings);
        pages.push(outcome.page);
    }
    doc.pages = pages;
    let recognize_duration_ms = recognize_start.elapsed().as_millis() as u64;

    if cancel.is_cancelled() {
        return Err(ProcessingError::Cancelled);
    }

    // ── Step 5: single-threaded structure, assembly, rendering ───────────
    let blocks = structure::infer_document(&doc, config);
    let blocks = assemble::assemble(blocks, &doc.pages, config.paragraph_gap_ratio);
    let markdown = render_markdown(&blocks, &doc.metadata, config);
    let table_of_contents = extract_toc(&markdown);
    let chunks = chunk_text(&markdown, config.chunk_budget);

    for page in &doc.pages {
        match &page.issue {
            Some(PageIssue::ExtractionFailed(detail)) => {
                warnings.push(format!("page {}: extraction failed: {detail}", page.index + 1));
            }
            Some(PageIssue::OcrUnavailable(detail)) => {
                warnings.push(format!("page {}: OCR unavailable: {detail}", page.index + 1));
            }
            Some(PageIssue::OcrSkipped) | None => {}
        }
    }

    let stats = ProcessingStats {
        total_pages: doc.pages.len(),
        extracted_pages: doc
            .pages
            .iter()
            .filter(|p| p.issue.is_none() && !p.ocr_applied && p.ocr_region().is_none())
            .count(),
        ocr_pages: doc.pages.iter().filter(|p| p.ocr_applied).count(),
        failed_pages: doc.pages.iter().filter(|p| p.issue.is_some()).count(),
        image_regions: doc
            .pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .filter(|b| matches!(b, Block::Image(r) if !r.ocr_target))
            .count(),
        images_described: described,
        extract_duration_ms,
        recognize_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        pages = stats.total_pages,
        ocr_pages = stats.ocr_pages,
        failed = stats.failed_pages,
        chunks = chunks.len(),
        total_ms = stats.total_duration_ms,
        "processing complete"
    );

    Ok(RenderedDocument {
        markdown,
        chunks,
        metadata: doc.metadata,
        checksum: doc.checksum,
        table_of_contents,
        warnings,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

struct PageOutcome {
    page: Page,
    warnings: Vec<String>,
    described: usize,
}

/// The OCR/vision work for one page. Never errors: every failure is
/// annotated on the page or reported as a warning.
async fn run_page(
    mut page: Page,
    raster: Option<FullPageRaster>,
    config: &PipelineConfig,
    ocr_sem: Arc<Semaphore>,
    vision_sem: Arc<Semaphore>,
) -> PageOutcome {
    let mut warnings = Vec::new();
    let mut described = 0usize;
    let page_num = page.index + 1;

    if page.ocr_region().is_some() {
        match (&config.ocr_engine, config.ocr_enabled, raster) {
            (Some(engine), true, Some(raster)) => {
                let result = {
                    let _permit = ocr_sem.acquire().await;
                    engine.recognize(&raster.png, &config.ocr_languages).await
                };
                match result {
                    Ok(runs) if !runs.is_empty() => {
                        debug!(page = page_num, runs = runs.len(), "OCR applied");
                        apply_ocr_runs(&mut page, runs, raster.scale);
                    }
                    Ok(_) => {
                        debug!(page = page_num, "OCR found no text");
                    }
                    Err(e) => {
                        warn!(page = page_num, error = %e, "OCR failed");
                        page.issue = Some(PageIssue::OcrUnavailable(e.to_string()));
                    }
                }
            }
            (Some(_), true, None) => {
                page.issue = Some(PageIssue::OcrUnavailable(
                    "page raster unavailable".to_string(),
                ));
            }
            _ => {
                if page.issue.is_none() {
                    page.issue = Some(PageIssue::OcrSkipped);
                }
            }
        }
    }

    if config.analyze_images {
        if let Some(vision_model) = &config.vision {
            let context = page_context(&page);
            let targets: Vec<(usize, ImagePayload)> = page
                .blocks
                .iter()
                .enumerate()
                .filter_map(|(i, b)| match b {
                    Block::Image(r) if !r.ocr_target && r.description.is_none() => {
                        r.payload.clone().map(|p| (i, p))
                    }
                    _ => None,
                })
                .collect();

            let futures = targets.into_iter().map(|(block_idx, payload)| {
                let vision_model = Arc::clone(vision_model);
                let vision_sem = Arc::clone(&vision_sem);
                let context = context.clone();
                let max_retries = config.max_retries;
                let backoff_ms = config.retry_backoff_ms;
                async move {
                    let _permit = vision_sem.acquire().await;
                    let description = vision::describe_with_retry(
                        vision_model.as_ref(),
                        &payload.bytes,
                        payload.mime,
                        &context,
                        max_retries,
                        backoff_ms,
                    )
                    .await;
                    (block_idx, description)
                }
            });

            for (block_idx, description) in futures::future::join_all(futures).await {
                match description {
                    Some(text) => {
                        described += 1;
                        if let Some(Block::Image(region)) = page.blocks.get_mut(block_idx) {
                            region.description = Some(text);
                        }
                    }
                    None => warnings.push(format!("page {page_num}: image description failed")),
                }
            }
        }
    }

    PageOutcome {
        page,
        warnings,
        described,
    }
}

/// Replace a text-less page's (noise-level) native runs with the
/// recognised text, mapped from raster pixels back into page points.
fn apply_ocr_runs(page: &mut Page, runs: Vec<OcrRun>, scale: f32) {
    let scale = if scale > 0.0 { scale } else { 1.0 };
    page.blocks.retain(|b| matches!(b, Block::Image(_)));

    for run in runs {
        let height = run.height / scale;
        let x = run.left / scale;
        let y_top = page.height - run.top / scale;
        let bbox = BoundingBox::new(x, y_top - height, run.width / scale, height);
        page.blocks.push(Block::Text(TextRun {
            text: run.text,
            font_size: height.max(1.0),
            bold: false,
            italic: false,
            bbox,
            page_index: page.index,
            confidence: Some((run.confidence / 100.0).clamp(0.0, 1.0)),
        }));
    }
    page.ocr_applied = true;
}

/// Nearby text for grounding an image description: the leading text of the
/// page, capped.
fn page_context(page: &Page) -> String {
    const CONTEXT_CHARS: usize = 240;
    let mut context = String::new();
    for run in page.text_runs() {
        if context.chars().count() >= CONTEXT_CHARS {
            break;
        }
        if !context.is_empty() {
            context.push(' ');
        }
        context.push_str(run.text.trim());
    }
    context.chars().take(CONTEXT_CHARS).collect()
}

fn raster_plan(pages: &[Page], ocr_active: bool, vision_active: bool) -> Vec<PageRasterPlan> {
    let mut plan = Vec::new();
    for page in pages {
        let full_page = ocr_active && page.ocr_region().is_some();
        let regions: Vec<(usize, BoundingBox)> = if vision_active {
            page.blocks
                .iter()
                .enumerate()
                .filter_map(|(i, b)| match b {
                    Block::Image(r) if !r.ocr_target && r.payload.is_none() => Some((i, r.bbox)),
                    _ => None,
                })
                .collect()
        } else {
            Vec::new()
        };
        if full_page || !regions.is_empty() {
            plan.push(PageRasterPlan {
                page_index: page.index,
                page_width: page.width,
                page_height: page.height,
                full_page,
                regions,
            });
        }
    }
    plan
}

/// Write the source bytes where pdfium can open them.
fn write_scratch_pdf(
    bytes: &[u8],
    config: &PipelineConfig,
) -> Result<tempfile::NamedTempFile, ProcessingError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("pagemill-").suffix(".pdf");
    let mut scratch = match &config.scratch_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| ProcessingError::Internal(format!("scratch dir: {e}")))?;
            builder.tempfile_in(dir)
        }
        None => builder.tempfile(),
    }
    .map_err(|e| ProcessingError::Internal(format!("scratch file: {e}")))?;
    scratch
        .write_all(bytes)
        .map_err(|e| ProcessingError::Internal(format!("scratch write: {e}")))?;
    Ok(scratch)
}

/// Truncated SHA-256 hex of the source bytes.
fn checksum_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_truncated() {
        let a = checksum_hex(b"%PDF-1.4 hello");
        let b = checksum_hex(b"%PDF-1.4 hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, checksum_hex(b"%PDF-1.4 other"));
    }

    #[tokio::test]
    async fn non_pdf_bytes_are_fatal() {
        let config = PipelineConfig::default();
        let err = process(b"PK\x03\x04 zip archive", &config).await.unwrap_err();
        assert!(matches!(err, ProcessingError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn oversized_input_is_fatal() {
        let config = PipelineConfig::builder().max_file_size_mb(1).build().unwrap();
        let mut bytes = b"%PDF-1.4".to_vec();
        bytes.resize(2 * 1024 * 1024, b' ');
        let err = process(&bytes, &config).await.unwrap_err();
        assert!(matches!(err, ProcessingError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn garbage_after_magic_is_corrupt_not_panicking() {
        let config = PipelineConfig::default();
        let err = process(b"%PDF-1.4 but nothing else", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::CorruptPdf(_)), "got: {err:?}");
    }

    #[test]
    fn ocr_runs_map_into_page_space() {
        let mut page = Page::new(0, 612.0, 792.0);
        page.blocks.push(Block::Image(crate::model::ImageRegion {
            bbox: BoundingBox::new(0.0, 0.0, 612.0, 792.0),
            payload: None,
            ocr_target: true,
            description: None,
        }));
        // 2 px per point raster: a run at px(100, 200) size 400x40.
        apply_ocr_runs(
            &mut page,
            vec![OcrRun {
                text: "recognised line".into(),
                left: 100.0,
                top: 200.0,
                width: 400.0,
                height: 40.0,
                confidence: 88.0,
            }],
            2.0,
        );
        assert!(page.ocr_applied);
        let run = page.text_runs().next().expect("one run");
        assert_eq!(run.bbox.x, 50.0);
        assert!((run.bbox.top() - (792.0 - 100.0)).abs() < 0.01);
        assert_eq!(run.font_size, 20.0);
        assert_eq!(run.confidence, Some(0.88));
    }
}
