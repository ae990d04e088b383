//! End-to-end pipeline tests.
//!
//! These construct minimal PDFs in memory with lopdf and stub the external
//! capabilities, so the whole suite runs offline with no fixture files and
//! no system pdfium/tesseract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, ObjectId, Stream};
use tokio_util::sync::CancellationToken;

use pagemill::{
    process, process_with_cancel, publish, render_insert_script, ChunkRecord, EmbeddingModel,
    InsertScriptOptions, ModelError, PipelineConfig, ProcessingError, RenderedDocument,
    StoreError, VectorStore, VisionModel,
};

// ── PDF construction helpers ─────────────────────────────────────────────

struct PdfBuilder {
    doc: lopdf::Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    kids: Vec<Object>,
}

/// One positioned text snippet: (x, y, font size, text).
type TextLine<'a> = (f32, f32, f32, &'a str);

impl PdfBuilder {
    fn new() -> Self {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        Self {
            doc,
            pages_id,
            font_id,
            kids: Vec::new(),
        }
    }

    fn with_title(mut self, title: &str) -> Self {
        let info_id = self.doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
        });
        self.doc.trailer.set("Info", info_id);
        self
    }

    fn add_page(&mut self, lines: &[TextLine<'_>]) {
        self.add_page_with_images(lines, &[]);
    }

    /// `images`: placement rectangles (x, y, width, height) for small
    /// embedded JPEG XObjects.
    fn add_page_with_images(&mut self, lines: &[TextLine<'_>], images: &[(f32, f32, f32, f32)]) {
        let mut operations = Vec::new();
        for (x, y, size, text) in lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), (*size).into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            operations.push(Operation::new("ET", vec![]));
        }

        let mut xobjects = lopdf::Dictionary::new();
        for (i, (x, y, w, h)) in images.iter().enumerate() {
            let image_id = self.doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 8,
                    "Height" => 8,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                // The pipeline treats DCT payloads as opaque JPEG bytes.
                vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
            ));
            let name = format!("Im{i}");
            xobjects.set(name.as_bytes().to_vec(), Object::Reference(image_id));
            operations.push(Operation::new("q", vec![]));
            operations.push(Operation::new(
                "cm",
                vec![
                    (*w).into(),
                    0.0_f32.into(),
                    0.0_f32.into(),
                    (*h).into(),
                    (*x).into(),
                    (*y).into(),
                ],
            ));
            operations.push(Operation::new("Do", vec![name.as_str().into()]));
            operations.push(Operation::new("Q", vec![]));
        }

        let content = Content { operations };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

        let mut resources = lopdf::Dictionary::new();
        resources.set(
            "Font",
            dictionary! { "F1" => Object::Reference(self.font_id) },
        );
        if !xobjects.is_empty() {
            resources.set("XObject", Object::Dictionary(xobjects));
        }
        let resources_id = self.doc.add_object(resources);

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        self.kids.push(Object::Reference(page_id));
    }

    fn finish(mut self) -> Vec<u8> {
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
        };
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).expect("serialise test pdf");
        bytes
    }
}

/// Long enough body lines keep test pages above the empty-page floor
/// without tuning the config in every test.
fn test_config() -> PipelineConfig {
    PipelineConfig::builder()
        .empty_page_text_floor(10)
        .build()
        .unwrap()
}

// ── Stub capabilities ────────────────────────────────────────────────────

struct FailingVision;

#[async_trait]
impl VisionModel for FailingVision {
    async fn describe(&self, _: &[u8], _: &str, _: &str) -> Result<String, ModelError> {
        Err(ModelError::Status {
            status: 401,
            detail: "stub: always fails".into(),
        })
    }
}

struct FixedVision(&'static str);

#[async_trait]
impl VisionModel for FixedVision {
    async fn describe(&self, _: &[u8], _: &str, _: &str) -> Result<String, ModelError> {
        Ok(self.0.to_string())
    }
}

struct CountingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingModel for CountingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
    }
}

#[derive(Default)]
struct MemoryStore {
    chunks: std::sync::Mutex<Vec<ChunkRecord>>,
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert_document(&self, doc: &RenderedDocument) -> Result<String, StoreError> {
        Ok(format!("doc-{}", doc.checksum))
    }

    async fn insert_chunks(&self, _: &str, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        self.chunks.lock().unwrap().extend_from_slice(chunks);
        Ok(())
    }
}

// ── Fatal input ──────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_pdf_is_a_fatal_error_with_no_artifact() {
    let result = process(b"<html>not a pdf</html>", &test_config()).await;
    assert!(matches!(result, Err(ProcessingError::NotAPdf { .. })));
}

#[tokio::test]
async fn truncated_pdf_body_is_corrupt() {
    let result = process(b"%PDF-1.5\ngarbage", &test_config()).await;
    assert!(matches!(result, Err(ProcessingError::CorruptPdf(_))));
}

#[tokio::test]
async fn page_limit_is_enforced() {
    let mut builder = PdfBuilder::new();
    for _ in 0..3 {
        builder.add_page(&[(72.0, 700.0, 12.0, "some page content here")]);
    }
    let bytes = builder.finish();
    let config = PipelineConfig::builder()
        .max_pages(2)
        .empty_page_text_floor(10)
        .build()
        .unwrap();
    let result = process(&bytes, &config).await;
    assert!(matches!(
        result,
        Err(ProcessingError::TooManyPages { pages: 3, limit: 2 })
    ));
}

// ── Structure and rendering ──────────────────────────────────────────────

#[tokio::test]
async fn headings_follow_font_size_rank() {
    let mut builder = PdfBuilder::new().with_title("Ranked");
    builder.add_page(&[
        (72.0, 740.0, 24.0, "Top Level Title"),
        (72.0, 700.0, 18.0, "Second Level Section"),
        (
            72.0,
            660.0,
            12.0,
            "Body text of the document, long enough to be the dominant size.",
        ),
        (
            72.0,
            646.0,
            12.0,
            "More body text keeps twelve points the mode by a wide margin.",
        ),
    ]);
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    assert!(
        output.markdown.contains("# Top Level Title"),
        "markdown:\n{}",
        output.markdown
    );
    assert!(output.markdown.contains("## Second Level Section"));
    assert!(!output.markdown.contains("### "));
    let top = output.markdown.find("# Top Level Title").unwrap();
    let second = output.markdown.find("## Second Level Section").unwrap();
    assert!(top < second);
    assert_eq!(output.metadata.title, "Ranked");
    assert_eq!(
        output.table_of_contents,
        vec!["- Top Level Title", "  - Second Level Section"]
    );
}

#[tokio::test]
async fn page_order_is_preserved_under_concurrency() {
    let mut builder = PdfBuilder::new();
    for i in 0..6 {
        let text = format!("marker-{i} page body text ends with a full stop.");
        // Leak is fine in a test; the builder borrows the line text.
        let text: &'static str = Box::leak(text.into_boxed_str());
        builder.add_page(&[(72.0, 700.0, 12.0, text)]);
    }
    let config = PipelineConfig::builder()
        .empty_page_text_floor(10)
        .page_concurrency(4)
        .build()
        .unwrap();
    let output = process(&builder.finish(), &config).await.unwrap();

    let positions: Vec<usize> = (0..6)
        .map(|i| {
            output
                .markdown
                .find(&format!("marker-{i}"))
                .unwrap_or_else(|| panic!("marker-{i} missing:\n{}", output.markdown))
        })
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted, "page text out of source order");
}

#[tokio::test]
async fn rendering_is_deterministic_across_runs() {
    let mut builder = PdfBuilder::new().with_title("Stable");
    builder.add_page(&[
        (72.0, 740.0, 20.0, "Heading Here"),
        (72.0, 700.0, 12.0, "A body line that ends with punctuation."),
    ]);
    let bytes = builder.finish();

    let first = process(&bytes, &test_config()).await.unwrap();
    let second = process(&bytes, &test_config()).await.unwrap();
    assert_eq!(first.markdown, second.markdown);
    assert_eq!(first.checksum, second.checksum);
}

#[tokio::test]
async fn hyphenated_paragraph_rejoins_across_pages() {
    let mut builder = PdfBuilder::new();
    builder.add_page(&[(72.0, 60.0, 12.0, "the working title is exam-")]);
    builder.add_page(&[(72.0, 740.0, 12.0, "ple remains.")]);
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    assert!(
        output.markdown.contains("the working title is example remains."),
        "markdown:\n{}",
        output.markdown
    );
    assert!(!output.markdown.contains("exam-"));
}

#[tokio::test]
async fn empty_page_without_ocr_renders_placeholder() {
    let mut builder = PdfBuilder::new();
    builder.add_page(&[(72.0, 700.0, 12.0, "first page has body text on it.")]);
    builder.add_page(&[]); // scanned-style page, no text operators
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    assert!(
        output.markdown.contains("[page 2: no extractable text]"),
        "markdown:\n{}",
        output.markdown
    );
    assert!(output.markdown.contains("first page has body text"));
    assert_eq!(output.stats.total_pages, 2);
}

#[tokio::test]
async fn fully_scanned_document_is_flagged_and_warned() {
    let mut builder = PdfBuilder::new();
    builder.add_page(&[]);
    builder.add_page(&[]);
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    assert!(output.metadata.is_scanned);
    assert!(output
        .warnings
        .iter()
        .any(|w| w.contains("scanned") && w.contains("OCR")));
}

// ── Vision ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_description_falls_back_to_marker_and_rest_survives() {
    let mut builder = PdfBuilder::new();
    builder.add_page_with_images(
        &[(72.0, 740.0, 12.0, "text above the figure stays intact.")],
        &[(100.0, 400.0, 200.0, 150.0)],
    );
    let config = PipelineConfig::builder()
        .empty_page_text_floor(10)
        .analyze_images(true)
        .vision(Arc::new(FailingVision))
        .max_retries(0)
        .build()
        .unwrap();
    let output = process(&builder.finish(), &config).await.unwrap();

    assert!(output.markdown.contains("[image, no description]"));
    assert!(output.markdown.contains("text above the figure stays intact."));
    assert_eq!(output.stats.image_regions, 1);
    assert_eq!(output.stats.images_described, 0);
    assert!(output
        .warnings
        .iter()
        .any(|w| w.contains("image description failed")));

    // Unrelated chunks still publish cleanly.
    let store = Arc::new(MemoryStore::default());
    let publish_config = PipelineConfig::builder()
        .embedder(Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        }))
        .store(store.clone())
        .build()
        .unwrap();
    let report = publish(&output, &publish_config).await.unwrap();
    assert_eq!(report.failed.len(), 0);
    assert_eq!(report.published_chunks, report.total_chunks);
}

#[tokio::test]
async fn successful_description_renders_as_blockquote() {
    let mut builder = PdfBuilder::new();
    builder.add_page_with_images(
        &[(72.0, 740.0, 12.0, "see the schematic of the pump below.")],
        &[(100.0, 400.0, 200.0, 150.0)],
    );
    let config = PipelineConfig::builder()
        .empty_page_text_floor(10)
        .analyze_images(true)
        .vision(Arc::new(FixedVision("A cutaway schematic of a pump.")))
        .build()
        .unwrap();
    let output = process(&builder.finish(), &config).await.unwrap();

    assert!(output.markdown.contains("> A cutaway schematic of a pump."));
    assert!(!output.markdown.contains("[image, no description]"));
    assert_eq!(output.stats.images_described, 1);
}

#[tokio::test]
async fn images_ignored_when_analysis_disabled() {
    let mut builder = PdfBuilder::new();
    builder.add_page_with_images(
        &[(72.0, 740.0, 12.0, "text next to an unanalysed image here.")],
        &[(100.0, 400.0, 200.0, 150.0)],
    );
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    assert!(output.markdown.contains("[image, no description]"));
    assert!(output.metadata.has_images);
    assert_eq!(output.stats.images_described, 0);
}

// ── Chunking and publishing ──────────────────────────────────────────────

#[tokio::test]
async fn chunks_partition_the_rendered_markdown_exactly() {
    let mut builder = PdfBuilder::new();
    for _ in 0..3 {
        builder.add_page(&[
            (72.0, 740.0, 20.0, "Section Heading"),
            (
                72.0,
                700.0,
                12.0,
                "A reasonably long body sentence that contributes to the text mass.",
            ),
            (
                72.0,
                686.0,
                12.0,
                "Another body sentence so chunking has something to split over.",
            ),
        ]);
    }
    let config = PipelineConfig::builder()
        .empty_page_text_floor(10)
        .chunk_budget(120)
        .build()
        .unwrap();
    let output = process(&builder.finish(), &config).await.unwrap();

    assert!(output.chunks.len() > 1);
    assert_eq!(output.text_from_chunks(), output.markdown);
    for pair in output.chunks.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
    assert!(output
        .chunks
        .iter()
        .any(|c| c.heading.as_deref() == Some("Section Heading")));
}

#[tokio::test]
async fn publish_stores_every_chunk_with_embeddings() {
    let mut builder = PdfBuilder::new();
    builder.add_page(&[(
        72.0,
        700.0,
        12.0,
        "enough text to produce at least a chunk or two of output.",
    )]);
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    let store = Arc::new(MemoryStore::default());
    let embedder = Arc::new(CountingEmbedder {
        calls: AtomicUsize::new(0),
    });
    let config = PipelineConfig::builder()
        .embedder(embedder.clone())
        .store(store.clone())
        .build()
        .unwrap();
    let report = publish(&output, &config).await.unwrap();

    assert_eq!(report.document_id, format!("doc-{}", output.checksum));
    assert_eq!(report.total_chunks, output.chunks.len());
    assert_eq!(report.published_chunks, output.chunks.len());
    assert!(report.failed.is_empty());
    let stored = store.chunks.lock().unwrap();
    assert_eq!(stored.len(), output.chunks.len());
    assert!(stored.iter().all(|r| r.embedding.is_some()));
    assert!(embedder.calls.load(Ordering::SeqCst) >= 1);
}

// ── Insert script ────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_script_round_trips_document_identity() {
    let mut builder = PdfBuilder::new().with_title("Script'd");
    builder.add_page(&[(
        72.0,
        700.0,
        12.0,
        "body text for the sql script generation test.",
    )]);
    let output = process(&builder.finish(), &test_config()).await.unwrap();

    let sql = render_insert_script(&output, &InsertScriptOptions::default());
    assert!(sql.contains("INSERT INTO documents"));
    assert!(sql.contains(&output.checksum));
    assert!(sql.contains("Script''d"));
    assert!(sql.contains("INSERT INTO document_chunks"));

    let with_setup = render_insert_script(
        &output,
        &InsertScriptOptions {
            include_setup: true,
        },
    );
    assert!(with_setup.contains("CREATE EXTENSION IF NOT EXISTS vector"));
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_token_aborts_with_no_artifact() {
    let mut builder = PdfBuilder::new();
    builder.add_page(&[(72.0, 700.0, 12.0, "this document will never finish.")]);
    let bytes = builder.finish();

    let token = CancellationToken::new();
    token.cancel();
    let result = process_with_cancel(&bytes, "doc.pdf", &test_config(), token).await;
    assert!(matches!(result, Err(ProcessingError::Cancelled)));
}
