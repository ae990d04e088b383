//! Page extraction: native PDF content into typed primitives.
//!
//! Walks each page's content stream and produces [`TextRun`]s with decoded
//! text, effective font size, and style flags, plus [`ImageRegion`]s for
//! embedded image XObjects with bounding boxes tracked through the graphics
//! state. A page with no extractable text gets a single full-page region
//! flagged for OCR. A page whose stream cannot be parsed becomes an empty
//! page with an `extraction_failed` marker; only a document that cannot be
//! opened at all is fatal.

use std::collections::HashMap;

use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::ProcessingError;
use crate::model::{
    Block, BoundingBox, Document, DocumentMetadata, ImagePayload, ImageRegion, Page, TextRun,
};

/// Parse the whole document. The only fatal path out of the extractor.
pub fn extract_document(
    bytes: &[u8],
    source_name: &str,
    checksum: String,
    config: &PipelineConfig,
) -> Result<Document, ProcessingError> {
    let doc = PdfDocument::load_mem(bytes)
        .map_err(|e| ProcessingError::CorruptPdf(e.to_string()))?;

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.len() > config.max_pages {
        return Err(ProcessingError::TooManyPages {
            pages: page_ids.len(),
            limit: config.max_pages,
        });
    }

    let mut metadata = extract_metadata(&doc, source_name, page_ids.len());

    let mut pages = Vec::with_capacity(page_ids.len());
    for (index, page_id) in page_ids.iter().enumerate() {
        let page = match extract_page(&doc, *page_id, index, config) {
            Ok(page) => page,
            Err(detail) => {
                warn!(page = index + 1, %detail, "page extraction failed");
                Page::failed(index, detail)
            }
        };
        pages.push(page);
    }

    metadata.has_images = pages
        .iter()
        .flat_map(|p| p.blocks.iter())
        .any(|b| matches!(b, Block::Image(r) if !r.ocr_target));

    let text_less = pages.iter().filter(|p| p.ocr_region().is_some()).count();
    metadata.is_scanned =
        !pages.is_empty() && text_less as f32 > pages.len() as f32 * config.scanned_page_ratio;

    debug!(
        pages = pages.len(),
        text_less,
        has_images = metadata.has_images,
        "document extracted"
    );

    Ok(Document {
        checksum,
        metadata,
        pages,
    })
}

/// Read the information dictionary, falling back the way the bot always
/// has: file stem for the title, "Unknown" for the author.
fn extract_metadata(doc: &PdfDocument, source_name: &str, page_count: usize) -> DocumentMetadata {
    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };

    let field = |key: &[u8]| -> String {
        info.and_then(|dict| dict.get(key).ok())
            .and_then(|obj| match obj {
                Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
                _ => None,
            })
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let stem = source_name
        .rsplit('/')
        .next()
        .unwrap_or(source_name)
        .trim_end_matches(".pdf")
        .to_string();

    let title = field(b"Title");
    let author = field(b"Author");
    DocumentMetadata {
        title: if title.is_empty() { stem } else { title },
        author: if author.is_empty() {
            "Unknown".to_string()
        } else {
            author
        },
        subject: field(b"Subject"),
        page_count,
        source_name: source_name.to_string(),
        has_images: false,
        is_scanned: false,
    }
}

/// Extract one page. Errors here are recovered by the caller.
fn extract_page(
    doc: &PdfDocument,
    page_id: ObjectId,
    index: usize,
    config: &PipelineConfig,
) -> Result<Page, String> {
    let (width, height) = media_box(doc, page_id).unwrap_or((612.0, 792.0));
    let mut page = Page::new(index, width, height);

    let fonts = page_fonts(doc, page_id);
    let images = page_image_xobjects(doc, page_id);
    let content = page_content(doc, page_id)?;

    walk_content(doc, &content, &fonts, &images, &mut page)?;

    // A page without meaningful text becomes an OCR target covering the
    // full media box.
    if page.text_len() < config.empty_page_text_floor {
        page.blocks.push(Block::Image(ImageRegion {
            bbox: BoundingBox::new(0.0, 0.0, width, height),
            payload: None,
            ocr_target: true,
            description: None,
        }));
    }

    Ok(page)
}

/// Resolve the media box, following the `Parent` chain for inherited
/// values.
fn media_box(doc: &PdfDocument, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..8 {
        if let Ok(Object::Array(arr)) = dict.get(b"MediaBox") {
            if arr.len() == 4 {
                let v: Vec<f32> = arr.iter().filter_map(number).collect();
                if v.len() == 4 {
                    return Some(((v[2] - v[0]).abs(), (v[3] - v[1]).abs()));
                }
            }
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => {
                dict = doc.get_dictionary(*parent).ok()?;
            }
            _ => break,
        }
    }
    None
}

struct FontInfo<'a> {
    base_name: String,
    dict: &'a Dictionary,
}

/// Map of resource font names to their base font name and dictionary.
fn page_fonts(doc: &PdfDocument, page_id: ObjectId) -> HashMap<Vec<u8>, FontInfo<'_>> {
    let mut fonts = HashMap::new();
    if let Ok(page_fonts) = doc.get_page_fonts(page_id) {
        for (name, dict) in page_fonts {
            let base_name = dict
                .get(b"BaseFont")
                .ok()
                .and_then(|o| o.as_name().ok())
                .map(|n| String::from_utf8_lossy(n).to_string())
                .unwrap_or_else(|| String::from_utf8_lossy(&name).to_string());
            fonts.insert(name.clone(), FontInfo { base_name, dict });
        }
    }
    fonts
}

struct ImageXObject {
    payload: Option<ImagePayload>,
}

/// Image XObjects reachable from the page resources, keyed by resource
/// name. JPEG streams carry their bytes directly; other encodings are
/// deferred to the raster stage.
fn page_image_xobjects(doc: &PdfDocument, page_id: ObjectId) -> HashMap<Vec<u8>, ImageXObject> {
    let mut images = HashMap::new();

    let resources = match doc.get_dictionary(page_id).ok().and_then(|d| d.get(b"Resources").ok()) {
        Some(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Some(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let xobjects = match resources.and_then(|r| r.get(b"XObject").ok()) {
        Some(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Some(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(xobjects) = xobjects else {
        return images;
    };

    for (name, obj) in xobjects.iter() {
        let stream = match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Stream(s)) => s,
                _ => continue,
            },
            Object::Stream(s) => s,
            _ => continue,
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| n == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        let payload = if has_filter(&stream.dict, b"DCTDecode") {
            Some(ImagePayload {
                bytes: stream.content.clone(),
                mime: "image/jpeg",
            })
        } else {
            None
        };
        images.insert(name.clone(), ImageXObject { payload });
    }
    images
}

/// True when `filter` is the stream's sole filter. A chained filter list
/// (e.g. Flate around DCT) means the raw content is not directly usable.
fn has_filter(dict: &Dictionary, filter: &[u8]) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == filter,
        Ok(Object::Array(arr)) => {
            arr.len() == 1 && matches!(&arr[0], Object::Name(n) if n == filter)
        }
        _ => false,
    }
}

/// Concatenated, decompressed content streams for the page.
fn page_content(doc: &PdfDocument, page_id: ObjectId) -> Result<Vec<u8>, String> {
    let page_dict = doc.get_dictionary(page_id).map_err(|e| e.to_string())?;
    let contents = page_dict.get(b"Contents").map_err(|e| e.to_string())?;

    let mut stream_ids = Vec::new();
    match contents {
        Object::Reference(id) => stream_ids.push(*id),
        Object::Array(arr) => {
            for obj in arr {
                if let Object::Reference(id) = obj {
                    stream_ids.push(*id);
                }
            }
        }
        _ => return Err("unsupported Contents entry".to_string()),
    }

    let mut content = Vec::new();
    for id in stream_ids {
        if let Ok(Object::Stream(stream)) = doc.get_object(id) {
            match stream.decompressed_content() {
                Ok(data) => {
                    content.extend_from_slice(&data);
                    content.push(b' ');
                }
                Err(e) => return Err(format!("content stream: {e}")),
            }
        }
    }
    Ok(content)
}

/// Walk the operator stream, emitting text runs and image regions in
/// drawing order.
fn walk_content(
    doc: &PdfDocument,
    content: &[u8],
    fonts: &HashMap<Vec<u8>, FontInfo<'_>>,
    images: &HashMap<Vec<u8>, ImageXObject>,
    page: &mut Page,
) -> Result<(), String> {
    let ops = lopdf::content::Content::decode(content).map_err(|e| e.to_string())?;

    let mut text_matrix = Matrix::identity();
    let mut line_matrix = Matrix::identity();
    let mut ctm = Matrix::identity();
    let mut ctm_stack: Vec<Matrix> = Vec::new();
    let mut leading: f32 = 12.0;
    let mut font_size: f32 = 12.0;
    let mut font_resource: Vec<u8> = Vec::new();
    let mut font_name = String::new();
    let mut in_text = false;

    for op in ops.operations {
        match op.operator.as_str() {
            "BT" => {
                in_text = true;
                text_matrix = Matrix::identity();
                line_matrix = Matrix::identity();
            }
            "ET" => in_text = false,
            "q" => ctm_stack.push(ctm),
            "Q" => {
                if let Some(saved) = ctm_stack.pop() {
                    ctm = saved;
                }
            }
            "cm" => {
                if op.operands.len() >= 6 {
                    ctm = Matrix::from_operands(&op.operands).compose(&ctm);
                }
            }
            "Tf" => {
                if op.operands.len() >= 2 {
                    if let Object::Name(name) = &op.operands[0] {
                        font_resource = name.clone();
                        font_name = fonts
                            .get(name.as_slice())
                            .map(|f| f.base_name.clone())
                            .unwrap_or_else(|| String::from_utf8_lossy(name).to_string());
                    }
                    font_size = number(&op.operands[1]).unwrap_or(12.0);
                }
            }
            "TL" => {
                if let Some(tl) = op.operands.first().and_then(number) {
                    leading = tl;
                }
            }
            "Td" | "TD" => {
                if op.operands.len() >= 2 {
                    let tx = number(&op.operands[0]).unwrap_or(0.0);
                    let ty = number(&op.operands[1]).unwrap_or(0.0);
                    if op.operator == "TD" {
                        leading = -ty;
                    }
                    line_matrix = Matrix::translation(tx, ty).compose(&line_matrix);
                    text_matrix = line_matrix;
                }
            }
            "Tm" => {
                if op.operands.len() >= 6 {
                    line_matrix = Matrix::from_operands(&op.operands);
                    text_matrix = line_matrix;
                }
            }
            "T*" => {
                line_matrix = Matrix::translation(0.0, -leading).compose(&line_matrix);
                text_matrix = line_matrix;
            }
            "Tj" | "TJ" => {
                if in_text {
                    let text = decode_show_text(doc, &op, fonts, &font_resource);
                    push_run(page, text, &text_matrix, font_size, &font_name);
                }
            }
            "'" | "\"" => {
                line_matrix = Matrix::translation(0.0, -leading).compose(&line_matrix);
                text_matrix = line_matrix;
                if in_text {
                    let text_idx = if op.operator == "\"" { 2 } else { 0 };
                    if let Some(Object::String(bytes, _)) = op.operands.get(text_idx) {
                        let text = decode_bytes(doc, bytes, fonts, &font_resource);
                        push_run(page, text, &text_matrix, font_size, &font_name);
                    }
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = op.operands.first() {
                    if let Some(xobj) = images.get(name.as_slice()) {
                        page.blocks.push(Block::Image(ImageRegion {
                            bbox: ctm.unit_square_bounds(),
                            payload: xobj.payload.clone(),
                            ocr_target: false,
                            description: None,
                        }));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Decode the string operands of a `Tj`/`TJ` op, inserting word spaces for
/// large kerning adjustments (around -200/1000 em and beyond usually means
/// an omitted space character).
fn decode_show_text(
    doc: &PdfDocument,
    op: &lopdf::content::Operation,
    fonts: &HashMap<Vec<u8>, FontInfo<'_>>,
    font_resource: &[u8],
) -> String {
    const SPACE_ADJUSTMENT: f32 = 200.0;

    if op.operator == "Tj" {
        if let Some(Object::String(bytes, _)) = op.operands.first() {
            return decode_bytes(doc, bytes, fonts, font_resource);
        }
        return String::new();
    }

    let Some(Object::Array(items)) = op.operands.first() else {
        return String::new();
    };
    let mut combined = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => {
                combined.push_str(&decode_bytes(doc, bytes, fonts, font_resource));
            }
            Object::Integer(n) => {
                if -(*n as f32) > SPACE_ADJUSTMENT && !combined.ends_with(' ') && !combined.is_empty()
                {
                    combined.push(' ');
                }
            }
            Object::Real(n) => {
                if -n > SPACE_ADJUSTMENT && !combined.ends_with(' ') && !combined.is_empty() {
                    combined.push(' ');
                }
            }
            _ => {}
        }
    }
    combined
}

fn decode_bytes(
    doc: &PdfDocument,
    bytes: &[u8],
    fonts: &HashMap<Vec<u8>, FontInfo<'_>>,
    font_resource: &[u8],
) -> String {
    if let Some(font) = fonts.get(font_resource) {
        if let Ok(encoding) = font.dict.get_font_encoding(doc) {
            if let Ok(decoded) = PdfDocument::decode_text(&encoding, bytes) {
                return decoded;
            }
        }
    }
    decode_pdf_string(bytes)
}

fn push_run(page: &mut Page, text: String, matrix: &Matrix, font_size: f32, font_name: &str) {
    if text.trim().is_empty() {
        return;
    }
    let (x, y) = matrix.position();
    let size = font_size * matrix.vertical_scale();
    let width = text.chars().count() as f32 * size * 0.5;
    let bbox = BoundingBox::new(x, y - size * 0.2, width, size);
    page.blocks.push(Block::Text(TextRun::native(
        text,
        size,
        font_name,
        bbox,
        page.index,
    )));
}

/// Decode a PDF string without font-encoding context: UTF-16BE when the
/// BOM is present, then UTF-8, then Latin-1.
pub(crate) fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16(&utf16).unwrap_or_default();
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    fn translation(tx: f32, ty: f32) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::identity()
        }
    }

    fn from_operands(operands: &[Object]) -> Self {
        Self {
            a: operands.first().and_then(number).unwrap_or(1.0),
            b: operands.get(1).and_then(number).unwrap_or(0.0),
            c: operands.get(2).and_then(number).unwrap_or(0.0),
            d: operands.get(3).and_then(number).unwrap_or(1.0),
            e: operands.get(4).and_then(number).unwrap_or(0.0),
            f: operands.get(5).and_then(number).unwrap_or(0.0),
        }
    }

    /// `self` applied before `rhs` (PDF operator concatenation order).
    fn compose(&self, rhs: &Matrix) -> Matrix {
        Matrix {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    fn position(&self) -> (f32, f32) {
        (self.e, self.f)
    }

    fn vertical_scale(&self) -> f32 {
        let s = (self.b * self.b + self.d * self.d).sqrt();
        if s > 0.0 {
            s
        } else {
            1.0
        }
    }

    /// Bounds of the unit square under this transform (image placement).
    fn unit_square_bounds(&self) -> BoundingBox {
        let corners = [
            (self.e, self.f),
            (self.a + self.e, self.b + self.f),
            (self.c + self.e, self.d + self.f),
            (self.a + self.c + self.e, self.b + self.d + self.f),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);
        BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_compose_translation() {
        let m = Matrix::translation(5.0, 7.0).compose(&Matrix::translation(1.0, 2.0));
        assert_eq!(m.position(), (6.0, 9.0));
    }

    #[test]
    fn unit_square_bounds_scaled() {
        let m = Matrix {
            a: 100.0,
            b: 0.0,
            c: 0.0,
            d: 50.0,
            e: 10.0,
            f: 20.0,
        };
        let bbox = m.unit_square_bounds();
        assert_eq!(bbox.x, 10.0);
        assert_eq!(bbox.y, 20.0);
        assert_eq!(bbox.width, 100.0);
        assert_eq!(bbox.height, 50.0);
    }

    #[test]
    fn decode_utf16_with_bom() {
        // "Hi" in UTF-16BE with BOM
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(decode_pdf_string(&bytes), "Hi");
    }

    #[test]
    fn decode_latin1_fallback() {
        let bytes = [0xE9]; // é in Latin-1, invalid UTF-8
        assert_eq!(decode_pdf_string(&bytes), "é");
    }
}
