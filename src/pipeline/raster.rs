//! Rasterisation: materialise pixel data for the OCR and vision stages.
//!
//! pdfium wraps a C++ library with thread-local state that must not be
//! driven from async contexts, so all rendering happens on the blocking
//! pool. Rasterisation is best-effort infrastructure: when no pdfium
//! library can be bound the stage reports one error string and the pipeline
//! degrades to its documented recovery paths (OCR placeholder blocks,
//! images without descriptions) instead of failing the document.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use crate::model::BoundingBox;

/// What the pipeline needs rendered for one page.
#[derive(Debug, Clone)]
pub struct PageRasterPlan {
    pub page_index: usize,
    /// Media box size in points, from the extractor.
    pub page_width: f32,
    pub page_height: f32,
    /// Render the whole page for OCR.
    pub full_page: bool,
    /// Regions to crop out for the vision describer, keyed by block index.
    pub regions: Vec<(usize, BoundingBox)>,
}

/// A rendered full page, PNG-encoded, with the pixels-per-point scale the
/// OCR geometry mapping needs.
#[derive(Debug, Clone)]
pub struct FullPageRaster {
    pub png: Vec<u8>,
    pub scale: f32,
}

/// Output of one raster pass.
#[derive(Debug, Default)]
pub struct RasterOutput {
    pub full_pages: HashMap<usize, FullPageRaster>,
    /// PNG crops keyed by (page index, block index).
    pub region_pngs: HashMap<(usize, usize), Vec<u8>>,
}

/// Render everything the plan asks for.
///
/// Returns `Err` with a single reason when pdfium cannot be bound or the
/// file cannot be opened; per-page render failures are logged and skipped
/// so one bad page does not starve the others.
pub async fn rasterize(
    pdf_path: &Path,
    plan: Vec<PageRasterPlan>,
    max_pixels: u32,
) -> Result<RasterOutput, String> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || rasterize_blocking(&path, &plan, max_pixels))
        .await
        .map_err(|e| format!("raster task panicked: {e}"))?
}

fn rasterize_blocking(
    pdf_path: &Path,
    plan: &[PageRasterPlan],
    max_pixels: u32,
) -> Result<RasterOutput, String> {
    let bindings =
        Pdfium::bind_to_system_library().map_err(|e| format!("pdfium unavailable: {e:?}"))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| format!("pdfium could not open the document: {e:?}"))?;

    let pages = document.pages();
    let total = pages.len() as usize;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut output = RasterOutput::default();

    for entry in plan {
        if entry.page_index >= total {
            warn!(
                page = entry.page_index + 1,
                total, "raster plan page out of range"
            );
            continue;
        }

        let page = match pages.get(entry.page_index as u16) {
            Ok(p) => p,
            Err(e) => {
                warn!(page = entry.page_index + 1, error = ?e, "failed to open page");
                continue;
            }
        };

        let image = match page.render_with_config(&render_config) {
            Ok(bitmap) => bitmap.as_image(),
            Err(e) => {
                warn!(page = entry.page_index + 1, error = ?e, "rasterisation failed");
                continue;
            }
        };

        let scale = if entry.page_width > 0.0 {
            image.width() as f32 / entry.page_width
        } else {
            1.0
        };
        debug!(
            page = entry.page_index + 1,
            px_w = image.width(),
            px_h = image.height(),
            scale,
            "page rendered"
        );

        for (block_idx, bbox) in &entry.regions {
            let crop = crop_region(&image, entry.page_height, scale, bbox);
            match png_bytes(&crop) {
                Ok(png) => {
                    output.region_pngs.insert((entry.page_index, *block_idx), png);
                }
                Err(e) => warn!(
                    page = entry.page_index + 1,
                    block = block_idx,
                    %e,
                    "region encode failed"
                ),
            }
        }

        if entry.full_page {
            match png_bytes(&image) {
                Ok(png) => {
                    output
                        .full_pages
                        .insert(entry.page_index, FullPageRaster { png, scale });
                }
                Err(e) => warn!(page = entry.page_index + 1, %e, "page encode failed"),
            }
        }
    }

    Ok(output)
}

/// Cut a PDF-space rectangle out of a rendered page.
///
/// PDF y grows upward while image rows grow downward, so the top edge of
/// the box maps to `(page_height - bbox.top()) * scale` pixels from the top
/// of the image.
fn crop_region(
    image: &DynamicImage,
    page_height: f32,
    scale: f32,
    bbox: &BoundingBox,
) -> DynamicImage {
    let img_w = image.width();
    let img_h = image.height();

    let x = ((bbox.x * scale).max(0.0) as u32).min(img_w.saturating_sub(1));
    let y = (((page_height - bbox.top()) * scale).max(0.0) as u32).min(img_h.saturating_sub(1));
    let w = ((bbox.width * scale) as u32).clamp(1, img_w - x);
    let h = ((bbox.height * scale) as u32).clamp(1, img_h - y);

    image.crop_imm(x, y, w, h)
}

/// PNG-encode an image. PNG rather than JPEG: lossless text edges are what
/// both the OCR engine and the vision model need most.
pub fn png_bytes(image: &DynamicImage) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn png_roundtrip() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 128, 255, 255])));
        let png = png_bytes(&img).expect("encode");
        assert!(!png.is_empty());
        let decoded = image::load_from_memory(&png).expect("valid png");
        assert_eq!(decoded.width(), 8);
    }

    #[test]
    fn crop_maps_pdf_space_to_pixels() {
        // 100x200 pt page rendered at 2 px/pt → 200x400 px image.
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 400, Rgba([255; 4])));
        let bbox = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        let crop = crop_region(&img, 200.0, 2.0, &bbox);
        assert_eq!(crop.width(), 60);
        assert_eq!(crop.height(), 80);
    }

    #[test]
    fn crop_clamps_out_of_range_boxes() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([255; 4])));
        let bbox = BoundingBox::new(-50.0, -50.0, 1000.0, 1000.0);
        let crop = crop_region(&img, 100.0, 1.0, &bbox);
        assert!(crop.width() <= 100);
        assert!(crop.height() <= 100);
    }
}
