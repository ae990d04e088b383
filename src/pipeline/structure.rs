//! Structure inference: classify extracted runs into semantic blocks.
//!
//! Heading detection is a document-wide font-size ranking, not a grammar:
//! the distinct sizes above body text are ranked descending and the top
//! three become heading levels 1–3. Because the ranked sizes map to
//! consecutive levels, the level assignment is monotone in font size by
//! construction — a strictly larger size can never land on a deeper level.
//! Documents with fewer distinct heading sizes get fewer levels; documents
//! with none get only paragraphs.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::model::{
    Block, BlockRef, Document, InferredBlock, Page, PageIssue, Paragraph, TextRun,
};

/// Document-wide font-size statistics, sampled from every text run once per
/// document.
#[derive(Debug, Clone, Default)]
pub struct FontStats {
    /// Font size histogram at 0.1 pt resolution, weighted by character
    /// count so one oversized drop-cap cannot outvote a page of body text.
    histogram: HashMap<i32, usize>,
    /// The dominant (body) size.
    pub body_size: f32,
    /// Ranked heading sizes, largest first, at most three.
    pub heading_sizes: Vec<f32>,
}

impl FontStats {
    pub fn collect(pages: &[Page], min_delta: f32) -> Self {
        let mut stats = FontStats::default();
        for page in pages {
            for run in page.text_runs() {
                stats.add(run.font_size, run.text.chars().count().max(1));
            }
        }
        stats.analyze(min_delta);
        stats
    }

    fn add(&mut self, size: f32, weight: usize) {
        let key = (size * 10.0).round() as i32;
        *self.histogram.entry(key).or_insert(0) += weight;
    }

    fn analyze(&mut self, min_delta: f32) {
        if self.histogram.is_empty() {
            self.body_size = 12.0;
            self.heading_sizes.clear();
            return;
        }

        let (body_key, _) = self
            .histogram
            .iter()
            .max_by_key(|&(key, count)| (*count, -*key))
            .map(|(k, c)| (*k, *c))
            .unwrap_or((120, 0));
        self.body_size = body_key as f32 / 10.0;

        let mut larger: Vec<f32> = self
            .histogram
            .keys()
            .map(|k| *k as f32 / 10.0)
            .filter(|size| *size > self.body_size + min_delta)
            .collect();
        larger.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        larger.truncate(3);
        self.heading_sizes = larger;
    }

    /// Heading level (1–3) for a font size, or 0 for body text.
    pub fn heading_level(&self, size: f32, tolerance: f32) -> u8 {
        for (rank, heading_size) in self.heading_sizes.iter().enumerate() {
            if size >= heading_size - tolerance {
                return (rank + 1) as u8;
            }
        }
        0
    }
}

/// A baseline-grouped line of runs, the unit of classification.
pub(crate) struct Line<'a> {
    spans: Vec<(usize, &'a TextRun)>,
    page: usize,
}

impl<'a> Line<'a> {
    fn font_size(&self) -> f32 {
        let total: usize = self.spans.iter().map(|(_, r)| r.text.len()).sum();
        if total == 0 {
            return self.spans.first().map(|(_, r)| r.font_size).unwrap_or(12.0);
        }
        let weighted: f32 = self
            .spans
            .iter()
            .map(|(_, r)| r.font_size * r.text.len() as f32)
            .sum();
        weighted / total as f32
    }

    fn top(&self) -> f32 {
        self.spans
            .iter()
            .map(|(_, r)| r.bbox.top())
            .fold(f32::NEG_INFINITY, f32::max)
    }

    fn bottom(&self) -> f32 {
        self.spans
            .iter()
            .map(|(_, r)| r.bbox.y)
            .fold(f32::INFINITY, f32::min)
    }

    fn sources(&self) -> Vec<BlockRef> {
        self.spans
            .iter()
            .map(|(block, _)| BlockRef {
                page: self.page,
                block: *block,
            })
            .collect()
    }

    /// Join span texts, inserting a space where the horizontal gap between
    /// adjacent spans is wide enough to have been a word break.
    fn text(&self) -> String {
        let mut out = String::new();
        for (i, (_, run)) in self.spans.iter().enumerate() {
            if i > 0 {
                let (_, prev) = &self.spans[i - 1];
                let gap = run.bbox.x - prev.bbox.right();
                let needs_space = gap > run.font_size * 0.1
                    && !out.ends_with(' ')
                    && !run.text.starts_with(' ');
                if needs_space {
                    out.push(' ');
                }
            }
            out.push_str(&run.text);
        }
        out
    }

    fn cells(&self) -> Vec<String> {
        self.spans
            .iter()
            .map(|(_, r)| r.text.trim().to_string())
            .collect()
    }
}

/// Group a page's runs into lines by baseline, top to bottom.
pub(crate) fn group_lines<'a>(page: &'a Page, y_tolerance_factor: f32) -> Vec<Line<'a>> {
    let mut runs: Vec<(usize, &TextRun)> = page
        .blocks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| match b {
            Block::Text(run) => Some((i, run)),
            Block::Image(_) => None,
        })
        .collect();
    if runs.is_empty() {
        return Vec::new();
    }

    // PDF y grows upward, so descending y is top-to-bottom reading order.
    runs.sort_by(|(_, a), (_, b)| {
        b.bbox
            .y
            .partial_cmp(&a.bbox.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.bbox
                    .x
                    .partial_cmp(&b.bbox.x)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut lines: Vec<Line<'a>> = Vec::new();
    let mut current: Vec<(usize, &TextRun)> = Vec::new();
    let mut current_y = f32::NAN;

    for (idx, run) in runs {
        let tolerance = run.font_size * y_tolerance_factor;
        if current.is_empty() || (run.bbox.y - current_y).abs() <= tolerance {
            if current.is_empty() {
                current_y = run.bbox.y;
            }
            current.push((idx, run));
        } else {
            current.sort_by(|(_, a), (_, b)| {
                a.bbox
                    .x
                    .partial_cmp(&b.bbox.x)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            lines.push(Line {
                spans: std::mem::take(&mut current),
                page: page.index,
            });
            current_y = run.bbox.y;
            current.push((idx, run));
        }
    }
    if !current.is_empty() {
        current.sort_by(|(_, a), (_, b)| {
            a.bbox
                .x
                .partial_cmp(&b.bbox.x)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        lines.push(Line {
            spans: current,
            page: page.index,
        });
    }
    lines
}

/// Column-start alignment tolerance for grid detection, in points.
const COLUMN_TOLERANCE: f32 = 10.0;

/// Mark lines that sit inside a grid layout: two or more consecutive lines
/// with the same span count (≥ 2) whose span x-origins align column-wise.
fn mark_table_lines(lines: &[Line<'_>]) -> Vec<bool> {
    let mut marks = vec![false; lines.len()];
    let mut start = 0;
    while start < lines.len() {
        let cols = lines[start].spans.len();
        if cols < 2 {
            start += 1;
            continue;
        }
        let mut end = start + 1;
        while end < lines.len() && aligned(&lines[end - 1], &lines[end]) {
            end += 1;
        }
        if end - start >= 2 {
            for mark in marks.iter_mut().take(end).skip(start) {
                *mark = true;
            }
        }
        start = end.max(start + 1);
    }
    marks
}

fn aligned(a: &Line<'_>, b: &Line<'_>) -> bool {
    if a.spans.len() != b.spans.len() || a.spans.len() < 2 {
        return false;
    }
    a.spans
        .iter()
        .zip(b.spans.iter())
        .all(|((_, ra), (_, rb))| (ra.bbox.x - rb.bbox.x).abs() <= COLUMN_TOLERANCE)
}

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-•‣▪*–—]|\d{1,3}[.)])\s+\S").unwrap());

/// Strip the bullet or number marker from a list-item line.
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-•‣▪*–—]|\d{1,3}[.)])\s+").unwrap());

/// Length bounds outside which an oversized line is not a plausible
/// heading, no matter its font.
const HEADING_LEN: std::ops::RangeInclusive<usize> = 3..=200;

/// Classify one page's blocks.
pub fn infer_page(page: &Page, stats: &FontStats, config: &PipelineConfig) -> Vec<InferredBlock> {
    let mut blocks = Vec::new();
    let page_num = page.index + 1;

    if let Some(PageIssue::ExtractionFailed(_)) = &page.issue {
        blocks.push(InferredBlock::Paragraph(Paragraph::marker(
            format!("[page {page_num}: extraction failed]"),
            page.index,
        )));
        return blocks;
    }

    let lines = group_lines(page, config.line_y_tolerance);

    // A text-less page whose OCR never ran renders a placeholder block
    // rather than silently disappearing.
    if lines.is_empty() && page.ocr_region().is_some() && !page.ocr_applied {
        let marker = match &page.issue {
            Some(PageIssue::OcrUnavailable(_)) => format!("[page {page_num}: OCR unavailable]"),
            _ => format!("[page {page_num}: no extractable text]"),
        };
        blocks.push(InferredBlock::Paragraph(Paragraph::marker(
            marker, page.index,
        )));
    }

    let table_marks = mark_table_lines(&lines);

    // Interleave lines and image regions by vertical position.
    enum Item<'a> {
        Line(usize, &'a Line<'a>),
        Image(usize, f32),
    }
    let mut items: Vec<Item<'_>> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| Item::Line(i, l))
        .collect();
    for (block_idx, block) in page.blocks.iter().enumerate() {
        if let Block::Image(region) = block {
            if !region.ocr_target {
                items.push(Item::Image(block_idx, region.bbox.top()));
            }
        }
    }
    items.sort_by(|a, b| {
        let ya = match a {
            Item::Line(_, l) => l.top(),
            Item::Image(_, top) => *top,
        };
        let yb = match b {
            Item::Line(_, l) => l.top(),
            Item::Image(_, top) => *top,
        };
        yb.partial_cmp(&ya).unwrap_or(std::cmp::Ordering::Equal)
    });

    for item in items {
        match item {
            Item::Image(block_idx, _) => {
                let description = match &page.blocks[block_idx] {
                    Block::Image(region) => region.description.clone(),
                    Block::Text(_) => None,
                };
                blocks.push(InferredBlock::ImageCaption {
                    page: page.index,
                    source: BlockRef {
                        page: page.index,
                        block: block_idx,
                    },
                    description,
                });
            }
            Item::Line(line_idx, line) => {
                let text = line.text();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }

                if table_marks[line_idx] {
                    blocks.push(InferredBlock::TableRow {
                        cells: line.cells(),
                        page: page.index,
                    });
                    continue;
                }

                let level = stats.heading_level(line.font_size(), config.heading_match_tolerance);
                if level > 0 && HEADING_LEN.contains(&trimmed.chars().count()) {
                    blocks.push(InferredBlock::Heading {
                        level,
                        text: trimmed.to_string(),
                        page: page.index,
                        sources: line.sources(),
                    });
                    continue;
                }

                if LIST_ITEM.is_match(trimmed) {
                    blocks.push(InferredBlock::ListItem {
                        text: LIST_MARKER.replace(trimmed, "").to_string(),
                        page: page.index,
                        sources: line.sources(),
                    });
                    continue;
                }

                blocks.push(InferredBlock::Paragraph(Paragraph {
                    text: trimmed.to_string(),
                    sources: line.sources(),
                    first_page: page.index,
                    last_page: page.index,
                    hyphen_pending: ends_with_wrap_hyphen(trimmed),
                    first_line_top: line.top(),
                    last_line_bottom: line.bottom(),
                }));
            }
        }
    }

    blocks
}

/// Classify every page using document-wide statistics.
pub fn infer_document(doc: &Document, config: &PipelineConfig) -> Vec<InferredBlock> {
    let stats = FontStats::collect(&doc.pages, config.heading_min_delta);
    debug!(
        body_size = stats.body_size,
        heading_sizes = ?stats.heading_sizes,
        "font statistics"
    );
    doc.pages
        .iter()
        .flat_map(|page| infer_page(page, &stats, config))
        .collect()
}

/// The text ends mid-word with a line-wrap hyphen.
pub(crate) fn ends_with_wrap_hyphen(text: &str) -> bool {
    let t = text.trim_end();
    let mut chars = t.chars().rev();
    matches!(
        (chars.next(), chars.next()),
        (Some('-'), Some(prev)) if prev.is_alphabetic()
    )
}
