//! Markdown serialisation of the inferred block sequence.
//!
//! The renderer is deterministic by construction: it is a pure function of
//! the block sequence, metadata, and output options, with no clocks, maps
//! in iteration order, or randomness. Identical input yields byte-identical
//! output, which the chunk partition and the downstream checksum both rely
//! on.

use crate::config::{PageSeparator, PipelineConfig};
use crate::model::{DocumentMetadata, InferredBlock};

/// Marker rendered for an image whose description is absent (vision
/// disabled, or the call exhausted its retries).
pub const NO_DESCRIPTION_MARKER: &str = "[image, no description]";

/// Render the block sequence to a Markdown string.
pub fn render_markdown(
    blocks: &[InferredBlock],
    metadata: &DocumentMetadata,
    config: &PipelineConfig,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if config.include_metadata {
        parts.push(front_matter(metadata));
    }

    let mut current_page: Option<usize> = None;
    let mut i = 0;
    while i < blocks.len() {
        let block = &blocks[i];

        if !matches!(config.page_separator, PageSeparator::None) {
            let page = block.page();
            if let Some(prev) = current_page {
                if page > prev {
                    if let Some(sep) = config.page_separator.render(page + 1) {
                        parts.push(sep);
                    }
                }
            }
            current_page = Some(page);
        }

        match block {
            InferredBlock::TableRow { .. } => {
                // Consecutive rows form one table.
                let start = i;
                while i < blocks.len() && matches!(blocks[i], InferredBlock::TableRow { .. }) {
                    i += 1;
                }
                let rows: Vec<&Vec<String>> = blocks[start..i]
                    .iter()
                    .filter_map(|b| match b {
                        InferredBlock::TableRow { cells, .. } => Some(cells),
                        _ => None,
                    })
                    .collect();
                if let Some(table) = render_table(&rows) {
                    parts.push(table);
                }
                continue;
            }
            InferredBlock::Heading { level, text, .. } => {
                parts.push(format!("{} {}", "#".repeat(*level as usize), text));
            }
            InferredBlock::ListItem { text, .. } => {
                parts.push(format!("- {}", text));
            }
            InferredBlock::Paragraph(p) => {
                if !p.text.trim().is_empty() {
                    parts.push(p.text.trim().to_string());
                }
            }
            InferredBlock::ImageCaption { description, .. } => match description {
                Some(desc) => parts.push(blockquote(desc)),
                None => parts.push(NO_DESCRIPTION_MARKER.to_string()),
            },
        }
        i += 1;
    }

    let mut output = parts.join("\n\n").trim_end().to_string();
    output.push('\n');
    output
}

/// YAML front matter with the document metadata.
fn front_matter(meta: &DocumentMetadata) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("title: \"{}\"\n", escape_yaml(&meta.title)));
    yaml.push_str(&format!("author: \"{}\"\n", escape_yaml(&meta.author)));
    if !meta.subject.is_empty() {
        yaml.push_str(&format!("subject: \"{}\"\n", escape_yaml(&meta.subject)));
    }
    yaml.push_str(&format!("pages: {}\n", meta.page_count));
    yaml.push_str(&format!("source: \"{}\"\n", escape_yaml(&meta.source_name)));
    if meta.has_images {
        yaml.push_str("has_images: true\n");
    }
    if meta.is_scanned {
        yaml.push_str("is_scanned: true\n");
    }
    yaml.push_str("---");
    yaml
}

fn escape_yaml(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Pipe-delimited table with a header separator row. Rows are padded or
/// truncated to the header width; embedded newlines become spaces. Tables
/// with almost no content are dropped, they are detection noise.
fn render_table(rows: &[&Vec<String>]) -> Option<String> {
    if rows.len() < 2 {
        return None;
    }
    let total_content: usize = rows
        .iter()
        .flat_map(|r| r.iter())
        .map(|c| c.trim().len())
        .sum();
    if total_content < 10 {
        return None;
    }

    let header = rows[0];
    let width = header.len();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(header, width));
    lines.push(format!("|{}", " --- |".repeat(width)));
    for row in &rows[1..] {
        lines.push(format_row(row, width));
    }
    Some(lines.join("\n"))
}

fn format_row(cells: &[String], width: usize) -> String {
    let mut padded: Vec<String> = cells
        .iter()
        .take(width)
        .map(|c| c.replace('\n', " ").trim().to_string())
        .collect();
    while padded.len() < width {
        padded.push(String::new());
    }
    format!("| {} |", padded.join(" | "))
}

/// Prefix every line of the description so multi-line descriptions stay
/// inside one blockquote.
fn blockquote(text: &str) -> String {
    text.trim()
        .lines()
        .map(|l| format!("> {}", l.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Derive an indented outline from the rendered headings.
pub fn extract_toc(markdown: &str) -> Vec<String> {
    let mut toc = Vec::new();
    let mut in_fence = false;
    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || !line.starts_with('#') {
            continue;
        }
        let level = line.chars().take_while(|c| *c == '#').count();
        let title = line.trim_start_matches('#').trim();
        if title.is_empty() {
            continue;
        }
        toc.push(format!("{}- {}", "  ".repeat(level - 1), title));
    }
    toc
}
