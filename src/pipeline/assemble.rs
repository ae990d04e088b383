//! Paragraph assembly: merge line-level candidates into prose paragraphs.
//!
//! Merging only ever joins adjacent candidates — order is preserved, and
//! non-paragraph blocks act as hard boundaries. A candidate joins the
//! paragraph before it while that paragraph does not end with terminal
//! punctuation and the vertical gap stays under a page-relative threshold.
//! Across a page boundary the gap test is waived (the geometry of two
//! different pages is not comparable) and the punctuation test decides
//! alone. A trailing wrap hyphen is stripped at merge time and the texts
//! join without a space, so "exam-" + "ple" becomes "example".
//!
//! The pass is idempotent: re-running it over its own output (paragraphs
//! acting as single runs) merges nothing further, because every surviving
//! boundary was already rejected on grounds — punctuation, gap, page jump —
//! that the merge itself does not change.

use crate::model::{InferredBlock, Page, Paragraph};

/// Merge paragraph candidates in one ordered pass.
pub fn assemble(
    blocks: Vec<InferredBlock>,
    pages: &[Page],
    gap_ratio: f32,
) -> Vec<InferredBlock> {
    let mut out: Vec<InferredBlock> = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            InferredBlock::Paragraph(next) => {
                if let Some(InferredBlock::Paragraph(prev)) = out.last_mut() {
                    if should_merge(prev, &next, pages, gap_ratio) {
                        merge_into(prev, next);
                        continue;
                    }
                }
                out.push(InferredBlock::Paragraph(next));
            }
            other => out.push(other),
        }
    }

    out
}

fn should_merge(prev: &Paragraph, next: &Paragraph, pages: &[Page], gap_ratio: f32) -> bool {
    // Synthetic markers never participate in merging.
    if prev.sources.is_empty() || next.sources.is_empty() {
        return false;
    }
    if ends_with_terminal_punct(&prev.text) {
        return false;
    }

    if next.first_page == prev.last_page {
        let page_height = pages
            .get(next.first_page)
            .map(|p| p.height)
            .unwrap_or(792.0);
        let gap = prev.last_line_bottom - next.first_line_top;
        gap <= page_height * gap_ratio
    } else {
        // A paragraph may continue onto the directly following page.
        next.first_page == prev.last_page + 1
    }
}

fn merge_into(prev: &mut Paragraph, next: Paragraph) {
    if prev.hyphen_pending {
        let stripped = prev.text.trim_end().strip_suffix('-').map(str::to_string);
        if let Some(text) = stripped {
            prev.text = text;
        }
        prev.text.push_str(next.text.trim_start());
    } else {
        if !prev.text.ends_with(char::is_whitespace) {
            prev.text.push(' ');
        }
        prev.text.push_str(next.text.trim_start());
    }
    prev.sources.extend(next.sources);
    prev.last_page = next.last_page;
    prev.last_line_bottom = next.last_line_bottom;
    prev.hyphen_pending = next.hyphen_pending;
}

/// Whether the text ends a sentence, allowing for closing quotes and
/// brackets after the punctuation mark.
pub(crate) fn ends_with_terminal_punct(text: &str) -> bool {
    let t = text.trim_end();
    let t = t.trim_end_matches(|c| matches!(c, ')' | ']' | '"' | '\'' | '»' | '”' | '’'));
    matches!(
        t.chars().last(),
        Some('.' | '!' | '?' | '…' | ':' | ';')
    )
}
