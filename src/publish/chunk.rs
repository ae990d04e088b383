//! Chunking: split rendered text into embedding-sized spans.
//!
//! Chunks partition the text exactly — contiguous byte ranges, nothing
//! dropped, nothing duplicated — so concatenating them reproduces the
//! rendered Markdown byte for byte. Split points prefer, in order:
//! paragraph break, sentence end, clause break, any whitespace; only when
//! none occurs in the search window does the split land on the raw budget
//! boundary.

use crate::model::Chunk;

/// Delimiters searched for a split point, best first. The split lands
/// *after* the delimiter so the break stays with the text that ends there.
const SPLIT_DELIMITERS: [&str; 7] = ["\n\n", ". ", "! ", "? ", "; ", ", ", " "];

/// How far back from the budget boundary to look for a good split, bytes.
const SPLIT_SEARCH_WINDOW: usize = 200;

/// Split `text` into chunks of at most roughly `budget` characters.
pub fn chunk_text(text: &str, budget: usize) -> Vec<Chunk> {
    let headings = heading_positions(text);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let target = byte_offset_after_chars(text, start, budget);
        let end = if target >= text.len() {
            text.len()
        } else {
            find_split_point(text, start, target)
        };

        chunks.push(Chunk {
            index: chunks.len(),
            text: text[start..end].to_string(),
            start,
            end,
            heading: heading_before(&headings, start),
        });
        start = end;
    }

    chunks
}

/// Choose the split point at or before `target`, preferring semantic
/// boundaries inside the search window.
fn find_split_point(text: &str, start: usize, target: usize) -> usize {
    let window_start = floor_char_boundary(text, target.saturating_sub(SPLIT_SEARCH_WINDOW).max(start + 1));
    let window = &text[window_start..target];

    for delimiter in SPLIT_DELIMITERS {
        if let Some(pos) = window.rfind(delimiter) {
            let split = window_start + pos + delimiter.len();
            if split > start {
                return split;
            }
        }
    }
    // No delimiter in the window; cut on the budget boundary.
    target.max(next_char_boundary(text, start + 1))
}

fn heading_positions(text: &str) -> Vec<(usize, String)> {
    let mut positions = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let title = trimmed.trim_start_matches('#').trim();
            if !title.is_empty() {
                positions.push((offset, title.to_string()));
            }
        }
        offset += line.len();
    }
    positions
}

/// Title of the nearest heading at or before `offset`.
fn heading_before(headings: &[(usize, String)], offset: usize) -> Option<String> {
    headings
        .iter()
        .take_while(|(pos, _)| *pos <= offset)
        .last()
        .map(|(_, title)| title.clone())
}

/// Byte offset `chars` characters past `start`, clamped to the text end.
fn byte_offset_after_chars(text: &str, start: usize, chars: usize) -> usize {
    text[start..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| start + i)
        .unwrap_or(text.len())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn next_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    fn assert_partition(text: &str, budget: usize) -> Vec<Chunk> {
        let chunks = chunk_text(text, budget);
        assert_eq!(reassemble(&chunks), text, "chunks must partition the text");
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "ranges must be contiguous");
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
        chunks
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = assert_partition("short text", 100);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn splits_prefer_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(90), "b".repeat(90));
        let chunks = assert_partition(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with("\n\n"));
        assert!(chunks[1].text.starts_with('b'));
    }

    #[test]
    fn splits_fall_back_to_sentence_ends() {
        let text = format!("{}. {}", "word ".repeat(17).trim_end(), "tail ".repeat(30));
        let chunks = assert_partition(text.trim_end(), 100);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].text.ends_with(". "));
    }

    #[test]
    fn unbreakable_text_cuts_at_budget() {
        let text = "x".repeat(350);
        let chunks = assert_partition(&text, 100);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].text.len(), 100);
    }

    #[test]
    fn multibyte_text_partitions_cleanly() {
        let text = "щит ".repeat(120); // 4 chars, 7 bytes per repeat
        assert_partition(text.trim_end(), 50);
    }

    #[test]
    fn chunks_carry_the_preceding_heading() {
        let text = format!(
            "# Alpha\n\n{}\n\n# Beta\n\n{}",
            "first section text. ".repeat(10),
            "second section text. ".repeat(10),
        );
        let chunks = assert_partition(&text, 120);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].heading.as_deref(), Some("Alpha"));
        let beta_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.heading.as_deref() == Some("Beta"))
            .collect();
        assert!(!beta_chunks.is_empty());
    }
}
