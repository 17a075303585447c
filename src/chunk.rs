//! Overlapping fixed-window text chunker.
//!
//! Splits a document's extracted text into windows of at most `window`
//! characters, where each window after the first repeats the final `overlap`
//! characters of its predecessor. The windows cover the input with no gaps:
//! stripping the leading `overlap` characters from every chunk after the
//! first and concatenating reconstructs the input exactly.
//!
//! The final remainder shorter than `window` is emitted as its own chunk.
//! Empty input yields no chunks.

use crate::models::{Chunk, TextBlock};

/// Split plain text into overlapping chunks. `overlap` must be < `window`;
/// both are measured in characters, so multi-byte text never splits inside
/// a code point.
pub fn chunk_text(source_id: &str, text: &str, window: usize, overlap: usize) -> Vec<Chunk> {
    let blocks = [TextBlock {
        text: text.to_string(),
        page: None,
    }];
    chunk_blocks(source_id, &blocks, window, overlap)
}

/// Split a document's extracted blocks into overlapping chunks.
///
/// Blocks are joined with single newlines before windowing; each chunk
/// carries the page locator of the block its first character falls in.
pub fn chunk_blocks(
    source_id: &str,
    blocks: &[TextBlock],
    window: usize,
    overlap: usize,
) -> Vec<Chunk> {
    assert!(window > 0, "chunk window must be > 0");
    assert!(overlap < window, "chunk overlap must be < window");

    // Concatenate block texts, remembering which char range each page spans.
    let mut chars: Vec<char> = Vec::new();
    let mut page_spans: Vec<(usize, Option<u32>)> = Vec::new();
    for block in blocks {
        if block.text.is_empty() {
            continue;
        }
        if !chars.is_empty() {
            chars.push('\n');
        }
        page_spans.push((chars.len(), block.page));
        chars.extend(block.text.chars());
    }

    if chars.is_empty() {
        return Vec::new();
    }

    let step = window - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(chars.len());
        let text: String = chars[start..end].iter().collect();
        chunks.push(Chunk {
            source_id: source_id.to_string(),
            ordinal: chunks.len(),
            text,
            page: page_at(&page_spans, start),
        });
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Page locator for the block containing char offset `pos`.
fn page_at(spans: &[(usize, Option<u32>)], pos: usize) -> Option<u32> {
    spans
        .iter()
        .rev()
        .find(|(start, _)| *start <= pos)
        .and_then(|(_, page)| *page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 100, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn empty_input_no_chunks() {
        let chunks = chunk_text("doc1", "", 100, 20);
        assert!(chunks.is_empty());
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let text: String = ('a'..='z').cycle().take(250).collect();
        let chunks = chunk_text("doc1", &text, 100, 30);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            let tail: String = prev[prev.len() - 30..].iter().collect();
            let head: String = next[..30.min(next.len())].iter().collect();
            assert_eq!(tail, head, "overlap region must repeat");
        }
    }

    #[test]
    fn reconstruction_is_exact() {
        let text: String = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let window = 128;
        let overlap = 32;
        let chunks = chunk_text("doc1", &text, window, overlap);

        let mut rebuilt = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                rebuilt.push_str(&chunk.text);
            } else {
                let tail: String = chunk.text.chars().skip(overlap).collect();
                rebuilt.push_str(&tail);
            }
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn remainder_shorter_than_window_is_kept() {
        let text: String = "x".repeat(105);
        let chunks = chunk_text("doc1", &text, 100, 20);
        // 0..100, then 80..105.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text.chars().count(), 25);
    }

    #[test]
    fn multibyte_text_never_splits_code_points() {
        let text: String = "héllo wörld ünïcode ".repeat(30);
        let chunks = chunk_text("doc1", &text, 50, 10);
        for chunk in &chunks {
            // Would have panicked on a byte-slice boundary; also verify the
            // window bound holds in characters.
            assert!(chunk.text.chars().count() <= 50);
        }
    }

    #[test]
    fn ordinals_are_contiguous() {
        let text: String = "word ".repeat(200);
        let chunks = chunk_text("doc1", &text, 60, 15);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
        }
    }

    #[test]
    fn chunks_carry_starting_page() {
        let blocks = vec![
            TextBlock {
                text: "a".repeat(90),
                page: Some(1),
            },
            TextBlock {
                text: "b".repeat(90),
                page: Some(2),
            },
        ];
        let chunks = chunk_blocks("doc1", &blocks, 100, 20);
        assert_eq!(chunks[0].page, Some(1));
        let last = chunks.last().unwrap();
        assert_eq!(last.page, Some(2));
    }
}
