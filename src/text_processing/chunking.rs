// src/text_processing/chunking.rs

use tracing::debug;

/// Configuration for splitting knowledge documents into chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    /// Maximum size of a chunk in characters.
    pub max_chars: usize,
    /// Characters of trailing context carried into the next chunk when a
    /// paragraph has to be split mid-text.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap: 120,
        }
    }
}

/// Splits `text` into chunks no larger than `config.max_chars` characters.
///
/// Paragraph boundaries (blank lines) are preferred split points; whole
/// paragraphs are packed into a chunk until the next one would overflow.
/// A single paragraph longer than the limit is windowed character-wise with
/// `config.overlap` characters of overlap between consecutive windows.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let max = config.max_chars.max(1);
    let overlap = config.overlap.min(max.saturating_sub(1));

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let para_chars = paragraph.chars().count();

        if para_chars > max {
            // Flush whatever we have, then window the oversized paragraph.
            if current_chars > 0 {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            chunks.extend(window_chars(paragraph, max, overlap));
            continue;
        }

        // +2 for the paragraph separator we re-insert.
        let projected = if current_chars == 0 {
            para_chars
        } else {
            current_chars + 2 + para_chars
        };

        if projected > max && current_chars > 0 {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if current_chars > 0 {
            current.push_str("\n\n");
            current_chars += 2;
        }
        current.push_str(paragraph);
        current_chars += para_chars;
    }

    if current_chars > 0 {
        chunks.push(current);
    }

    debug!(chunk_count = chunks.len(), "Chunked text");
    chunks
}

/// Character-window split with overlap, respecting UTF-8 boundaries.
fn window_chars(text: &str, max: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = max - overlap;
    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let config = ChunkConfig::default();
        let chunks = chunk_text("A short brand voice note.", &config);
        assert_eq!(chunks, vec!["A short brand voice note.".to_string()]);
    }

    #[test]
    fn paragraphs_are_packed_until_the_limit() {
        let config = ChunkConfig {
            max_chars: 30,
            overlap: 5,
        };
        let text = "First paragraph.\n\nSecond one.\n\nThird paragraph here.";
        let chunks = chunk_text(text, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "First paragraph.\n\nSecond one.");
        assert_eq!(chunks[1], "Third paragraph here.");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30);
        }
    }

    #[test]
    fn oversized_paragraph_is_windowed_with_overlap() {
        let config = ChunkConfig {
            max_chars: 10,
            overlap: 3,
        };
        let text = "abcdefghijklmnopqrst";
        let chunks = chunk_text(text, &config);
        assert_eq!(chunks[0], "abcdefghij");
        // Next window starts max - overlap = 7 characters in.
        assert_eq!(chunks[1], "hijklmnopq");
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        // Full coverage: last chunk ends with the final character.
        assert!(chunks.last().map(|c| c.ends_with('t')).unwrap_or(false));
    }

    #[test]
    fn empty_and_blank_input_yields_no_chunks() {
        let config = ChunkConfig::default();
        assert!(chunk_text("", &config).is_empty());
        assert!(chunk_text("\n\n  \n\n", &config).is_empty());
    }

    #[test]
    fn multibyte_text_is_not_split_mid_character() {
        let config = ChunkConfig {
            max_chars: 4,
            overlap: 1,
        };
        let chunks = chunk_text("héllo wörld émoji", &config);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 4);
        }
    }
}
