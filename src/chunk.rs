//! Recursive character text splitter.
//!
//! Splits extracted PDF text into overlapping windows of at most
//! `chunk_size` characters (Unicode scalar values, not bytes), carrying
//! up to `chunk_overlap` characters from the end of one window into the
//! start of the next.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs
//!    in the text (`""` splits into single characters).
//! 2. Split on it. Pieces shorter than `chunk_size` are queued for merging;
//!    longer pieces are split recursively with the remaining separators.
//! 3. Merging appends pieces (rejoined with the separator) until the next
//!    one would overflow `chunk_size`, emits the window, then drops
//!    leading pieces until what remains fits within `chunk_overlap`.
//!
//! # Example
//!
//! ```rust
//! use pdf_chat::chunk::split_text;
//!
//! let chunks = split_text("Hello world.\n\nSecond paragraph.", 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! ```

use uuid::Uuid;

use crate::models::Chunk;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split `text` into overlapping windows. Empty or whitespace-only input
/// yields no chunks.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }
    let splitter = Splitter {
        chunk_size,
        chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
    };
    splitter.split(text, &SEPARATORS)
}

/// Split text and wrap each window as a [`Chunk`] owned by `session_id`.
/// Indices are contiguous from 0.
pub fn chunk_text(
    session_id: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    split_text(text, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            chunk_index: i as i64,
            text,
        })
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (sep_pos, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let remaining = &separators[(sep_pos + 1).min(separators.len())..];

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                out.extend(self.merge(&pending, separator));
                pending.clear();
            }

            if remaining.is_empty() {
                out.push(piece.to_string());
            } else {
                out.extend(self.split(piece, remaining));
            }
        }

        if !pending.is_empty() {
            out.extend(self.merge(&pending, separator));
        }

        out
    }

    /// Greedily join `pieces` into windows no longer than `chunk_size`.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut windows = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_len = |current: &Vec<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&current, total) > self.chunk_size && !current.is_empty() {
                push_window(&mut windows, &current, separator);

                // Drop from the front until the carried tail fits the overlap
                // and leaves room for the incoming piece.
                while total > self.chunk_overlap
                    || (total > 0 && joined_len(&current, total) > self.chunk_size)
                {
                    let first = current.remove(0);
                    total -= char_len(first) + if current.is_empty() { 0 } else { sep_len };
                }
            }

            total = joined_len(&current, total);
            current.push(piece);
        }

        push_window(&mut windows, &current, separator);
        windows
    }
}

fn push_window(windows: &mut Vec<String>, pieces: &[&str], separator: &str) {
    let joined = pieces.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{:04}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000, 200);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_text("", 1000, 200).is_empty());
        assert!(split_text("  \n\n \t", 1000, 200).is_empty());
    }

    #[test]
    fn windows_never_exceed_chunk_size() {
        let text = words(2000);
        for chunk in split_text(&text, 1000, 200) {
            assert!(chunk.chars().count() <= 1000, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn consecutive_windows_overlap() {
        let text = words(600);
        let chunks = split_text(&text, 1000, 200);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "expected '{}' to be carried into the next window",
                last_word
            );
        }
    }

    #[test]
    fn overlap_is_bounded() {
        let text = words(600);
        let chunks = split_text(&text, 1000, 200);
        for pair in chunks.windows(2) {
            let first_word_next = pair[1].split(' ').next().unwrap();
            let pos = pair[0].find(first_word_next).unwrap();
            let carried = pair[0][pos..].chars().count();
            assert!(carried <= 200, "carried {} chars", carried);
        }
    }

    #[test]
    fn paragraphs_preferred_over_words() {
        let para = "a".repeat(600);
        let text = format!("{}\n\n{}", para, para);
        let chunks = split_text(&text, 1000, 200);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], para);
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(2500);
        let chunks = split_text(&text, 1000, 200);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
    }

    #[test]
    fn multibyte_text_is_counted_in_chars() {
        let text = "┌──┐ ".repeat(500);
        let chunks = split_text(&text, 100, 20);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 100);
        }
    }

    #[test]
    fn chunk_indices_contiguous() {
        let chunks = chunk_text("session-1", &words(1000), 300, 50);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.session_id, "session-1");
        }
    }

    #[test]
    fn deterministic() {
        let text = words(900);
        assert_eq!(split_text(&text, 500, 100), split_text(&text, 500, 100));
    }
}
