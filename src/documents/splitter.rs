//! Recursive character splitter
//!
//! Splits on the coarsest separator present (paragraphs, then lines, then
//! words, then characters) and greedily merges the pieces back into chunks of
//! at most `chunk_size` characters, carrying up to `chunk_overlap` characters
//! of trailing context into the next chunk.

use std::collections::VecDeque;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    /// `chunk_overlap` is expected to be smaller than `chunk_size`; request
    /// construction enforces it.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                chunks.extend(self.merge(&small, separator));
                small.clear();
            }
            if finer.is_empty() {
                let piece = piece.trim();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            let joined_len = |current: &VecDeque<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { separator_len }
            };

            if joined_len(&current, total) > self.chunk_size && !current.is_empty() {
                push_chunk(&mut chunks, &current, separator);

                // Drop leading pieces until only the overlap remains and the new piece fits
                while total > self.chunk_overlap
                    || (joined_len(&current, total) > self.chunk_size && total > 0)
                {
                    let Some(first) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(first) + if current.is_empty() { 0 } else { separator_len };
                }
            }

            total += len + if current.is_empty() { 0 } else { separator_len };
            current.push_back(piece);
        }
        push_chunk(&mut chunks, &current, separator);
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let chunk = current.iter().copied().collect::<Vec<_>>().join(separator);
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert_eq!(splitter.split("  just a sentence \n"), ["just a sentence"]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split(" \n\n \n").is_empty());
    }

    #[test]
    fn test_paragraphs_are_merged_up_to_chunk_size() {
        let splitter = RecursiveSplitter::new(10, 0);
        assert_eq!(
            splitter.split("aaaa\n\nbbbb\n\ncccc"),
            ["aaaa\n\nbbbb", "cccc"]
        );
    }

    #[test]
    fn test_overlap_carries_trailing_words() {
        let splitter = RecursiveSplitter::new(9, 4);
        assert_eq!(
            splitter.split("one two three four five"),
            ["one two", "two three", "four five"]
        );
    }

    #[test]
    fn test_unbreakable_text_falls_back_to_characters() {
        let splitter = RecursiveSplitter::new(4, 0);
        assert_eq!(splitter.split("abcdefghij"), ["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_lengths_count_characters_not_bytes() {
        let splitter = RecursiveSplitter::new(3, 0);
        assert_eq!(splitter.split("ééééé"), ["ééé", "éé"]);
    }

    #[test]
    fn test_chunks_never_exceed_size() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n\
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n\n\
                    Ut enim ad minim veniam, quis nostrud exercitation ullamco.";
        let splitter = RecursiveSplitter::new(30, 10);
        let chunks = splitter.split(text);
        assert!(chunks.len() > 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }
}
