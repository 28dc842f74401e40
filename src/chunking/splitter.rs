//! Recursive character splitting with overlap.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{PipelineError, Result};

/// Separator hierarchy, coarsest first. The empty separator splits into
/// individual characters and guarantees termination.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Normalizes document text before splitting.
///
/// Curly quotes become straight quotes, whitespace runs collapse to a
/// single space, and characters outside the allow-list are replaced with
/// a space. The allow-list keeps citation punctuation: brackets,
/// parentheses, `.,;:-` and quotes.
pub fn clean_text(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();

    let normalized: String = text
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' | '\u{201e}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201a}' => '\'',
            other => other,
        })
        .collect();

    let ws = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    let collapsed = ws.replace_all(&normalized, " ");

    let disallowed = DISALLOWED
        .get_or_init(|| Regex::new(r#"[^\w\s\[\]().,;:'"-]+"#).expect("static regex"));
    disallowed.replace_all(&collapsed, " ").trim().to_string()
}

/// Splits text into pieces of at most `chunk_size` characters, adjacent
/// pieces overlapping by up to `chunk_overlap` characters.
///
/// The splitter tries the coarsest separator first and recurses into
/// finer separators for any piece still exceeding the bound, then
/// greedily merges sibling pieces back up to `chunk_size` while carrying
/// an overlap window across merge boundaries.
#[derive(Clone, Debug)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PipelineError::Chunking("chunk_size must be non-zero".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(PipelineError::Chunking(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        })
    }

    /// Cleans and splits `text`, returning the ordered chunk contents.
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }
        let mut pieces = self.split_recursive(&cleaned, &SEPARATORS);
        pieces.retain(|piece| !piece.trim().is_empty());
        self.absorb_undersized(&mut pieces, &cleaned);

        for piece in &pieces {
            if char_len(piece) > self.chunk_size && pieces.len() > 1 {
                tracing::warn!(
                    size = char_len(piece),
                    limit = self.chunk_size,
                    "piece exceeds chunk_size; no finer separator available"
                );
            }
        }
        Ok(pieces)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);
        let splits = split_on(text, separator);

        let mut pieces = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for split in splits {
            if char_len(&split) < self.chunk_size {
                pending.push(split);
                continue;
            }
            if !pending.is_empty() {
                pieces.extend(self.merge(std::mem::take(&mut pending), separator));
            }
            if remaining.is_empty() {
                // Irreducible oversized piece; emit as-is.
                pieces.push(split);
            } else {
                pieces.extend(self.split_recursive(&split, remaining));
            }
        }
        if !pending.is_empty() {
            pieces.extend(self.merge(pending, separator));
        }
        pieces
    }

    /// Greedy merge of sibling splits into chunks, carrying the overlap
    /// window from the tail of each emitted chunk into the next.
    fn merge(&self, splits: Vec<String>, separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: Vec<String> = Vec::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(&split);
            let join_cost = if window.is_empty() { 0 } else { separator_len };
            if total + len + join_cost > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join_window(&window, separator) {
                    chunks.push(chunk);
                }
                // Shrink the window until it fits inside the overlap span.
                while total > self.chunk_overlap
                    || (total + len + if window.is_empty() { 0 } else { separator_len }
                        > self.chunk_size
                        && total > 0)
                {
                    let removed = window.remove(0);
                    total -= char_len(&removed)
                        + if window.is_empty() { 0 } else { separator_len };
                }
            }
            let join_cost = if window.is_empty() { 0 } else { separator_len };
            total += len + join_cost;
            window.push(split);
        }
        if let Some(chunk) = join_window(&window, separator) {
            chunks.push(chunk);
        }
        chunks
    }

    /// Folds pieces shorter than `min_chunk_size` into the following
    /// piece when the merge stays within `chunk_size`.
    ///
    /// The merged piece is re-sliced from the cleaned source rather than
    /// rejoined with a guessed separator, so it stays a verbatim
    /// substring and keeps exact page attribution.
    fn absorb_undersized(&self, pieces: &mut Vec<String>, source: &str) {
        if self.min_chunk_size == 0 {
            return;
        }
        let mut index = 0;
        let mut search_from = 0;
        while index + 1 < pieces.len() {
            let Some(start) = source[search_from..]
                .find(pieces[index].as_str())
                .map(|offset| search_from + offset)
            else {
                break;
            };
            if char_len(&pieces[index]) >= self.min_chunk_size {
                search_from = start;
                index += 1;
                continue;
            }
            let end = start + pieces[index].len();
            let Some(next_start) = source[start..]
                .find(pieces[index + 1].as_str())
                .map(|offset| start + offset)
            else {
                break;
            };
            let next_end = next_start + pieces[index + 1].len();
            if next_end > end {
                let merged = &source[start..next_end];
                if char_len(merged) <= self.chunk_size {
                    pieces[index] = merged.to_string();
                    pieces.remove(index + 1);
                    search_from = start;
                    continue;
                }
            }
            search_from = start;
            index += 1;
        }
    }
}

fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (separator, &separators[position + 1..]);
        }
    }
    ("", &[])
}

fn split_on(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    text.split(separator)
        .filter(|piece| !piece.is_empty())
        .map(String::from)
        .collect()
}

fn join_window(window: &[String], separator: &str) -> Option<String> {
    let joined = window.join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
