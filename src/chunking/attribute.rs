//! Maps chunks back to the structural unit they originated from.

use std::collections::HashSet;

use super::splitter::clean_text;
use super::Chunk;

/// Assigns a 1-based `unit_number` to every chunk.
///
/// Units are cleaned with the same normalization as chunk text so the
/// containment check compares like with like. The first unit containing
/// the chunk verbatim wins; chunks spanning a unit boundary fall back to
/// word-overlap scoring. Every chunk receives *a* unit number — possibly
/// imprecise for boundary spans — rather than none.
pub fn attribute_units(chunks: &mut [Chunk], unit_texts: &[String]) {
    if unit_texts.is_empty() {
        return;
    }
    let cleaned_units: Vec<String> = unit_texts.iter().map(|unit| clean_text(unit)).collect();

    for chunk in chunks.iter_mut() {
        let exact = cleaned_units
            .iter()
            .position(|unit| unit.contains(&chunk.content));
        chunk.unit_number = Some(match exact {
            Some(position) => position + 1,
            None => fuzzy_find_unit(&chunk.content, &cleaned_units),
        });
    }
}

/// Word-overlap fallback: the unit sharing the most words with the chunk.
///
/// Scanning in unit order with a strict `>` comparison resolves ties to
/// the lowest unit number; zero overlap everywhere defaults to unit 1.
fn fuzzy_find_unit(chunk_text: &str, unit_texts: &[String]) -> usize {
    let chunk_words: HashSet<&str> = chunk_text.split_whitespace().collect();
    let mut best_unit = 1;
    let mut max_overlap = 0;

    for (position, unit) in unit_texts.iter().enumerate() {
        let unit_words: HashSet<&str> = unit.split_whitespace().collect();
        let overlap = chunk_words.intersection(&unit_words).count();
        if overlap > max_overlap {
            max_overlap = overlap;
            best_unit = position + 1;
        }
    }
    best_unit
}
