//! Boundary-preserving chunking and page attribution.
//!
//! [`splitter`] turns cleaned document text into overlapping bounded
//! chunks via recursive separator splitting; [`attribute`] maps each
//! chunk back to the structural unit (page, row) it came from.

pub mod attribute;
pub mod splitter;

pub use attribute::attribute_units;
pub use splitter::{clean_text, TextSplitter};

use serde::{Deserialize, Serialize};

/// A bounded slice of a document's text, the unit of embedding and
/// retrieval.
///
/// `index`, `size`, and `total_chunks` are internally consistent for all
/// chunks of one document: `0 <= index < total_chunks`, `size` equals the
/// content length, and `total_chunks` is identical across siblings.
/// `unit_number` is `None` until attribution runs, then fixed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub size: usize,
    pub total_chunks: usize,
    /// 1-based structural unit (page/row) this chunk is attributed to.
    pub unit_number: Option<usize>,
}

impl Chunk {
    /// Builds the chunk sequence for one document from split pieces.
    pub fn from_pieces(pieces: Vec<String>) -> Vec<Chunk> {
        let total_chunks = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                size: content.chars().count(),
                content,
                index,
                total_chunks,
                unit_number: None,
            })
            .collect()
    }
}
