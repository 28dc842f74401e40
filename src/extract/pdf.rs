//! PDF extraction via `lopdf`, page by page.

use std::path::Path;

use lopdf::{Document, Object};
use serde_json::{Map, Value};

use super::{insert_nonempty, Extracted};
use crate::types::{PipelineError, Result};

pub fn extract(path: &Path) -> Result<Extracted> {
    let doc = Document::load(path)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;

    let pages = doc.get_pages();
    let mut units = Vec::with_capacity(pages.len());
    let mut full_text = String::new();

    for (&page_number, _) in &pages {
        // Pages that fail individually (damaged content streams, exotic
        // encodings) contribute an empty unit rather than failing the file.
        let text = doc.extract_text(&[page_number]).unwrap_or_default();
        full_text.push('\n');
        full_text.push_str(&text);
        units.push(text);
    }

    if units.iter().all(|unit| unit.trim().is_empty()) {
        return Err(PipelineError::extraction(
            path,
            "no extractable text; the PDF may be image-based or encrypted",
        ));
    }

    let mut metadata = info_metadata(&doc);
    insert_nonempty(
        &mut metadata,
        "page_count",
        Value::Number(units.len().into()),
    );

    tracing::debug!(pages = units.len(), "extracted pdf");
    Ok(Extracted {
        full_text,
        units,
        metadata,
    })
}

/// Reads the PDF info dictionary, keeping only non-empty string fields.
fn info_metadata(doc: &Document) -> Map<String, Value> {
    let mut metadata = Map::new();
    let Some(dict) = info_dictionary(doc) else {
        return metadata;
    };
    for (key, field) in [
        (b"Title".as_slice(), "title"),
        (b"Author".as_slice(), "author"),
        (b"Subject".as_slice(), "subject"),
        (b"Keywords".as_slice(), "keywords"),
        (b"Creator".as_slice(), "creator"),
        (b"Producer".as_slice(), "producer"),
    ] {
        if let Ok(Object::String(bytes, _)) = dict.get(key) {
            let value = String::from_utf8_lossy(bytes).trim().to_string();
            insert_nonempty(&mut metadata, field, Value::String(value));
        }
    }
    metadata
}

fn info_dictionary(doc: &Document) -> Option<&lopdf::Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}
