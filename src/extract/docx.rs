//! Word-processor extraction via `docx-rs`.

use std::path::Path;

use docx_rs::{DocumentChild, ParagraphChild, RunChild};
use serde_json::Value;

use super::{file_stat_metadata, insert_nonempty, Extracted};
use crate::types::{PipelineError, Result};

pub fn extract(path: &Path) -> Result<Extracted> {
    let data =
        std::fs::read(path).map_err(|err| PipelineError::extraction(path, err.to_string()))?;
    let doc = docx_rs::read_docx(&data)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;

    let mut paragraphs: Vec<String> = Vec::new();
    for child in doc.document.children {
        if let DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for child in paragraph.children {
                if let ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text);
            }
        }
    }

    if paragraphs.is_empty() {
        return Err(PipelineError::extraction(path, "document body has no text"));
    }

    // DOCX carries no page boundaries in its body XML, so the whole body
    // is a single attribution unit.
    let full_text = paragraphs.join("\n\n");
    let units = vec![full_text.clone()];

    let mut metadata = file_stat_metadata(path);
    insert_nonempty(
        &mut metadata,
        "paragraph_count",
        Value::Number(paragraphs.len().into()),
    );

    tracing::debug!(paragraphs = paragraphs.len(), "extracted docx");
    Ok(Extracted {
        full_text,
        units,
        metadata,
    })
}
