//! Format-specific text extraction.
//!
//! Each supported format converts a source file into an [`Extracted`]
//! value: the full document text, the ordered per-unit texts used for
//! citation attribution (pages for PDFs, rows for tabular files), and a
//! best-effort metadata map. Extraction failures carry enough context to
//! be reported per-file without aborting a bulk batch.

pub mod docx;
pub mod pdf;
pub mod tabular;
pub mod text;

use std::path::Path;

use serde_json::{Map, Value};

use crate::types::{PipelineError, Result};

/// Supported source formats, dispatched by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Pdf,
    Docx,
    Text,
    Markdown,
    Csv,
    Xlsx,
}

impl Format {
    /// Resolves a format from a lowercase file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            "xlsx" | "xls" => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Resolves a format from a file path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        Self::from_extension(&extension).ok_or(PipelineError::UnsupportedFormat { extension })
    }

    /// Stable label stored in document metadata.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "txt",
            Self::Markdown => "markdown",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    /// Tabular sources are chunked row-per-chunk rather than through the
    /// recursive splitter.
    pub fn is_tabular(&self) -> bool {
        matches!(self, Self::Csv | Self::Xlsx)
    }
}

/// Output of a format extractor.
#[derive(Clone, Debug)]
pub struct Extracted {
    /// Concatenation of all unit texts, each preceded by a separator.
    pub full_text: String,
    /// Ordered structural units (pages, rows, or the whole body).
    pub units: Vec<String>,
    /// Best-effort document metadata; empty values are omitted.
    pub metadata: Map<String, Value>,
}

/// Extracts text, units, and metadata from a source file.
///
/// Fails with [`PipelineError::SourceNotFound`] when the path does not
/// exist and [`PipelineError::UnsupportedFormat`] when the extension has
/// no registered extractor.
pub fn extract(path: &Path) -> Result<Extracted> {
    if !path.exists() {
        return Err(PipelineError::SourceNotFound(path.to_path_buf()));
    }
    let format = Format::from_path(path)?;
    tracing::info!(path = %path.display(), format = format.label(), "extracting document");

    let mut extracted = match format {
        Format::Pdf => pdf::extract(path)?,
        Format::Docx => docx::extract(path)?,
        Format::Text => text::extract_plain(path)?,
        Format::Markdown => text::extract_markdown(path)?,
        Format::Csv => tabular::extract_csv(path)?,
        Format::Xlsx => tabular::extract_xlsx(path)?,
    };

    insert_nonempty(
        &mut extracted.metadata,
        "format",
        Value::String(format.label().to_string()),
    );
    if !extracted.metadata.contains_key("title") {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            insert_nonempty(
                &mut extracted.metadata,
                "title",
                Value::String(stem.to_string()),
            );
        }
    }
    Ok(extracted)
}

/// Inserts a metadata value, dropping empty strings and nulls so missing
/// fields stay missing instead of defaulting to "".
pub(crate) fn insert_nonempty(metadata: &mut Map<String, Value>, key: &str, value: Value) {
    match &value {
        Value::Null => {}
        Value::String(s) if s.trim().is_empty() => {}
        _ => {
            metadata.insert(key.to_string(), value);
        }
    }
}

/// File-stat metadata shared by the plain-file extractors.
pub(crate) fn file_stat_metadata(path: &Path) -> Map<String, Value> {
    let mut metadata = Map::new();
    if let Ok(stat) = std::fs::metadata(path) {
        if let Ok(created) = stat.created() {
            let when: chrono::DateTime<chrono::Utc> = created.into();
            insert_nonempty(&mut metadata, "created", Value::String(when.to_rfc3339()));
        }
        if let Ok(modified) = stat.modified() {
            let when: chrono::DateTime<chrono::Utc> = modified.into();
            insert_nonempty(&mut metadata, "modified", Value::String(when.to_rfc3339()));
        }
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        insert_nonempty(
            &mut metadata,
            "source_file",
            Value::String(name.to_string()),
        );
    }
    metadata
}
