//! Tabular extraction: CSV via `csv`, spreadsheets via `calamine`.
//!
//! Every row renders as a field-by-field text block and becomes one
//! attribution unit; there is no separate full-text/unit split for
//! tabular sources beyond concatenation.

use std::path::Path;

use calamine::Reader;
use serde_json::Value;

use super::{file_stat_metadata, insert_nonempty, Extracted};
use crate::types::{PipelineError, Result};

pub fn extract_csv(path: &Path) -> Result<Extracted> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| PipelineError::extraction(path, err.to_string()))?;
        let fields: Vec<(String, String)> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        rows.push(render_row(index, &fields));
    }

    build(path, headers, rows)
}

pub fn extract_xlsx(path: &Path) -> Result<Extracted> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::extraction(path, "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;

    let mut row_iter = range.rows();
    let headers: Vec<String> = row_iter
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .unwrap_or_default();

    let mut rows = Vec::new();
    for (index, row) in row_iter.enumerate() {
        let fields: Vec<(String, String)> = headers
            .iter()
            .cloned()
            .zip(row.iter().map(|cell| cell.to_string()))
            .collect();
        rows.push(render_row(index, &fields));
    }

    build(path, headers, rows)
}

/// Renders one row as `Row N:` followed by `column: value` lines.
fn render_row(index: usize, fields: &[(String, String)]) -> String {
    let mut text = format!("Row {}:\n", index + 1);
    for (column, value) in fields {
        if value.trim().is_empty() {
            continue;
        }
        text.push_str(column);
        text.push_str(": ");
        text.push_str(value);
        text.push('\n');
    }
    text
}

fn build(path: &Path, headers: Vec<String>, rows: Vec<String>) -> Result<Extracted> {
    if rows.is_empty() {
        return Err(PipelineError::extraction(path, "no data rows"));
    }
    let full_text = rows.join("\n");
    let mut metadata = file_stat_metadata(path);
    insert_nonempty(
        &mut metadata,
        "columns",
        Value::Array(headers.into_iter().map(Value::String).collect()),
    );
    insert_nonempty(&mut metadata, "row_count", Value::Number(rows.len().into()));

    tracing::debug!(rows = rows.len(), "extracted tabular source");
    Ok(Extracted {
        full_text,
        units: rows,
        metadata,
    })
}
