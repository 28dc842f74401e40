//! Plain-text and markdown extraction.

use std::path::Path;

use pulldown_cmark::{Event, Parser, TagEnd};

use super::{file_stat_metadata, Extracted};
use crate::types::{PipelineError, Result};

/// Form feed, the conventional page delimiter in paginated plain text.
const PAGE_BREAK: char = '\u{0c}';

pub fn extract_plain(path: &Path) -> Result<Extracted> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;
    Ok(paginate(raw, file_stat_metadata(path)))
}

pub fn extract_markdown(path: &Path) -> Result<Extracted> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| PipelineError::extraction(path, err.to_string()))?;
    Ok(paginate(markdown_to_text(&raw), file_stat_metadata(path)))
}

/// Splits text on form-feed page breaks; text without them is one unit.
fn paginate(text: String, metadata: serde_json::Map<String, serde_json::Value>) -> Extracted {
    let units: Vec<String> = if text.contains(PAGE_BREAK) {
        text.split(PAGE_BREAK).map(str::to_string).collect()
    } else {
        vec![text.clone()]
    };
    let mut full_text = String::new();
    for unit in &units {
        full_text.push('\n');
        full_text.push_str(unit);
    }
    Extracted {
        full_text,
        units,
        metadata,
    }
}

/// Renders markdown to plain text by walking the event stream, keeping
/// block boundaries as blank lines so the splitter sees paragraphs.
fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::BlockQuote(_)) => text.push_str("\n\n"),
            _ => {}
        }
    }
    text.trim_end().to_string()
}
