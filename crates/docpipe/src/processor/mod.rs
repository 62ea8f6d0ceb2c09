//! Turning downloaded bytes into normalized text for the extract stage.

pub mod html;
pub mod text;

use crate::error::ProcessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedContent {
    pub text: String,
    /// Media type of the input the text came from.
    pub source_type: String,
}

pub trait DocumentProcessor: Send + Sync {
    fn process(&self, content: &[u8], content_type: &str) -> Result<ProcessedContent, ProcessError>;
    fn supports(&self, content_type: &str) -> bool;
}

pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        // HTML first: `text/html` would otherwise match the plain text processor.
        Self {
            processors: vec![
                Box::new(html::HtmlProcessor::new()),
                Box::new(text::TextProcessor::new()),
            ],
        }
    }

    pub fn with_processors(processors: Vec<Box<dyn DocumentProcessor>>) -> Self {
        Self { processors }
    }

    pub fn process(&self, content: &[u8], content_type: &str) -> Result<ProcessedContent, ProcessError> {
        let media = crate::downloader::normalize_content_type(content_type);

        let processor = self
            .processors
            .iter()
            .find(|p| p.supports(&media))
            .ok_or_else(|| ProcessError::UnsupportedFormat(media.clone()))?;

        let processed = processor.process(content, &media)?;
        if processed.text.trim().is_empty() {
            return Err(ProcessError::EmptyDocument);
        }
        Ok(processed)
    }
}

/// Collapses runs of blank lines and trims trailing whitespace per line.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}
