use crate::error::ProcessError;
use crate::processor::{normalize_whitespace, DocumentProcessor, ProcessedContent};

const TEXTUAL_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/csv",
    "application/x-ndjson",
];

/// Plain text and text-like formats. Invalid UTF-8 is replaced rather than
/// rejected; the extract stage prefers lossy text over nothing.
pub struct TextProcessor;

impl TextProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for TextProcessor {
    fn process(&self, content: &[u8], content_type: &str) -> Result<ProcessedContent, ProcessError> {
        let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
        let text = String::from_utf8_lossy(content);

        Ok(ProcessedContent {
            text: normalize_whitespace(&text.replace("\r\n", "\n")),
            source_type: content_type.to_string(),
        })
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type.starts_with("text/") || TEXTUAL_APPLICATION_TYPES.contains(&content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_text() {
        let processor = TextProcessor::new();
        let result = processor
            .process(b"Hello, World!\r\nThis is a test document.\r\n", "text/plain")
            .unwrap();

        assert_eq!(result.text, "Hello, World!\nThis is a test document.\n");
    }

    #[test]
    fn test_strips_bom_and_replaces_invalid_utf8() {
        let processor = TextProcessor::new();
        let result = processor
            .process(b"\xEF\xBB\xBFok \xFF end", "text/plain")
            .unwrap();
        assert!(result.text.starts_with("ok "));
        assert!(result.text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_supports_text_formats() {
        let processor = TextProcessor::new();
        assert!(processor.supports("text/plain"));
        assert!(processor.supports("text/csv"));
        assert!(processor.supports("application/json"));
        assert!(!processor.supports("application/pdf"));
        assert!(!processor.supports("image/png"));
    }
}
