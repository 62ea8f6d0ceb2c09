use crate::error::ProcessError;
use crate::processor::{normalize_whitespace, DocumentProcessor, ProcessedContent};

/// Elements whose content is never document text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "noscript"];

/// Elements that end a line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "table", "ul", "ol", "blockquote", "pre", "hr",
];

pub struct HtmlProcessor;

impl HtmlProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HtmlProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for HtmlProcessor {
    fn process(&self, content: &[u8], content_type: &str) -> Result<ProcessedContent, ProcessError> {
        let html = String::from_utf8_lossy(content);
        Ok(ProcessedContent {
            text: normalize_whitespace(&html_to_text(&html)),
            source_type: content_type.to_string(),
        })
    }

    fn supports(&self, content_type: &str) -> bool {
        content_type == "text/html" || content_type == "application/xhtml+xml"
    }
}

/// Drops tags, comments and non-text elements, decodes common entities and
/// collapses inline whitespace.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;
    let mut skip_until: Option<String> = None;

    while let Some(lt) = rest.find('<') {
        if skip_until.is_none() {
            push_inline(&mut out, &rest[..lt]);
        }
        rest = &rest[lt..];

        if let Some(stripped) = rest.strip_prefix("<!--") {
            rest = match stripped.find("-->") {
                Some(end) => &stripped[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(gt) = rest.find('>') else {
            rest = "";
            break;
        };
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(skipped) = skip_until.as_deref() {
            if closing && skipped == name {
                skip_until = None;
            }
            continue;
        }

        if !closing && SKIPPED_ELEMENTS.contains(&name.as_str()) && !tag.ends_with('/') {
            skip_until = Some(name);
        } else if BLOCK_ELEMENTS.contains(&name.as_str()) {
            out.push('\n');
        }
    }
    if skip_until.is_none() {
        push_inline(&mut out, rest);
    }

    out.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_inline(out: &mut String, fragment: &str) {
    let decoded = decode_entities(fragment);
    let mut last_space = out.ends_with(' ') || out.ends_with('\n') || out.is_empty();
    for c in decoded.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
}

/// Longest entity body (between `&` and `;`) worth looking at.
const MAX_ENTITY_LEN: usize = 10;

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&end| end <= MAX_ENTITY_LEN)
            .and_then(|end| decode_entity(&after[..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `amp` → `&`, `#8217` / `#x2019` → `’`. Unknown names stay undecoded.
fn decode_entity(name: &str) -> Option<char> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code).filter(|c| *c != '\0');
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "hellip" => '\u{2026}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "euro" => '\u{20AC}',
        _ => return None,
    };
    Some(c)
}
