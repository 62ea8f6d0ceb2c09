//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Source URLs can carry credentials or signed query strings; spans and
//! stored error messages only ever see the redacted form.

/// Strips userinfo and query/fragment from a URL.
///
/// - `https://user:pw@host/a.pdf` → `https://****@host/a.pdf`
/// - `https://host/a.pdf?X-Amz-Signature=...` → `https://host/a.pdf?****`
/// - `https://host/a.pdf` → unchanged
pub fn redact_url(url: &str) -> String {
    let (base, had_query) = match url.find(['?', '#']) {
        Some(pos) => (&url[..pos], true),
        None => (url, false),
    };

    let mut redacted = match base.find("://") {
        Some(scheme_end) => {
            let after_scheme = &base[scheme_end + 3..];
            let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
            match after_scheme[..authority_end].rfind('@') {
                Some(at_pos) => format!(
                    "{}****@{}",
                    &base[..scheme_end + 3],
                    &after_scheme[at_pos + 1..]
                ),
                None => base.to_string(),
            }
        }
        None => base.to_string(),
    };

    if had_query {
        redacted.push_str("?****");
    }
    redacted
}
