//! Suggestion marker extraction.
//!
//! The completion provider is instructed to embed task proposals in its
//! response as `[[suggest: "title"]]` directives, with `\"` and `\\`
//! escapes inside the quoted title. Markers are never streamed to the
//! client verbatim: the orchestrator forwards raw chunks as they arrive
//! and runs [`extract_suggestions`] exactly once on the fully buffered
//! response, because a marker can span chunk boundaries.

/// Opening token of a suggestion marker.
const MARKER_OPEN: &str = "[[suggest:";

/// Closing token of a suggestion marker.
const MARKER_CLOSE: &str = "]]";

/// Result of one extraction pass over a complete assistant response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// The response text with all well-formed markers removed.
    pub text: String,
    /// Extracted titles, in order of appearance. Trimmed, never empty.
    pub titles: Vec<String>,
}

/// Strips well-formed suggestion markers from `input` and collects their
/// titles. Malformed markers (unterminated quote, missing `]]`) are left
/// in the text verbatim.
#[must_use]
pub fn extract_suggestions(input: &str) -> Extraction {
    let mut text = String::with_capacity(input.len());
    let mut titles = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find(MARKER_OPEN) {
        let (before, candidate) = rest.split_at(start);
        text.push_str(before);
        let body = &candidate[MARKER_OPEN.len()..];
        if let Some((title, consumed)) = parse_marker_body(body) {
            let title = title.trim();
            if !title.is_empty() {
                titles.push(title.to_string());
            }
            rest = &body[consumed..];
        } else {
            // Malformed marker: keep the opening token literally and rescan
            // after it, so a later well-formed marker is still found.
            text.push_str(MARKER_OPEN);
            rest = body;
        }
    }
    text.push_str(rest);

    Extraction { text, titles }
}

/// Parses the remainder of a marker after `[[suggest:`.
///
/// Expects optional whitespace, a double-quoted title with backslash
/// escapes, optional whitespace, and `]]`. Returns the unescaped title and
/// the byte offset just past the closing `]]`.
fn parse_marker_body(body: &str) -> Option<(String, usize)> {
    let mut chars = body.char_indices().peekable();

    while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
        chars.next();
    }
    match chars.next() {
        Some((_, '"')) => {}
        _ => return None,
    }

    let mut title = String::new();
    loop {
        match chars.next() {
            Some((_, '\\')) => match chars.next() {
                Some((_, '"')) => title.push('"'),
                Some((_, '\\')) => title.push('\\'),
                // Unknown escape: keep both characters literally.
                Some((_, other)) => {
                    title.push('\\');
                    title.push(other);
                }
                None => return None,
            },
            Some((_, '"')) => break,
            Some((_, c)) => title.push(c),
            None => return None,
        }
    }

    while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
        chars.next();
    }
    let close_at = match chars.next() {
        Some((i, ']')) => i,
        _ => return None,
    };
    if !body[close_at..].starts_with(MARKER_CLOSE) {
        return None;
    }

    Some((title, close_at + MARKER_CLOSE.len()))
}
