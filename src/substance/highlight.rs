//! Severity-colored highlighting of matched names in recognized text.
//!
//! Highlighting works in two steps. [`highlight_spans`] finds every
//! occurrence of every qualifying name, resolves overlaps (earliest start
//! wins, then the longest span, then registry order) and returns a flat,
//! non-overlapping span list. [`render`] then walks the text once and wraps
//! each span. Text outside spans is copied byte for byte, and text that is
//! already wrapped is never matched again, so annotating twice is the same
//! as annotating once.

use super::matcher::compile_name_set;
use super::record::{BanType, SubstanceRecord};

/// Start of every opening tag this module emits.
pub const MARK_OPEN_PREFIX: &str = "<mark data-ban-type=\"";
pub const MARK_CLOSE: &str = "</mark>";

/// A byte range of the source text to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightSpan {
    pub start: usize,
    pub end: usize,
    pub ban_type: BanType,
}

/// Opening tag for a severity: colored, bold, underlined.
pub fn opening_tag(ban_type: BanType) -> String {
    let color = ban_type.color();
    format!(
        "{}{}\" style=\"color: {color}; font-weight: 600; text-decoration: underline; \
         text-decoration-color: {color}; text-underline-offset: 2px;\">",
        MARK_OPEN_PREFIX,
        ban_type.slug(),
    )
}

/// Byte ranges covered by existing highlight markup, tags included.
fn marked_regions(text: &str) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(MARK_OPEN_PREFIX) {
        let open_start = pos + offset;
        let Some(tag_len) = text[open_start..].find('>') else {
            break;
        };
        let content_start = open_start + tag_len + 1;
        let Some(close_offset) = text[content_start..].find(MARK_CLOSE) else {
            break;
        };
        let close_end = content_start + close_offset + MARK_CLOSE.len();
        regions.push((open_start, close_end));
        pos = close_end;
    }

    regions
}

/// Complement of `marked` within `0..len`.
fn free_regions(len: usize, marked: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut free = Vec::new();
    let mut cursor = 0;
    for &(start, end) in marked {
        if start > cursor {
            free.push((cursor, start));
        }
        cursor = end;
    }
    if cursor < len {
        free.push((cursor, len));
    }
    free
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    text[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(text.len())
}

/// Non-overlapping spans to highlight, sorted by start offset.
///
/// Uses the same name rules as matching; callers normally pass the result of
/// matching (optionally filtered by ban type).
pub fn highlight_spans(text: &str, matches: &[SubstanceRecord]) -> Vec<HighlightSpan> {
    let free = free_regions(text.len(), &marked_regions(text));

    // (start, end, record order, ban type)
    let mut candidates: Vec<(usize, usize, usize, BanType)> = Vec::new();

    for (order, record) in matches.iter().enumerate() {
        for pattern in compile_name_set(record) {
            for &(region_start, region_end) in &free {
                let mut pos = region_start;
                while pos < region_end {
                    let Some((start, end)) = pattern.find_at(text, pos) else {
                        break;
                    };
                    if start >= region_end {
                        break;
                    }
                    if end <= region_end {
                        candidates.push((start, end, order, record.ban_type));
                    }
                    // Overlapping occurrences are kept so overlap resolution sees all of them
                    pos = next_char_boundary(text, start);
                }
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then((b.1 - b.0).cmp(&(a.1 - a.0)))
            .then(a.2.cmp(&b.2))
    });

    let mut spans: Vec<HighlightSpan> = Vec::new();
    let mut last_end = 0;
    for (start, end, _, ban_type) in candidates {
        if start < last_end {
            continue;
        }
        spans.push(HighlightSpan { start, end, ban_type });
        last_end = end;
    }

    spans
}

/// Wraps each span of `text` in severity markup, in a single pass.
///
/// Spans must be sorted and non-overlapping, as [`highlight_spans`] returns them.
pub fn render(text: &str, spans: &[HighlightSpan]) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * 160);
    let mut cursor = 0;

    for span in spans {
        out.push_str(&text[cursor..span.start]);
        out.push_str(&opening_tag(span.ban_type));
        out.push_str(&text[span.start..span.end]);
        out.push_str(MARK_CLOSE);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);

    out
}

/// Highlights every occurrence of the matched records' names in `text`.
pub fn annotate(text: &str, matches: &[SubstanceRecord]) -> String {
    render(text, &highlight_spans(text, matches))
}

/// Removes highlight markup, giving back the text that was annotated.
pub fn strip_annotations(annotated: &str) -> String {
    let mut out = String::with_capacity(annotated.len());
    let mut cursor = 0;

    for (start, end) in marked_regions(annotated) {
        out.push_str(&annotated[cursor..start]);
        let inner = &annotated[start..end];
        // marked_regions guarantees a '>' and a trailing close tag
        let content_start = inner.find('>').map(|i| i + 1).unwrap_or(0);
        out.push_str(&inner[content_start..inner.len() - MARK_CLOSE.len()]);
        cursor = end;
    }
    out.push_str(&annotated[cursor..]);

    out
}
