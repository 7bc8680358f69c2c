//! Inline span scanning for paragraph and list-item text.

use super::Span;

/// Scan a line of text into inline spans, left to right.
///
/// Markers are matched greedily at the current position (`**` before `*`);
/// a marker with no closing partner degrades to literal text and scanning
/// continues after it, so malformed input can never lose characters.
pub fn parse_inline(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("**") {
            match after.find("**") {
                Some(end) => {
                    flush_literal(&mut spans, &mut literal);
                    spans.push(Span::Bold(after[..end].to_owned()));
                    rest = &after[end + 2..];
                }
                None => {
                    literal.push_str("**");
                    rest = after;
                }
            }
        } else if let Some(after) = rest.strip_prefix('*') {
            match after.find('*') {
                Some(end) => {
                    flush_literal(&mut spans, &mut literal);
                    spans.push(Span::Italic(after[..end].to_owned()));
                    rest = &after[end + 1..];
                }
                None => {
                    literal.push('*');
                    rest = after;
                }
            }
        } else if let Some(after) = rest.strip_prefix('`') {
            match after.find('`') {
                Some(end) => {
                    flush_literal(&mut spans, &mut literal);
                    spans.push(Span::Code(after[..end].to_owned()));
                    rest = &after[end + 1..];
                }
                None => {
                    literal.push('`');
                    rest = after;
                }
            }
        } else {
            let next = rest.find(['*', '`']).unwrap_or(rest.len());
            literal.push_str(&rest[..next]);
            rest = &rest[next..];
        }
    }

    flush_literal(&mut spans, &mut literal);
    spans
}

fn flush_literal(spans: &mut Vec<Span>, literal: &mut String) {
    if !literal.is_empty() {
        spans.push(Span::Text(std::mem::take(literal)));
    }
}
