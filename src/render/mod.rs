//! Content rendering — converts accumulated reply text to structured blocks.
//!
//! `render` is a pure function of its input and is re-run on the full
//! accumulated text after every stream chunk, so it has to be safe on
//! partial input: an unterminated trailing fence still renders as a
//! best-effort code block rather than as raw fence markers.

mod code;
mod inline;

pub use code::{CodeToken, TokenKind};
pub use inline::parse_inline;

/// One display block of a rendered reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// A plain line of text with inline spans.
    Paragraph(Vec<Span>),
    /// Consecutive bullet lines grouped into one list.
    List(Vec<Vec<Span>>),
    /// A fenced code block (the closing fence is optional on partial input).
    Code(CodeBlock),
    /// A blank source line.
    Spacer,
}

/// A fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag from the opening fence, if present.
    pub language: Option<String>,
    /// Verbatim body text between the fences.
    pub body: String,
}

/// One inline span within a paragraph or list item.
///
/// Spans are mutually exclusive per character range: content inside an
/// inline-code span is never re-scanned for emphasis markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// Literal text.
    Text(String),
    /// Backtick-delimited inline code.
    Code(String),
    /// Double-asterisk bold.
    Bold(String),
    /// Single-asterisk italic.
    Italic(String),
}

/// Render accumulated text into an ordered block list.
///
/// Idempotent and stateless; callers re-render the whole string on every
/// chunk because fence and list state depend on everything before them.
pub fn render(text: &str) -> Vec<Block> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    let mut segment: Vec<&str> = Vec::new();
    // (language tag, body lines) of the currently open fence.
    let mut fence: Option<(Option<String>, Vec<&str>)> = None;

    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") {
            match fence.take() {
                Some((language, body)) => {
                    blocks.push(Block::Code(CodeBlock {
                        language,
                        body: body.join("\n"),
                    }));
                }
                None => {
                    flush_segment(&mut blocks, &mut segment);
                    let tag = trimmed[3..].trim();
                    let language = tag.split_whitespace().next().map(str::to_owned);
                    fence = Some((language, Vec::new()));
                }
            }
            continue;
        }

        match fence.as_mut() {
            Some((_, body)) => body.push(line),
            None => segment.push(line),
        }
    }

    // Stream ended (or chunk boundary landed) inside an open fence: emit
    // everything after the opening fence as the block body.
    match fence {
        Some((language, body)) => blocks.push(Block::Code(CodeBlock {
            language,
            body: body.join("\n"),
        })),
        None => flush_segment(&mut blocks, &mut segment),
    }

    blocks
}

/// Render accumulated text straight to HTML.
pub fn render_html(text: &str) -> String {
    blocks_to_html(&render(text))
}

/// Serialize a block list to HTML.
pub fn blocks_to_html(blocks: &[Block]) -> String {
    let mut html = String::new();
    for block in blocks {
        match block {
            Block::Paragraph(spans) => {
                html.push_str("<p>");
                spans_html(&mut html, spans);
                html.push_str("</p>");
            }
            Block::List(items) => {
                html.push_str("<ul>");
                for item in items {
                    html.push_str("<li>");
                    spans_html(&mut html, item);
                    html.push_str("</li>");
                }
                html.push_str("</ul>");
            }
            Block::Code(block) => html.push_str(&code::code_block_html(block)),
            Block::Spacer => html.push_str("<div class=\"spacer\"></div>"),
        }
    }
    html
}

fn spans_html(out: &mut String, spans: &[Span]) {
    for span in spans {
        match span {
            Span::Text(text) => out.push_str(&html_escape(text)),
            Span::Code(text) => {
                out.push_str("<code>");
                out.push_str(&html_escape(text));
                out.push_str("</code>");
            }
            Span::Bold(text) => {
                out.push_str("<strong>");
                out.push_str(&html_escape(text));
                out.push_str("</strong>");
            }
            Span::Italic(text) => {
                out.push_str("<em>");
                out.push_str(&html_escape(text));
                out.push_str("</em>");
            }
        }
    }
}

/// Process pending non-code lines into spacer/list/paragraph blocks.
fn flush_segment(blocks: &mut Vec<Block>, lines: &mut Vec<&str>) {
    let mut items: Vec<Vec<Span>> = Vec::new();
    for line in lines.drain(..) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_list(blocks, &mut items);
            blocks.push(Block::Spacer);
        } else if let Some(item) = bullet_item(trimmed) {
            items.push(inline::parse_inline(item));
        } else {
            flush_list(blocks, &mut items);
            blocks.push(Block::Paragraph(inline::parse_inline(trimmed)));
        }
    }
    flush_list(blocks, &mut items);
}

fn flush_list(blocks: &mut Vec<Block>, items: &mut Vec<Vec<Span>>) {
    if !items.is_empty() {
        blocks.push(Block::List(std::mem::take(items)));
    }
}

/// Returns the item text if `line` is a bullet: `-` or `*` followed by
/// whitespace. A bare marker or `**bold**` at line start is not a bullet.
fn bullet_item(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix('-')
        .or_else(|| line.strip_prefix('*'))?;
    let first = rest.chars().next()?;
    first.is_whitespace().then(|| rest.trim_start())
}

/// Escape HTML-significant characters.
pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
