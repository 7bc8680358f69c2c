//! Display-only token classification for fenced code blocks.
//!
//! Classification is cosmetic: it never affects block parsing, and a
//! keyword from one language lighting up in another is acceptable. Token
//! text is HTML-escaped before any highlighting markup is added, so
//! markup-significant characters in code can never merge with the
//! injected tags.

use super::{CodeBlock, html_escape};

/// Languages the classifier is applied to. Anything else renders as
/// escaped, unhighlighted text.
const KNOWN_LANGUAGES: &[&str] = &[
    "python", "py", "javascript", "js", "typescript", "ts", "rust", "rs", "go", "c", "cpp", "c++",
    "java", "sh", "bash", "shell",
];

/// Keyword set shared across the known languages.
const KEYWORDS: &[&str] = &[
    "and", "as", "async", "await", "break", "case", "catch", "class", "const", "continue", "def",
    "elif", "else", "enum", "except", "export", "extern", "finally", "fn", "for", "from",
    "function", "if", "impl", "import", "in", "is", "let", "loop", "match", "mod", "mut", "new",
    "not", "of", "or", "pass", "pub", "raise", "return", "self", "static", "struct", "switch",
    "throw", "trait", "try", "type", "use", "var", "void", "while", "yield", "true", "false",
    "null", "nil", "None", "True", "False",
];

/// Display class of one code token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Plain,
    Keyword,
    Number,
    Str,
    Comment,
}

impl TokenKind {
    fn css_class(self) -> &'static str {
        match self {
            TokenKind::Plain => "plain",
            TokenKind::Keyword => "keyword",
            TokenKind::Number => "number",
            TokenKind::Str => "string",
            TokenKind::Comment => "comment",
        }
    }
}

/// One classified run of code text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeToken {
    pub kind: TokenKind,
    pub text: String,
}

/// True if the fence language tag enables classification.
pub fn is_known_language(lang: &str) -> bool {
    KNOWN_LANGUAGES
        .iter()
        .any(|known| lang.eq_ignore_ascii_case(known))
}

/// Tokenize code for display.
///
/// The concatenation of the returned token texts always equals the input
/// exactly; unrecognized runs come back as `Plain`.
pub fn tokenize(code: &str) -> Vec<CodeToken> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // Line comments: `#` or `//`, to end of line.
        if c == '#' || (c == '/' && chars.get(i + 1) == Some(&'/')) {
            flush_plain(&mut tokens, &mut plain);
            let mut text = String::new();
            while i < chars.len() && chars[i] != '\n' {
                text.push(chars[i]);
                i += 1;
            }
            tokens.push(CodeToken {
                kind: TokenKind::Comment,
                text,
            });
            continue;
        }

        // Single-line string literals with backslash escapes. An
        // unterminated string runs to end of line.
        if c == '"' || c == '\'' {
            flush_plain(&mut tokens, &mut plain);
            let quote = c;
            let mut text = String::from(c);
            i += 1;
            while i < chars.len() && chars[i] != '\n' {
                let ch = chars[i];
                text.push(ch);
                i += 1;
                if ch == '\\' {
                    if i < chars.len() && chars[i] != '\n' {
                        text.push(chars[i]);
                        i += 1;
                    }
                    continue;
                }
                if ch == quote {
                    break;
                }
            }
            tokens.push(CodeToken {
                kind: TokenKind::Str,
                text,
            });
            continue;
        }

        // Numeric literals. Identifiers with trailing digits were already
        // consumed by the word branch, so a digit here starts a number.
        if c.is_ascii_digit() {
            flush_plain(&mut tokens, &mut plain);
            let mut text = String::new();
            while i < chars.len() && chars[i].is_ascii_digit() {
                text.push(chars[i]);
                i += 1;
            }
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                text.push('.');
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    text.push(chars[i]);
                    i += 1;
                }
            }
            tokens.push(CodeToken {
                kind: TokenKind::Number,
                text,
            });
            continue;
        }

        // Identifiers / keywords.
        if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                word.push(chars[i]);
                i += 1;
            }
            if KEYWORDS.contains(&word.as_str()) {
                flush_plain(&mut tokens, &mut plain);
                tokens.push(CodeToken {
                    kind: TokenKind::Keyword,
                    text: word,
                });
            } else {
                plain.push_str(&word);
            }
            continue;
        }

        plain.push(c);
        i += 1;
    }

    flush_plain(&mut tokens, &mut plain);
    tokens
}

fn flush_plain(tokens: &mut Vec<CodeToken>, plain: &mut String) {
    if !plain.is_empty() {
        tokens.push(CodeToken {
            kind: TokenKind::Plain,
            text: std::mem::take(plain),
        });
    }
}

/// Render a code block to HTML.
pub(crate) fn code_block_html(block: &CodeBlock) -> String {
    let lang = block.language.as_deref().unwrap_or("");
    let inner = if is_known_language(lang) {
        highlighted_html(&block.body)
    } else {
        html_escape(&block.body)
    };
    format!(
        "<div class=\"code-block\" data-lang=\"{}\"><pre><code>{inner}</code></pre></div>",
        html_escape(lang),
    )
}

fn highlighted_html(code: &str) -> String {
    let mut out = String::new();
    for token in tokenize(code) {
        let escaped = html_escape(&token.text);
        match token.kind {
            TokenKind::Plain => out.push_str(&escaped),
            kind => {
                out.push_str("<span class=\"tok-");
                out.push_str(kind.css_class());
                out.push_str("\">");
                out.push_str(&escaped);
                out.push_str("</span>");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(code: &str) -> Vec<(TokenKind, String)> {
        tokenize(code)
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    fn concat(code: &str) -> String {
        tokenize(code).into_iter().map(|t| t.text).collect()
    }

    // -- tokenize ----------------------------------------------------------

    #[test]
    fn test_tokens_concat_to_input() {
        let samples = [
            "def f(x):\n    return x + 1  # doubles\n",
            "let s = \"a \\\" quote\";\n// done",
            "if (n > 3.14) { go('fast') }",
            "naked 'string",
            "",
        ];
        for sample in samples {
            assert_eq!(concat(sample), sample, "lossy tokenization of {sample:?}");
        }
    }

    #[test]
    fn test_python_snippet_classification() {
        let tokens = kinds("def add(a):\n    return a + 2  # sum");
        assert!(tokens.contains(&(TokenKind::Keyword, "def".to_owned())));
        assert!(tokens.contains(&(TokenKind::Keyword, "return".to_owned())));
        assert!(tokens.contains(&(TokenKind::Number, "2".to_owned())));
        assert!(tokens.contains(&(TokenKind::Comment, "# sum".to_owned())));
    }

    #[test]
    fn test_double_slash_comment() {
        let tokens = kinds("let x = 1; // note\nnext");
        assert!(tokens.contains(&(TokenKind::Comment, "// note".to_owned())));
        // The newline and following code are outside the comment.
        assert!(tokens.iter().any(|(k, t)| *k == TokenKind::Plain && t.contains("next")));
    }

    #[test]
    fn test_string_with_escaped_quote() {
        let tokens = kinds(r#"say("a \" b") more"#);
        assert!(tokens.contains(&(TokenKind::Str, r#""a \" b""#.to_owned())));
    }

    #[test]
    fn test_unterminated_string_runs_to_end_of_line() {
        let tokens = kinds("x = 'oops\ny = 1");
        assert!(tokens.contains(&(TokenKind::Str, "'oops".to_owned())));
        assert!(tokens.contains(&(TokenKind::Number, "1".to_owned())));
    }

    #[test]
    fn test_float_literal() {
        let tokens = kinds("pi = 3.14");
        assert!(tokens.contains(&(TokenKind::Number, "3.14".to_owned())));
    }

    #[test]
    fn test_digits_inside_identifier_stay_plain() {
        let tokens = kinds("utf8_len");
        assert_eq!(tokens, vec![(TokenKind::Plain, "utf8_len".to_owned())]);
    }

    #[test]
    fn test_keyword_prefix_of_identifier_not_matched() {
        let tokens = kinds("iffy format");
        assert!(tokens.iter().all(|(k, _)| *k == TokenKind::Plain));
    }

    // -- language gate -----------------------------------------------------

    #[test]
    fn test_known_languages_case_insensitive() {
        assert!(is_known_language("py"));
        assert!(is_known_language("Rust"));
        assert!(is_known_language("JS"));
        assert!(!is_known_language("cobol"));
        assert!(!is_known_language(""));
    }

    // -- html --------------------------------------------------------------

    #[test]
    fn test_highlight_escapes_before_tagging() {
        let block = CodeBlock {
            language: Some("js".to_owned()),
            body: "let s = \"<span>\";".to_owned(),
        };
        let html = code_block_html(&block);
        assert!(html.contains("&lt;span&gt;"));
        assert!(!html.contains("\"<span>\""));
        assert!(html.contains("<span class=\"tok-keyword\">let</span>"));
        assert!(html.contains("<span class=\"tok-string\">"));
    }

    #[test]
    fn test_unknown_language_not_highlighted() {
        let block = CodeBlock {
            language: Some("cobol".to_owned()),
            body: "if x then 1".to_owned(),
        };
        let html = code_block_html(&block);
        assert!(!html.contains("tok-"));
        assert!(html.contains("if x then 1"));
        assert!(html.contains("data-lang=\"cobol\""));
    }

    #[test]
    fn test_missing_language_not_highlighted() {
        let block = CodeBlock {
            language: None,
            body: "return 1".to_owned(),
        };
        let html = code_block_html(&block);
        assert!(!html.contains("tok-"));
        assert!(html.contains("data-lang=\"\""));
    }

    #[test]
    fn test_comment_classified_in_highlighted_output() {
        let block = CodeBlock {
            language: Some("py".to_owned()),
            body: "x = 1  # note".to_owned(),
        };
        let html = code_block_html(&block);
        assert!(html.contains("<span class=\"tok-comment\"># note</span>"));
        assert!(html.contains("<span class=\"tok-number\">1</span>"));
    }
}
