//! Whole-text passes that run before tokenization.
//!
//! Each pass consumes the complete output of the previous one and returns
//! a new string; nothing is shared with the lexer while a pass runs. Both
//! passes keep byte offsets and line breaks intact, so spans and line
//! numbers computed on the result point into the original source.

/// Blank out `{ ... }` comments.
///
/// Comment characters become spaces (one per byte) and newlines inside a
/// comment are kept. Comments do not nest. An unterminated comment is
/// left untouched so the lexer can report it at its opening brace.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let close = open + close;
        out.push_str(&rest[..open]);
        for c in rest[open..=close].chars() {
            if c == '\n' {
                out.push('\n');
            } else {
                out.extend(std::iter::repeat(' ').take(c.len_utf8()));
            }
        }
        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Map every whitespace character other than `\n` to a plain space.
///
/// Multi-byte whitespace is widened to one space per byte.
pub fn normalize_whitespace(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for c in source.chars() {
        if c.is_whitespace() && c != '\n' {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        } else {
            out.push(c);
        }
    }
    out
}

/// Run both passes in order.
pub fn run(source: &str) -> String {
    normalize_whitespace(&strip_comments(source))
}
