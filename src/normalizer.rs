//! Text canonicalization applied before chunking and embedding.
//!
//! Syllabus exports and regulation PDFs arrive with full-width spaces,
//! non-breaking spaces, Windows line endings, and long blank-line runs.
//! Everything downstream (chunk boundaries, overlap arithmetic, embedding
//! input) assumes the canonical form produced here.

/// Canonicalizes raw field text.
///
/// Rules, in order:
/// - `\r\n` and bare `\r` become `\n`;
/// - full-width space (U+3000), no-break space (U+00A0), tab, and ASCII
///   space all count as horizontal whitespace; runs collapse to one space;
/// - horizontal whitespace adjacent to a newline is dropped;
/// - runs of three or more newlines collapse to two;
/// - leading and trailing whitespace is trimmed.
///
/// The function is total and idempotent: `normalize(normalize(t)) ==
/// normalize(t)` for any input.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut newline_run = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                newline_run += 1;
                pending_space = false;
            }
            '\n' => {
                newline_run += 1;
                pending_space = false;
            }
            ' ' | '\t' | '\u{3000}' | '\u{00A0}' => {
                pending_space = true;
            }
            other => {
                if newline_run > 0 {
                    if !out.is_empty() {
                        out.push('\n');
                        if newline_run > 1 {
                            out.push('\n');
                        }
                    }
                    newline_run = 0;
                } else if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(other);
            }
        }
    }

    out
}
