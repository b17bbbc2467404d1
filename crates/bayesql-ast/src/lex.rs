//! Phrase scanning.
//!
//! Splits BQL input at top-level semicolons and validates the
//! token-level constructs the grammar cannot report precisely:
//! unterminated strings and block comments, malformed numeric
//! literals, zero or oversized parameter indices.  The scanner is
//! restartable: each returned phrase is independent, so a caller that
//! hits a parse error in one phrase can continue with the next.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lexical error at {line}:{col}: {reason}")]
pub struct LexicalError {
    pub line: usize,
    pub col: usize,
    pub reason: String,
}

impl LexicalError {
    fn new(line: usize, col: usize, reason: impl Into<String>) -> Self {
        LexicalError { line, col, reason: reason.into() }
    }
}

/// One semicolon-delimited phrase, with the position of its first
/// byte in the original input (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhraseText<'a> {
    pub text: &'a str,
    pub line: usize,
    pub col: usize,
}

/// Split `input` into phrases at top-level semicolons.  Semicolons
/// inside strings, quoted names and comments do not split.  Empty
/// phrases are retained (the parser skips them).
pub fn split_phrases(input: &str) -> Result<Vec<PhraseText<'_>>, LexicalError> {
    let bytes = input.as_bytes();
    let mut phrases = Vec::new();
    let mut start = 0usize;
    let mut start_line = 1usize;
    let mut start_col = 1usize;
    let mut line = 1usize;
    let mut col = 1usize;
    let mut i = 0usize;
    let mut prev_name_char = false;
    let mut depth = 0usize;

    macro_rules! advance {
        ($n:expr) => {{
            for _ in 0..$n {
                if bytes[i] == b'\n' {
                    line += 1;
                    col = 1;
                } else {
                    col += 1;
                }
                i += 1;
            }
        }};
    }

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' | b'"' => {
                let (qline, qcol) = (line, col);
                let quote = c;
                advance!(1);
                loop {
                    if i >= bytes.len() {
                        let what = if quote == b'\'' { "unterminated string" } else { "unterminated quoted name" };
                        return Err(LexicalError::new(qline, qcol, what));
                    }
                    if bytes[i] == quote {
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            advance!(2);
                        } else {
                            advance!(1);
                            break;
                        }
                    } else {
                        advance!(1);
                    }
                }
                prev_name_char = false;
            }
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    advance!(1);
                }
                prev_name_char = false;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                let (cline, ccol) = (line, col);
                advance!(2);
                loop {
                    if i + 1 >= bytes.len() {
                        return Err(LexicalError::new(cline, ccol, "unterminated block comment"));
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        advance!(2);
                        break;
                    }
                    advance!(1);
                }
                prev_name_char = false;
            }
            b'(' => {
                depth += 1;
                advance!(1);
                prev_name_char = false;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                advance!(1);
                prev_name_char = false;
            }
            // Semicolons nested in parentheses separate population
            // schema clauses, not phrases.
            b';' if depth == 0 => {
                phrases.push(PhraseText {
                    text: &input[start..i],
                    line: start_line,
                    col: start_col,
                });
                advance!(1);
                start = i;
                start_line = line;
                start_col = col;
                prev_name_char = false;
            }
            b';' => {
                advance!(1);
                prev_name_char = false;
            }
            b'?' => {
                let (pline, pcol) = (line, col);
                advance!(1);
                let digits_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    advance!(1);
                }
                let digits = &input[digits_start..i];
                if !digits.is_empty() {
                    if digits.len() > 20 {
                        return Err(LexicalError::new(pline, pcol, "parameter number too large"));
                    }
                    if digits.bytes().all(|b| b == b'0') {
                        return Err(LexicalError::new(pline, pcol, "parameter numbers are 1-based"));
                    }
                }
                prev_name_char = false;
            }
            b'0'..=b'9' if !prev_name_char => {
                let (nline, ncol) = (line, col);
                scan_number(bytes, &mut i, &mut line, &mut col)?;
                if i < bytes.len() && is_name_char(bytes[i]) {
                    return Err(LexicalError::new(nline, ncol, "malformed numeric literal"));
                }
                prev_name_char = false;
            }
            _ => {
                prev_name_char = is_name_char(c);
                advance!(1);
            }
        }
    }
    phrases.push(PhraseText {
        text: &input[start..],
        line: start_line,
        col: start_col,
    });
    Ok(phrases)
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Consume a numeric literal: decimal or 0x-hex integer, or a decimal
/// float with optional fraction and exponent.  Leaves the cursor on
/// the first byte past the literal.
fn scan_number(
    bytes: &[u8],
    i: &mut usize,
    line: &mut usize,
    col: &mut usize,
) -> Result<(), LexicalError> {
    let mut step = |i: &mut usize, col: &mut usize| {
        *i += 1;
        *col += 1;
    };
    let start_line = *line;
    let start_col = *col;
    if bytes[*i] == b'0'
        && *i + 1 < bytes.len()
        && (bytes[*i + 1] == b'x' || bytes[*i + 1] == b'X')
    {
        step(i, col);
        step(i, col);
        let hex_start = *i;
        while *i < bytes.len() && bytes[*i].is_ascii_hexdigit() {
            step(i, col);
        }
        if *i == hex_start {
            return Err(LexicalError::new(start_line, start_col, "malformed numeric literal"));
        }
        return Ok(());
    }
    while *i < bytes.len() && bytes[*i].is_ascii_digit() {
        step(i, col);
    }
    if *i < bytes.len() && bytes[*i] == b'.' {
        step(i, col);
        while *i < bytes.len() && bytes[*i].is_ascii_digit() {
            step(i, col);
        }
    }
    if *i < bytes.len() && (bytes[*i] == b'e' || bytes[*i] == b'E') {
        // Only take the exponent if it is well-formed; otherwise the
        // trailing name character is reported by the caller.
        let mut j = *i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while *i < j {
                step(i, col);
            }
            while *i < bytes.len() && bytes[*i].is_ascii_digit() {
                step(i, col);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_top_level_semicolons() {
        let phrases = split_phrases("select 1; select 2").unwrap();
        assert_eq!(phrases.len(), 2);
        assert_eq!(phrases[0].text, "select 1");
        assert_eq!(phrases[1].text, " select 2");
        assert_eq!(phrases[1].line, 1);
        assert_eq!(phrases[1].col, 10);
    }

    #[test]
    fn semicolon_in_string_does_not_split() {
        let phrases = split_phrases("select 'a;b'").unwrap();
        assert_eq!(phrases.len(), 1);
    }

    #[test]
    fn doubled_quote_escape() {
        let phrases = split_phrases("select 'it''s; fine'; select 2").unwrap();
        assert_eq!(phrases.len(), 2);
    }

    #[test]
    fn comments_hide_semicolons() {
        let phrases = split_phrases("select 1 -- ;\n, 2; select /* ; */ 3").unwrap();
        assert_eq!(phrases.len(), 2);
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = split_phrases("select\n 'oops").unwrap_err();
        assert_eq!((err.line, err.col), (2, 2));
        assert!(err.reason.contains("unterminated string"));
    }

    #[test]
    fn unterminated_block_comment() {
        let err = split_phrases("select 1 /* no end").unwrap_err();
        assert!(err.reason.contains("block comment"));
    }

    #[test]
    fn malformed_number() {
        let err = split_phrases("select 12abc").unwrap_err();
        assert!(err.reason.contains("numeric"));
        assert_eq!((err.line, err.col), (1, 8));
    }

    #[test]
    fn hex_and_float_literals_pass() {
        assert!(split_phrases("select 0x1F, 1.5e-3, .5, 2.").is_ok());
    }

    #[test]
    fn zero_parameter_number_rejected() {
        let err = split_phrases("select ?0").unwrap_err();
        assert!(err.reason.contains("1-based"));
    }

    #[test]
    fn name_with_digits_is_not_a_number() {
        assert!(split_phrases("select a12b from t").is_ok());
    }

    #[test]
    fn parenthesized_semicolons_do_not_split() {
        let phrases = split_phrases(
            "create population p for t with schema (model a as numerical; ignore b); select 1",
        )
        .unwrap();
        assert_eq!(phrases.len(), 2);
        assert!(phrases[0].text.contains("ignore b"));
    }
}
