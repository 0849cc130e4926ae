// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

//! Compact line-pattern DSL used for readiness/busy detection.
//!
//! Grammar:
//!
//! | construct      | meaning                         |
//! |-----------------|----------------------------------|
//! | `#`             | single decimal digit (`\d`)      |
//! | `w`             | single word character (`\w`)     |
//! | `.`             | any character                    |
//! | `_`             | single space                     |
//! | `+` `*` `?`      | quantifier on the preceding type |
//! | `N` / `N-M`      | exact count / range, on a type   |
//! | `^` at start     | anchor                           |
//! | `$` at end       | anchor                           |
//! | `[text]`         | literal, regex-escaped           |
//! | `[N]`            | exact N-character gap            |
//! | `[*]` / `[+]`     | any gap, zero+ / one+             |
//! | anything else    | literal, regex-escaped           |
//!
//! Quantifier parsing is greedy over digits and `-`; a type with no
//! following quantifier means "exactly one". Compilation is pure and
//! cheap enough that callers are expected to cache the result.

use regex::Regex;

/// Error produced when a DSL string cannot be compiled.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DslError {
    #[error("unterminated '[' starting at byte {0}")]
    UnterminatedBracket(usize),
    #[error("invalid regex produced from DSL: {0}")]
    Regex(String),
}

/// Parse the quantifier starting at `pos`, returning the regex suffix to
/// append and the number of DSL bytes it consumed. A type with nothing
/// following it (or a non-quantifier character) consumes zero bytes and
/// means "exactly one".
fn parse_quantifier(dsl: &[u8], pos: usize) -> (String, usize) {
    let Some(&c) = dsl.get(pos) else {
        return (String::new(), 0);
    };
    match c {
        b'+' => ("+".to_owned(), 1),
        b'*' => ("*".to_owned(), 1),
        b'?' => ("?".to_owned(), 1),
        b'0'..=b'9' => {
            let mut j = pos;
            while j < dsl.len() && (dsl[j].is_ascii_digit() || dsl[j] == b'-') {
                j += 1;
            }
            let spec = std::str::from_utf8(&dsl[pos..j]).unwrap_or_default();
            let regex_spec = spec.replacen('-', ",", 1);
            (format!("{{{regex_spec}}}"), j - pos)
        }
        _ => (String::new(), 0),
    }
}

/// Compile a single DSL line (no embedded newlines) into a regex pattern
/// string. Does not anchor or compile the regex itself.
fn compile_line(dsl: &str) -> Result<String, DslError> {
    let bytes = dsl.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'$' if i == bytes.len() - 1 => out.push('$'),
            b'^' if i == 0 => out.push('^'),
            b'[' => {
                let end = dsl[i + 1..].find(']').map(|p| i + 1 + p);
                let Some(end) = end else {
                    return Err(DslError::UnterminatedBracket(i));
                };
                let content = &dsl[i + 1..end];
                match content {
                    "*" => out.push_str(".*"),
                    "+" => out.push_str(".+"),
                    c if !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()) => {
                        out.push_str(&format!(".{{{c}}}"))
                    }
                    literal => out.push_str(&regex::escape(literal)),
                }
                i = end;
            }
            b'#' => {
                let (quant, skip) = parse_quantifier(bytes, i + 1);
                out.push_str(&format!("\\d{quant}"));
                i += skip;
            }
            b'w' => {
                let (quant, skip) = parse_quantifier(bytes, i + 1);
                out.push_str(&format!("\\w{quant}"));
                i += skip;
            }
            b'_' => {
                let (quant, skip) = parse_quantifier(bytes, i + 1);
                out.push_str(&format!(" {quant}"));
                i += skip;
            }
            b'.' => {
                let (quant, skip) = parse_quantifier(bytes, i + 1);
                out.push_str(&format!(".{quant}"));
                i += skip;
            }
            other => {
                // Safe: DSL is ASCII-oriented; non-ASCII bytes fall through
                // as single-byte literals via regex::escape on a 1-char str.
                out.push_str(&regex::escape(&(other as char).to_string()));
            }
        }
        i += 1;
    }
    Ok(out)
}

/// Compile a DSL string (possibly multi-line) into a single-line regex.
/// Multi-line handling (matching a contiguous run of output lines) is the
/// caller's responsibility — see [`crate::pattern_store`].
pub fn compile_dsl(dsl: &str) -> Result<Regex, DslError> {
    let pattern = compile_line(dsl)?;
    Regex::new(&pattern).map_err(|e| DslError::Regex(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(dsl: &str, s: &str) -> bool {
        compile_dsl(dsl).expect("compiles").is_match(s)
    }

    #[test]
    fn empty_dsl_matches_any_line() {
        assert!(matches("", "anything at all"));
        assert!(matches("", ""));
    }

    #[test]
    fn digit_anchors() {
        assert!(matches("^#+$", "1"));
        assert!(matches("^#+$", "123"));
        assert!(!matches("^#+$", ""));
        assert!(!matches("^#+$", "1a"));
    }

    #[test]
    fn literal_bracket_is_case_sensitive() {
        assert!(matches("[login: ]w+", "login: bob"));
        assert!(!matches("[login: ]w+", "Login: bob"));
    }

    #[test]
    fn prompt_anchor() {
        assert!(matches("[$ ]$", "user@host $ "));
        assert!(!matches("[$ ]$", "user@host $ extra"));
    }

    #[test]
    fn gap_constructs() {
        assert!(matches("[Serving HTTP on ][+]", "Serving HTTP on 0.0.0.0:8000"));
        assert!(matches("a[3]b", "a123b"));
        assert!(matches("a[*]b", "ab"));
        assert!(matches("a[*]b", "axyzb"));
    }

    #[test]
    fn quantifier_ranges() {
        let re = compile_dsl("#2-4").expect("compiles");
        assert!(re.is_match("12"));
        assert!(re.is_match("1234"));
    }

    #[test]
    fn unterminated_bracket_is_an_error() {
        assert!(matches!(compile_dsl("[unterminated"), Err(DslError::UnterminatedBracket(0))));
    }

    #[test]
    fn literal_characters_are_escaped() {
        // `.` inside brackets is literal via escape, outside it's "any char".
        assert!(matches("[a.b]", "a.b"));
        assert!(!matches("[a.b]", "axb"));
    }
}
