// src/config/properties.rs

//! Parser for Java-style `.properties` streams.
//!
//! Supported syntax: `key=value`, `key:value`, and whitespace-separated
//! pairs; `#`/`!` comment lines; `\uXXXX` escapes; trailing `\` line
//! continuation with leading whitespace of the continuation stripped;
//! escaped separators and whitespace inside keys and values.

use crate::core::errors::FeedgateError;

/// Parses a full properties stream into ordered (key, value) pairs.
/// Later occurrences of a key override earlier ones when folded into a map;
/// the caller decides the fold.
pub fn parse(input: &str) -> Result<Vec<(String, String)>, FeedgateError> {
    let mut pairs = Vec::new();
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        // Fold continuation lines into one logical line. A line continues
        // when it ends with an odd number of backslashes.
        let mut logical = trimmed.to_string();
        while ends_with_odd_backslashes(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let (key, value) = split_pair(&logical)?;
        pairs.push((unescape(&key)?, unescape(&value)?));
    }

    Ok(pairs)
}

fn ends_with_odd_backslashes(s: &str) -> bool {
    s.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Splits a logical line at the first unescaped `=`, `:`, or run of
/// whitespace. The separator may be padded with whitespace on either side.
fn split_pair(line: &str) -> Result<(String, String), FeedgateError> {
    let mut key = String::new();
    let mut chars = line.char_indices();
    let mut split_at = None;

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                key.push(c);
                if let Some((_, escaped)) = chars.next() {
                    key.push(escaped);
                }
            }
            '=' | ':' => {
                split_at = Some((i + c.len_utf8(), true));
                break;
            }
            c if c.is_whitespace() => {
                split_at = Some((i + c.len_utf8(), false));
                break;
            }
            _ => key.push(c),
        }
    }

    let Some((rest_start, saw_separator)) = split_at else {
        // A bare key with no separator maps to the empty value.
        return Ok((key, String::new()));
    };

    let mut rest = &line[rest_start..];
    rest = rest.trim_start();
    // Whitespace before an explicit separator is allowed: `key = value`.
    if !saw_separator {
        if let Some(stripped) = rest.strip_prefix(['=', ':']) {
            rest = stripped.trim_start();
        }
    }
    Ok((key, rest.to_string()))
}

/// Resolves `\uXXXX`, `\t`, `\n`, `\r`, `\f`, and dropped-backslash escapes.
fn unescape(s: &str) -> Result<String, FeedgateError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return Err(FeedgateError::InvalidConfiguration(format!(
                        "truncated \\u escape in '{s}'"
                    )));
                }
                let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                    FeedgateError::InvalidConfiguration(format!(
                        "invalid \\u{hex} escape in '{s}'"
                    ))
                })?;
                let ch = char::from_u32(code).ok_or_else(|| {
                    FeedgateError::InvalidConfiguration(format!(
                        "\\u{hex} is not a valid character"
                    ))
                })?;
                out.push(ch);
            }
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000C}'),
            // Unknown escapes drop the backslash, preserving the character.
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let pairs = parse("a=1\nb:2\nc 3\n").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn strips_comments_and_blanks() {
        let pairs = parse("# comment\n! also\n\n  key=value\n").unwrap();
        assert_eq!(pairs, vec![("key".to_string(), "value".to_string())]);
    }

    #[test]
    fn continuation_strips_leading_whitespace() {
        let pairs = parse("fruits=apple, \\\n    banana\n").unwrap();
        assert_eq!(pairs[0].1, "apple, banana");
    }

    #[test]
    fn double_backslash_is_not_continuation() {
        let pairs = parse("path=C:\\\\dir\nnext=1\n").unwrap();
        assert_eq!(pairs[0].1, "C:\\dir");
        assert_eq!(pairs[1].0, "next");
    }

    #[test]
    fn unicode_escapes() {
        let pairs = parse("greeting=caf\\u00e9\n").unwrap();
        assert_eq!(pairs[0].1, "café");
    }

    #[test]
    fn escaped_separator_stays_in_key() {
        let pairs = parse("a\\=b=c\n").unwrap();
        assert_eq!(pairs[0].0, "a=b");
        assert_eq!(pairs[0].1, "c");
    }

    #[test]
    fn padded_separator() {
        let pairs = parse("key   =   value\n").unwrap();
        assert_eq!(pairs[0], ("key".to_string(), "value".to_string()));
    }
}
