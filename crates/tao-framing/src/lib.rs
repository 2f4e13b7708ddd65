//! Command-line word splitting and packing for the text protocol spoken
//! over the command channel: quoting rules close enough to a POSIX shell
//! to be familiar, simple enough to implement without one.
//!
//! A line is a sequence of whitespace-separated words. A word may embed
//! single-quoted segments (`'...'`, no escapes, cannot contain a quote)
//! and double-quoted segments (`"..."`, escaping `\n`, `\r`, `\t`, `\"`,
//! and `\\`); segments concatenate, so `ab'cd'"ef"` is one four-plus-two
//! character word. A trailing `\n`, `\r`, or `\r\n` is stripped before
//! splitting and is not part of any word.

use tao_error::{bail, ErrorKind, Result};

/// Split one line of the text protocol into its words.
pub fn split(line: &str) -> Result<Vec<String>> {
    let line = strip_line_ending(line);
    let chars: Vec<char> = line.chars().collect();
    let n = chars.len();
    let mut words = Vec::new();
    let mut i = 0;

    while i < n {
        while i < n && is_separator(chars[i]) {
            i += 1;
        }
        if i >= n {
            break;
        }
        let (word, next) = split_word(&chars, i)?;
        words.push(word);
        i = next;
    }
    Ok(words)
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .or_else(|| line.strip_suffix('\r'))
        .unwrap_or(line)
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn split_word(chars: &[char], mut i: usize) -> Result<(String, usize)> {
    let n = chars.len();
    let mut word = String::new();
    while i < n && !is_separator(chars[i]) {
        match chars[i] {
            '\'' => {
                i += 1;
                let start = i;
                while i < n && chars[i] != '\'' {
                    i += 1;
                }
                if i >= n {
                    return bail("split_word", ErrorKind::UnclosedString);
                }
                word.extend(&chars[start..i]);
                i += 1;
            }
            '"' => {
                let (segment, next) = split_double_quoted(chars, i + 1)?;
                word.push_str(&segment);
                i = next;
            }
            c if c.is_control() => {
                return bail("split_word", ErrorKind::BadCharacter);
            }
            c => {
                word.push(c);
                i += 1;
            }
        }
    }
    Ok((word, i))
}

fn split_double_quoted(chars: &[char], mut i: usize) -> Result<(String, usize)> {
    let n = chars.len();
    let mut segment = String::new();
    loop {
        if i >= n {
            return bail("split_double_quoted", ErrorKind::UnclosedString);
        }
        match chars[i] {
            '"' => return Ok((segment, i + 1)),
            '\\' => {
                i += 1;
                if i >= n {
                    return bail("split_double_quoted", ErrorKind::UnclosedString);
                }
                let escaped = match chars[i] {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '"' => '"',
                    '\\' => '\\',
                    _ => return bail("split_double_quoted", ErrorKind::BadEscape),
                };
                segment.push(escaped);
                i += 1;
            }
            c => {
                segment.push(c);
                i += 1;
            }
        }
    }
}

/// Pack words back into one line, quoting only where needed, terminated
/// by `\n`. An empty word packs as `''` (the only way to represent it that
/// `split` parses back to an empty string rather than dropping the word).
#[must_use]
pub fn pack(words: &[String]) -> String {
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&pack_word(word));
    }
    out.push('\n');
    out
}

fn pack_word(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    let needs_escaping = word.chars().any(|c| matches!(c, '\'' | '"' | '\\') || c.is_control());
    let needs_quoting = word.chars().any(|c| is_separator(c)) || needs_escaping;
    if !needs_quoting {
        return word.to_string();
    }
    if needs_escaping {
        let mut s = String::from("\"");
        for c in word.chars() {
            match c {
                '\n' => s.push_str("\\n"),
                '\r' => s.push_str("\\r"),
                '\t' => s.push_str("\\t"),
                '"' => s.push_str("\\\""),
                '\\' => s.push_str("\\\\"),
                c => s.push(c),
            }
        }
        s.push('"');
        s
    } else {
        format!("'{word}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bare_words_on_spaces_and_tabs() {
        assert_eq!(split("set roi 0 0 64 64\n").unwrap(), vec!["set", "roi", "0", "0", "64", "64"]);
        assert_eq!(split("a\tb  c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn strips_trailing_line_ending_variants() {
        assert_eq!(split("x\r\n").unwrap(), vec!["x"]);
        assert_eq!(split("x\r").unwrap(), vec!["x"]);
        assert_eq!(split("x\n").unwrap(), vec!["x"]);
        assert_eq!(split("x").unwrap(), vec!["x"]);
    }

    #[test]
    fn single_quoted_literal_has_no_escapes() {
        assert_eq!(split("'a\\nb'").unwrap(), vec!["a\\nb"]);
    }

    #[test]
    fn double_quoted_segment_interprets_escapes() {
        assert_eq!(split(r#""a\nb\t\"c\\d""#).unwrap(), vec!["a\nb\t\"c\\d"]);
    }

    #[test]
    fn segments_concatenate_within_one_word() {
        assert_eq!(split(r#"ab'cd'"ef""#).unwrap(), vec!["abcdef"]);
    }

    #[test]
    fn unclosed_single_quote_is_an_error() {
        assert_eq!(split("'abc").unwrap_err().kind(), ErrorKind::UnclosedString);
    }

    #[test]
    fn unclosed_double_quote_is_an_error() {
        assert_eq!(split("\"abc").unwrap_err().kind(), ErrorKind::UnclosedString);
    }

    #[test]
    fn unknown_escape_is_an_error() {
        assert_eq!(split(r#""a\qb""#).unwrap_err().kind(), ErrorKind::BadEscape);
    }

    #[test]
    fn bare_control_character_is_an_error() {
        assert_eq!(split("a\u{7}b").unwrap_err().kind(), ErrorKind::BadCharacter);
    }

    #[test]
    fn pack_quotes_only_where_needed() {
        let words = vec!["plain".to_string(), "with space".to_string(), String::new()];
        assert_eq!(pack(&words), "plain 'with space' ''\n");
    }

    #[test]
    fn pack_escapes_embedded_quotes_and_backslashes() {
        let words = vec!["it's \"quoted\"".to_string()];
        assert_eq!(pack(&words), "\"it's \\\"quoted\\\"\"\n");
    }

    /// P7: packing and re-splitting any vector of plain-text words returns
    /// the same words.
    #[test]
    fn property_p7_pack_then_split_round_trips() {
        use proptest::prelude::*;
        proptest!(|(words in proptest::collection::vec("[ -~]{0,12}", 0..6))| {
            let packed = pack(&words);
            let parsed = split(&packed).unwrap();
            prop_assert_eq!(parsed, words);
        });
    }
}
