//! Doublestar glob patterns.
//!
//! `*` matches within one path segment, `**` across segments, `?` one
//! non-separator character. Character classes (`[a-z]`, `[!0-9]`, `[^x]`) and
//! alternatives (`{a,b}`) are supported. `\` escapes the next character.
//! A `**` segment also matches zero segments, so `a/**/b` matches `a/b`.

use crate::error::{PolicyError, PolicyResult};
use regex::Regex;

/// Compile a doublestar pattern into an anchored regex.
pub fn compile(pattern: &str) -> PolicyResult<Regex> {
    let source = translate(pattern)?;
    Regex::new(&source).map_err(|e| invalid(pattern, e.to_string()))
}

fn invalid(pattern: &str, reason: impl Into<String>) -> PolicyError {
    PolicyError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

fn translate(pattern: &str) -> PolicyResult<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut alternation_depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                let next = chars.get(i + 2);
                if at_segment_start && next == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                    continue;
                }
                if i > 0 && chars[i - 1] == '/' && next.is_none() {
                    // "a/**" also matches "a"
                    out.pop();
                    out.push_str("(?:/.*)?");
                } else {
                    out.push_str(".*");
                }
                i += 2;
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let (class, consumed) = translate_class(pattern, &chars[i..])?;
                out.push_str(&class);
                i += consumed;
                continue;
            }
            '{' => {
                alternation_depth += 1;
                out.push_str("(?:");
            }
            ',' if alternation_depth > 0 => out.push('|'),
            '}' if alternation_depth > 0 => {
                alternation_depth -= 1;
                out.push(')');
            }
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| invalid(pattern, "trailing escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
                i += 2;
                continue;
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if alternation_depth > 0 {
        return Err(invalid(pattern, "unclosed alternation"));
    }
    out.push('$');
    Ok(out)
}

/// Translate a `[...]` class starting at `chars[0]`. Returns the regex class
/// and the number of pattern characters consumed.
fn translate_class(pattern: &str, chars: &[char]) -> PolicyResult<(String, usize)> {
    let mut out = String::from("[");
    let mut i = 1;
    if matches!(chars.get(i), Some('!') | Some('^')) {
        out.push('^');
        i += 1;
    }

    let body_start = i;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ']' if i > body_start => {
                out.push(']');
                return Ok((out, i + 1));
            }
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| invalid(pattern, "trailing escape"))?;
                out.push('\\');
                out.push(*escaped);
                i += 2;
                continue;
            }
            '[' | ']' | '&' | '~' | '^' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        i += 1;
    }

    Err(invalid(pattern, "unclosed character class"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, value: &str) -> bool {
        compile(pattern).unwrap().is_match(value)
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        assert!(matches("release-*", "release-1.0"));
        assert!(matches("release-*", "release-"));
        assert!(!matches("release-*", "dev-1.0"));
        assert!(!matches("app/*", "app/a/b"));
        assert!(matches("app/*", "app/a"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        assert!(matches("**", "img"));
        assert!(matches("**", "team/img"));
        assert!(matches("team/**", "team/a/b"));
        assert!(matches("team/**", "team"));
        assert!(matches("a/**/b", "a/b"));
        assert!(matches("a/**/b", "a/x/y/b"));
        assert!(!matches("a/**/b", "a/x/c"));
        assert!(matches("**/img", "img"));
        assert!(matches("**/img", "x/y/img"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("v?", "v1"));
        assert!(!matches("v?", "v10"));
        assert!(!matches("a?b", "a/b"));
    }

    #[test]
    fn test_classes() {
        assert!(matches("v[0-9]", "v7"));
        assert!(!matches("v[0-9]", "vx"));
        assert!(matches("v[!0-9]", "vx"));
        assert!(!matches("v[^0-9]", "v7"));
    }

    #[test]
    fn test_alternatives() {
        assert!(matches("{latest,stable}", "latest"));
        assert!(matches("{latest,stable}", "stable"));
        assert!(!matches("{latest,stable}", "dev"));
        assert!(matches("v{1,2}.*", "v2.3"));
    }

    #[test]
    fn test_literals_are_escaped() {
        assert!(matches("1.0", "1.0"));
        assert!(!matches("1.0", "1x0"));
        assert!(matches("a+b", "a+b"));
        assert!(matches(r"\*", "*"));
        assert!(!matches(r"\*", "x"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(compile("[abc").is_err());
        assert!(compile("{a,b").is_err());
        assert!(compile("abc\\").is_err());
    }
}
