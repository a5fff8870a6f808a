use regex::Regex;

use crate::pdar::error::{InvalidPatternSnafu, Result};

/// Translates a shell-style glob (`*`, `?`, `[seq]`, `[!seq]`) into an anchored regex matching
/// the whole target path. There's no dedicated glob dependency in play here; `regex` already
/// covers manifest-filename matching elsewhere, so patterns are lowered to it directly.
pub fn compile(pattern: &str) -> Result<Regex> {
    let translated = translate(pattern);
    Regex::new(&translated).map_err(|_| {
        InvalidPatternSnafu {
            pattern: pattern.to_string(),
        }
        .build()
    })
}

/// Compiles a set of patterns and returns true if any of them (or an empty set, meaning "match
/// all") accept `name`.
pub fn any_matches(patterns: &[Regex], name: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.is_match(name))
}

fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    let mut class: String = chars[i + 1..j].iter().collect();
                    if let Some(rest) = class.strip_prefix('!') {
                        class = format!("^{rest}");
                    }
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_anything() {
        let re = compile("*").unwrap();
        assert!(re.is_match("anything.txt"));
        assert!(re.is_match(""));
    }

    #[test]
    fn extension_glob_matches_suffix_only() {
        let re = compile("*.txt").unwrap();
        assert!(re.is_match("readme.txt"));
        assert!(!re.is_match("readme.md"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let re = compile("a?c").unwrap();
        assert!(re.is_match("abc"));
        assert!(!re.is_match("abbc"));
    }

    #[test]
    fn char_class_and_negation() {
        let re = compile("file[0-9].txt").unwrap();
        assert!(re.is_match("file1.txt"));
        assert!(!re.is_match("filea.txt"));

        let re = compile("file[!0-9].txt").unwrap();
        assert!(re.is_match("filea.txt"));
        assert!(!re.is_match("file1.txt"));
    }

    #[test]
    fn empty_pattern_set_matches_all() {
        assert!(any_matches(&[], "whatever"));
    }
}
