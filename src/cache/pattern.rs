//! Key Pattern Module
//!
//! Patterns used by invalidation. Three forms are recognised:
//!
//! - exact key: `"user:1"`
//! - prefix: `"user:*"` (a single trailing `*`)
//! - glob: any other pattern containing `*` (any run of characters, including
//!   none) or `?` (exactly one character)
//!
//! There are no escapes or character classes. Matching is case-sensitive and
//! always covers the full key.

use std::fmt;

// == Key Pattern ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Exact(String),
    Prefix(String),
    Glob(Vec<char>),
}

impl KeyPattern {
    // == Parse ==
    /// Classifies a pattern string. Every string is a valid pattern.
    pub fn parse(pattern: &str) -> Self {
        let wildcards = pattern.chars().filter(|c| *c == '*' || *c == '?').count();

        match pattern.strip_suffix('*') {
            _ if wildcards == 0 => KeyPattern::Exact(pattern.to_string()),
            Some(prefix) if wildcards == 1 => KeyPattern::Prefix(prefix.to_string()),
            _ => KeyPattern::Glob(pattern.chars().collect()),
        }
    }

    // == Matches ==
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => key == exact,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Glob(pattern) => {
                let text: Vec<char> = key.chars().collect();
                glob_match(pattern, &text)
            }
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(exact) => write!(f, "{exact}"),
            KeyPattern::Prefix(prefix) => write!(f, "{prefix}*"),
            KeyPattern::Glob(pattern) => write!(f, "{}", pattern.iter().collect::<String>()),
        }
    }
}

/// Iterative wildcard match with single-star backtracking.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it currently absorbs up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(KeyPattern::parse("user:1"), KeyPattern::Exact("user:1".into()));
        assert_eq!(KeyPattern::parse("user:*"), KeyPattern::Prefix("user:".into()));
        assert!(matches!(KeyPattern::parse("*:1"), KeyPattern::Glob(_)));
        assert!(matches!(KeyPattern::parse("user:?"), KeyPattern::Glob(_)));
        assert!(matches!(KeyPattern::parse("a**"), KeyPattern::Glob(_)));
    }

    #[test]
    fn test_exact_match() {
        let pattern = KeyPattern::parse("user:1");
        assert!(pattern.matches("user:1"));
        assert!(!pattern.matches("user:10"));
        assert!(!pattern.matches("USER:1"));
    }

    #[test]
    fn test_prefix_match() {
        let pattern = KeyPattern::parse("user:*");
        assert!(pattern.matches("user:"));
        assert!(pattern.matches("user:1"));
        assert!(pattern.matches("user:1/profile"));
        assert!(!pattern.matches("users:1"));
    }

    #[test]
    fn test_glob_star() {
        let pattern = KeyPattern::parse("template:*:html");
        assert!(pattern.matches("template:index:html"));
        assert!(pattern.matches("template::html"));
        assert!(pattern.matches("template:a:b:html"));
        assert!(!pattern.matches("template:index:htm"));
    }

    #[test]
    fn test_glob_question_mark() {
        let pattern = KeyPattern::parse("page-?");
        assert!(pattern.matches("page-1"));
        assert!(!pattern.matches("page-"));
        assert!(!pattern.matches("page-12"));
    }

    #[test]
    fn test_glob_backtracking() {
        let pattern = KeyPattern::parse("*ab*ab");
        assert!(pattern.matches("abab"));
        assert!(pattern.matches("xxabyyabab"));
        assert!(!pattern.matches("abba"));
    }

    #[test]
    fn test_star_matches_everything() {
        let pattern = KeyPattern::parse("*");
        assert!(pattern.matches(""));
        assert!(pattern.matches("anything at all"));
    }

    #[test]
    fn test_multibyte_keys() {
        let pattern = KeyPattern::parse("caf?");
        assert!(pattern.matches("café"));
    }

    #[test]
    fn test_display_round_trips_source() {
        for source in ["user:1", "user:*", "a?b*c"] {
            assert_eq!(KeyPattern::parse(source).to_string(), source);
        }
    }
}
