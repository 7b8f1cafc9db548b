//! Validation of user supplied regular expressions.
//!
//! The `regex` crate already matches in linear time; these checks reject
//! patterns whose shape indicates catastrophic backtracking in other engines
//! so that specifications stay portable, and bound compiled program size.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

pub const MAX_PATTERN_LENGTH: usize = 500;
const COMPILED_SIZE_LIMIT: usize = 1 << 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("Pattern is too long ({0} characters, limit {max})", max = MAX_PATTERN_LENGTH)]
    TooLong(usize),
    #[error("Pattern contains nested quantifiers")]
    NestedQuantifier,
    #[error("Pattern quantifies an alternation")]
    QuantifiedAlternation,
    #[error("Pattern does not compile: {0}")]
    Invalid(String),
}

pub fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    let length = pattern.chars().count();
    if length > MAX_PATTERN_LENGTH {
        return Err(PatternError::TooLong(length));
    }
    check_groups(pattern)
}

/// What a group contains, at any depth.
#[derive(Default)]
struct Group {
    quantifier: bool,
    alternation: bool,
}

/// Length of an unbounded quantifier (`+`, `*`, `{n,}`, `{n,m}`) at the
/// start of `rest`.
fn quantifier_at(rest: &[char]) -> Option<usize> {
    match rest.first()? {
        '+' | '*' => Some(1),
        '{' => {
            let close = rest.iter().position(|c| *c == '}')?;
            let body: String = rest[1..close].iter().collect();
            let (min, max) = body.split_once(',')?;
            let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
            (!min.is_empty() && digits(min) && digits(max)).then_some(close + 1)
        }
        _ => None,
    }
}

/// Rejects a quantified group that holds a quantifier or an alternation at
/// any nesting depth, like `(a+)+`, `((a+))+` or `((a|b))*`.
fn check_groups(pattern: &str) -> Result<(), PatternError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut groups = vec![Group::default()];
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                i += 1;
                if chars.get(i) == Some(&'^') {
                    i += 1;
                }
                if chars.get(i) == Some(&']') {
                    i += 1;
                }
                while i < chars.len() && chars[i] != ']' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            '(' => groups.push(Group::default()),
            ')' if groups.len() > 1 => {
                let group = groups.pop().unwrap_or_default();
                let quantified = quantifier_at(&chars[i + 1..]).is_some();
                if quantified && group.quantifier {
                    return Err(PatternError::NestedQuantifier);
                }
                if quantified && group.alternation {
                    return Err(PatternError::QuantifiedAlternation);
                }
                if let Some(parent) = groups.last_mut() {
                    parent.quantifier |= group.quantifier || quantified;
                    parent.alternation |= group.alternation;
                }
            }
            '|' => {
                if let Some(group) = groups.last_mut() {
                    group.alternation = true;
                }
            }
            _ => {
                if let Some(len) = quantifier_at(&chars[i..]) {
                    if let Some(group) = groups.last_mut() {
                        group.quantifier = true;
                    }
                    i += len - 1;
                }
            }
        }
        i += 1;
    }
    Ok(())
}

pub fn compile_pattern(pattern: &str, case_insensitive: bool) -> Result<Regex, PatternError> {
    validate_pattern(pattern)?;
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(COMPILED_SIZE_LIMIT)
        .build()
        .map_err(|e| PatternError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ordinary_patterns() {
        assert!(compile_pattern(r"^\d{3}-\d{4}$", false).is_ok());
        assert!(compile_pattern(r"(foo|bar)baz", false).is_ok());
        assert!(compile_pattern(r"a+b*", false).is_ok());
        assert!(compile_pattern(r"\(a+\)+", false).is_ok());
    }

    #[test]
    fn test_rejects_dangerous_shapes() {
        assert_eq!(validate_pattern("(a+)+"), Err(PatternError::NestedQuantifier));
        assert_eq!(validate_pattern("(a*)*b"), Err(PatternError::NestedQuantifier));
        assert_eq!(validate_pattern("(x{2,})+"), Err(PatternError::NestedQuantifier));
        assert_eq!(
            validate_pattern("(a|b)*"),
            Err(PatternError::QuantifiedAlternation)
        );
        assert_eq!(validate_pattern(&"a".repeat(501)), Err(PatternError::TooLong(501)));
    }

    #[test]
    fn test_nested_groups_are_checked_at_depth() {
        assert_eq!(validate_pattern("((a+))+"), Err(PatternError::NestedQuantifier));
        assert_eq!(validate_pattern("(?:(?:x*)y)+"), Err(PatternError::NestedQuantifier));
        assert_eq!(
            validate_pattern("((a|b))*"),
            Err(PatternError::QuantifiedAlternation)
        );
        assert_eq!(validate_pattern("((ab)c)d+"), Ok(()));
        assert_eq!(validate_pattern("(a[+|]b)+"), Ok(()));
        assert_eq!(validate_pattern("(a{2})+"), Ok(()));
    }

    #[test]
    fn test_rejects_uncompilable() {
        assert!(matches!(
            compile_pattern("[unclosed", false),
            Err(PatternError::Invalid(_))
        ));
    }
}
