use std::sync::LazyLock;

use regex::Regex;

use crate::{error::Rejection, models::MAX_MANIFESTO_CHARS};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));
static USERNAME_JUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_.-]").expect("static regex"));

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MIN_PASSWORD_CHARS: usize = 6;
pub const MAX_NAME_CHARS: usize = 100;

/// Trims and collapses inner whitespace runs to one space.
pub fn collapse(input: &str) -> String {
    WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

/// Lowercase, no spaces, only `[a-z0-9_.-]`.
pub fn sanitize_username(input: &str) -> String {
    let lowered = collapse(input).to_lowercase().replace(' ', "_");

    USERNAME_JUNK.replace_all(&lowered, "").into_owned()
}

pub fn required(field: &str, input: &str, max_chars: usize) -> Result<String, Rejection> {
    let value = collapse(input);

    if value.is_empty() {
        return Err(Rejection::Invalid(format!("{field} is required")));
    }
    if value.chars().count() > max_chars {
        return Err(Rejection::Invalid(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }

    Ok(value)
}

pub fn username(input: &str) -> Result<String, Rejection> {
    let value = sanitize_username(input);
    let length = value.chars().count();

    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&length) {
        return Err(Rejection::Invalid(format!(
            "username must be {MIN_USERNAME_CHARS} to {MAX_USERNAME_CHARS} characters"
        )));
    }

    Ok(value)
}

pub fn password(input: &str) -> Result<&str, Rejection> {
    if input.chars().count() < MIN_PASSWORD_CHARS {
        return Err(Rejection::Invalid(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }

    Ok(input)
}

/// Manifestos keep their line breaks, only the ends are trimmed.
pub fn manifesto(input: &str) -> Result<String, Rejection> {
    let value = input.trim();

    if value.is_empty() {
        return Err(Rejection::Invalid("manifesto is required".to_string()));
    }
    if value.chars().count() > MAX_MANIFESTO_CHARS {
        return Err(Rejection::Invalid(format!(
            "manifesto must be at most {MAX_MANIFESTO_CHARS} characters"
        )));
    }

    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse() {
        assert_eq!(collapse("   hello   "), "hello");
        assert_eq!(collapse("  multiple   spaces  "), "multiple spaces");
        assert_eq!(collapse("tabs\tand\nnewlines"), "tabs and newlines");
        assert_eq!(collapse("     "), "");
    }

    #[test]
    fn test_sanitize_username() {
        assert_eq!(sanitize_username("Alice"), "alice");
        assert_eq!(sanitize_username(" john  doe "), "john_doe");
        assert_eq!(sanitize_username("rust-lang!@#"), "rust-lang");
        assert_eq!(sanitize_username("!@#$%^&*()"), "");
    }

    #[test]
    fn test_username_bounds() {
        assert!(username("ab").is_err());
        assert!(username("!!!abc").is_ok());
        assert!(username(&"a".repeat(MAX_USERNAME_CHARS + 1)).is_err());
    }

    #[test]
    fn test_required() {
        assert_eq!(required("party", "  Green   Party ", 50).unwrap(), "Green Party");
        assert!(required("party", "   ", 50).is_err());
        assert!(required("party", "abcdef", 5).is_err());
    }

    #[test]
    fn test_manifesto_limit() {
        assert!(manifesto(&"x".repeat(MAX_MANIFESTO_CHARS)).is_ok());
        assert!(manifesto(&"x".repeat(MAX_MANIFESTO_CHARS + 1)).is_err());
        assert_eq!(manifesto("  line one\nline two  ").unwrap(), "line one\nline two");
    }
}
