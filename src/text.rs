//! Text normalization helpers shared across the pipeline.
//!
//! Everything here is deterministic string manipulation: speaker-cue
//! normalization, slug generation, display-name casing, and snippet
//! truncation. The rules are intentionally lossy and many-to-one
//! (e.g. "FRANK V/O (CONT'D)" and "FRANK" normalize identically);
//! raw text is always preserved elsewhere for audit.

use std::sync::OnceLock;

use regex::Regex;

/// Delivery-modifier tokens stripped from speaker cues before matching.
fn modifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bV/O\b|\bO/S\b|\bO\.S\.\b|\bO/C\b|\bO\.C\.\b|\bPRE-LAP\b")
            .expect("modifier regex")
    })
}

fn parens_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)").expect("parens regex"))
}

fn non_alnum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("non-alnum regex"))
}

fn roman_numeral_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[IVX]+$").expect("roman numeral regex"))
}

/// Tokens kept fully uppercase when deriving display names from cues.
const ACRONYM_TOKENS: [&str; 6] = ["FBI", "TV", "USA", "US", "DC", "PA"];

/// Replace curly apostrophes with ASCII so pattern matching sees one form.
pub fn normalize_apostrophes(text: &str) -> String {
    text.replace('\u{2019}', "'").replace('\u{2018}', "'")
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a speaker cue or alias for matching: ASCII apostrophes,
/// delivery modifiers stripped, parentheticals removed, whitespace
/// collapsed, uppercased.
pub fn normalize_alias_text(raw: &str) -> String {
    let text = normalize_apostrophes(raw);
    let text = modifier_re().replace_all(text.trim(), "");
    let text = parens_re().replace_all(&text, "");
    collapse_whitespace(&text).to_uppercase()
}

/// Lowercase slug with non-alphanumeric runs collapsed to underscores.
/// Empty input slugs to "unknown".
pub fn slugify(text: &str) -> String {
    let lowered = normalize_apostrophes(text).to_lowercase();
    let slug = non_alnum_re().replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

/// Derive a human-readable display name from an uppercased cue.
///
/// Title-cases each token except Roman numerals, known acronyms, and
/// single-letter initials ("J." stays "J.").
pub fn display_name_from_cue(base: &str) -> String {
    let mut titled: Vec<String> = Vec::new();
    for token in base.split_whitespace() {
        let token_clean = token.trim_matches(|c| c == '.' || c == ',');
        if roman_numeral_re().is_match(token_clean) {
            titled.push(token.to_string());
            continue;
        }
        if ACRONYM_TOKENS.contains(&token_clean) {
            titled.push(token.to_string());
            continue;
        }
        if token.ends_with('.') && token_clean.len() == 1 && token_clean.chars().all(char::is_alphabetic) {
            titled.push(token.to_uppercase());
            continue;
        }
        titled.push(capitalize(&token.to_lowercase()));
    }
    titled.join(" ")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Whitespace-collapsed excerpt bounded to `max_len` characters with a
/// trailing ellipsis when truncated. Never returns the full text of
/// long blocks; artifacts stay bounded.
pub fn truncate_snippet(text: &str, max_len: usize) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    let keep = max_len.saturating_sub(3);
    let truncated: String = collapsed.chars().take(keep).collect();
    format!("{}...", truncated.trim_end())
}

/// Case-insensitive substring check against an already-lowercased haystack.
pub fn text_has_any(lower: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| lower.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_alias_text_strips_modifiers() {
        assert_eq!(normalize_alias_text("FRANK V/O (CONT'D)"), "FRANK");
        assert_eq!(normalize_alias_text("russell  bufalino"), "RUSSELL BUFALINO");
        assert_eq!(normalize_alias_text("JIMMY PRE-LAP"), "JIMMY");
    }

    #[test]
    fn test_normalize_alias_text_curly_apostrophes() {
        assert_eq!(normalize_alias_text("O\u{2019}BRIEN"), "O'BRIEN");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("RUSSELL BUFALINO"), "russell_bufalino");
        assert_eq!(slugify("  --  "), "unknown");
        assert_eq!(slugify("Local 107!"), "local_107");
    }

    #[test]
    fn test_display_name_from_cue() {
        assert_eq!(display_name_from_cue("RUSSELL BUFALINO"), "Russell Bufalino");
        assert_eq!(display_name_from_cue("FBI AGENT"), "FBI Agent");
        assert_eq!(display_name_from_cue("E. HOWARD HUNT"), "E. Howard Hunt");
        assert_eq!(display_name_from_cue("POPE JOHN XXIII"), "Pope John XXIII");
    }

    #[test]
    fn test_truncate_snippet() {
        let text = "a".repeat(300);
        let snippet = truncate_snippet(&text, 220);
        assert!(snippet.len() <= 220);
        assert!(snippet.ends_with("..."));
        assert_eq!(truncate_snippet("short  text", 220), "short text");
    }
}
