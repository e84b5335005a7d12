use once_cell::sync::Lazy;
use regex::Regex;

pub const RECORD_EXTENSION: &str = "json";
const MAX_KEY_CHARS: usize = 100;
const FALLBACK_KEY: &str = "untitled";

static FORBIDDEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("forbidden character class compiles")
});
static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace class compiles"));

/// Returns true when `name` contains a character that may not appear in a
/// file or folder name.
pub fn has_forbidden_chars(name: &str) -> bool {
    FORBIDDEN.is_match(name)
}

/// Derives the filesystem-safe storage key for a note title.
///
/// Forbidden and control characters become `_`, whitespace runs collapse to
/// a single `_`, and the result is lower-cased and capped at 100 characters.
pub fn derive_key(title: &str) -> String {
    let replaced = FORBIDDEN.replace_all(title.trim(), "_");
    let collapsed = WHITESPACE_RUN.replace_all(&replaced, "_");
    // Lower-case before capping: some characters grow when lowered.
    let key: String = collapsed.to_lowercase().chars().take(MAX_KEY_CHARS).collect();
    if key.is_empty() {
        FALLBACK_KEY.to_string()
    } else {
        key
    }
}

pub fn record_file_name(title: &str) -> String {
    format!("{}.{RECORD_EXTENSION}", derive_key(title))
}
