use regex::Regex;
use std::sync::OnceLock;

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[\s\-()]").unwrap())
}

fn russian_number() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    // Mobile (9xx) and geographic (3xx, 4xx, 8xx) ranges.
    NUMBER.get_or_init(|| Regex::new(r"^(?:\+7|7|8)?([3489]\d{9})$").unwrap())
}

/// Parses a phone number typed by the user and normalizes it to E.164
/// (`+7XXXXXXXXXX`). Returns `None` when the input is not a Russian number.
pub fn normalize_phone(input: &str) -> Option<String> {
    let compact = separators().replace_all(input.trim(), "");
    russian_number()
        .captures(&compact)
        .map(|captures| format!("+7{}", &captures[1]))
}
