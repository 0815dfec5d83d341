//! Free-text label canonicalization.
//!
//! [`clean_label`] keeps the original casing and is what gets stored or
//! displayed. [`normalize_label`] is the comparison form.

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('\u{201c}', '\u{201d}'),
    ('\u{2018}', '\u{2019}'),
];

/// Values that mean "nothing here" in exported data.
const PLACEHOLDERS: &[&str] = &["", "none", "null"];

/// Trim, strip one pair of enclosing quotes, collapse whitespace runs.
pub fn clean_label(raw: &str) -> String {
    let unquoted = strip_enclosing_quotes(raw.trim());
    unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison form: [`clean_label`] lower-cased.
pub fn normalize_label(raw: &str) -> String {
    clean_label(raw).to_lowercase()
}

pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize_label).unwrap_or_default()
}

pub fn labels_equal(a: &str, b: &str) -> bool {
    normalize_label(a) == normalize_label(b)
}

pub fn is_placeholder(value: Option<&str>) -> bool {
    let normalized = normalize_opt(value);
    PLACEHOLDERS.contains(&normalized.as_str())
}

fn strip_enclosing_quotes(value: &str) -> &str {
    let mut chars = value.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return value;
    };
    for &(open, close) in QUOTE_PAIRS {
        if first == open && last == close {
            return &value[open.len_utf8()..value.len() - close.len_utf8()];
        }
    }
    value
}
