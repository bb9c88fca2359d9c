//! Operation text normalization.
//!
//! Recorded operations may carry SQL text or keys with literal values. To
//! group recurring operations, literals are replaced with `?` and runs of
//! whitespace are collapsed.

use regex::Regex;
use std::sync::OnceLock;

struct Normalizers {
    quoted: Regex,
    uuid: Regex,
    number: Regex,
    in_list: Regex,
    whitespace: Regex,
}

fn normalizers() -> &'static Normalizers {
    static NORMALIZERS: OnceLock<Normalizers> = OnceLock::new();
    NORMALIZERS.get_or_init(|| Normalizers {
        quoted: Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*""#).expect("valid quoted literal regex"),
        uuid: Regex::new(
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        )
        .expect("valid uuid regex"),
        number: Regex::new(r"\b\d+(?:\.\d+)?\b").expect("valid number regex"),
        in_list: Regex::new(r"(?i)\bIN\s*\(\s*\?(?:\s*,\s*\?)*\s*\)").expect("valid IN list regex"),
        whitespace: Regex::new(r"\s+").expect("valid whitespace regex"),
    })
}

/// Replaces literals in `operation` with placeholders.
pub fn normalize_operation(operation: &str) -> String {
    let n = normalizers();
    let text = n.quoted.replace_all(operation, "?");
    let text = n.uuid.replace_all(&text, "?");
    let text = n.number.replace_all(&text, "?");
    let text = n.in_list.replace_all(&text, "IN (?)");
    n.whitespace.replace_all(text.trim(), " ").into_owned()
}
