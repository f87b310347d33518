//! Field/tag sanitisation rules shared by TSWriter and NewsStore.

const FIELD_MAX_LEN: usize = 10_000;
const OBJECT_METADATA_MAX_LEN: usize = 200;
const TAG_MAX_LEN: usize = 256;

/// String field values: control characters become a space, length capped.
pub fn sanitize_field(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    truncate_chars(&cleaned, max_len)
}

pub fn sanitize_general_field(value: &str) -> String {
    sanitize_field(value, FIELD_MAX_LEN)
}

pub fn sanitize_object_metadata(value: &str) -> String {
    // Object-store metadata headers must be ASCII; non-ASCII bytes are
    // dropped rather than escaped.
    let ascii_only: String = value.chars().filter(|c| c.is_ascii()).collect();
    sanitize_field(&ascii_only, OBJECT_METADATA_MAX_LEN)
}

/// Tag values: strip backslashes, replace `, = <space> newline CR` with
/// `_`, length capped 256.
pub fn sanitize_tag(value: &str) -> String {
    let no_backslash: String = value.chars().filter(|&c| c != '\\').collect();
    let replaced: String = no_backslash
        .chars()
        .map(|c| match c {
            ',' | '=' | ' ' | '\n' | '\r' => '_',
            other => other,
        })
        .collect();
    truncate_chars(&replaced, TAG_MAX_LEN)
}

fn truncate_chars(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else {
        value.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_chars_become_space() {
        assert_eq!(sanitize_general_field("a\u{0007}b"), "a b");
    }

    #[test]
    fn tag_strips_backslash_and_replaces_reserved_chars() {
        assert_eq!(sanitize_tag("foo\\bar, baz=qux"), "foobar__baz_qux");
    }

    #[test]
    fn field_is_capped_at_ten_thousand_chars() {
        let long = "x".repeat(10_050);
        assert_eq!(sanitize_general_field(&long).chars().count(), 10_000);
    }

    #[test]
    fn object_metadata_capped_at_two_hundred_and_ascii_only() {
        let value = format!("{}\u{1F600}", "y".repeat(250));
        let sanitized = sanitize_object_metadata(&value);
        assert_eq!(sanitized.chars().count(), 200);
        assert!(sanitized.is_ascii());
    }
}
