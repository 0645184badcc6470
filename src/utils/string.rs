//! UTF-8 safe truncation helpers.
//!
//! Limits are counted in chars (Unicode scalar values), never bytes, so a cut
//! can't land inside a multibyte character.

use std::borrow::Cow;

/// Cut `s` to its first `max_chars` chars and append `marker`.
///
/// Returns the input unchanged (borrowed) when it already fits.
pub fn truncate_with_marker<'a>(s: &'a str, max_chars: usize, marker: &str) -> Cow<'a, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + marker.len());
            out.push_str(&s[..byte_idx]);
            out.push_str(marker);
            Cow::Owned(out)
        }
    }
}

/// Short single-line preview for log fields.
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    truncate_with_marker(&flat, max_chars, "...").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_input_is_borrowed() {
        let out = truncate_with_marker("hello", 5, "[cut]");
        assert!(matches!(out, Cow::Borrowed("hello")));
    }

    #[test]
    fn test_truncate_appends_marker() {
        let out = truncate_with_marker("hello world", 5, "... [cut]");
        assert_eq!(out, "hello... [cut]");
    }

    #[test]
    fn test_truncate_multibyte() {
        let s = "日本語のテキストです";
        let out = truncate_with_marker(s, 3, "…");
        assert_eq!(out, "日本語…");
    }

    #[test]
    fn test_preview_flattens_newlines() {
        assert_eq!(preview("a\nb\nc", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
