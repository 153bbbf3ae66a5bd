//! Character-counted string helpers.
//!
//! All length limits in sitewatch (chunk sizes, previews, prompt context)
//! count Unicode scalar values, never bytes, so slicing must go through
//! these helpers to stay on char boundaries.

/// Number of chars in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `max` chars of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// The last `max` chars of `s`.
pub fn tail_chars(s: &str, max: usize) -> &str {
    let len = char_len(s);
    if len <= max {
        return s;
    }
    match s.char_indices().nth(len - max) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("hi", 5), "hi");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(char_len("héllo"), 5);
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail_chars("hello world", 5), "world");
        assert_eq!(tail_chars("ab", 5), "ab");
        assert_eq!(tail_chars("naïve", 3), "ïve");
    }
}
