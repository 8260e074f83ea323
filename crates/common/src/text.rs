//! Whitespace helpers shared by capture and diffing

/// Collapse every run of whitespace to a single space and trim both ends.
pub fn normalize_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for word in input.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Number of whitespace-separated words.
pub fn word_count(input: &str) -> usize {
    input.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  Buy \n\t now   $10 "), "Buy now $10");
        assert_eq!(normalize_whitespace("\n\n"), "");
        assert_eq!(normalize_whitespace("single"), "single");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  a  b\nc "), 3);
    }
}
