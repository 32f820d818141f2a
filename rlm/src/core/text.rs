//! Character-boundary truncation for observations and stored trace text.

/// Keep at most `limit` characters of `text`.
///
/// When characters are dropped, a `[truncated N chars]` notice is appended on
/// its own line so the model can tell the observation is partial.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        None => text.to_string(),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            let mut out = String::with_capacity(cut + 32);
            out.push_str(&text[..cut]);
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("[truncated {dropped} chars]"));
            out
        }
    }
}

/// Like [`truncate_chars`], for optional fields.
pub fn truncate_opt(text: Option<&str>, limit: usize) -> Option<String> {
    text.map(|t| truncate_chars(t, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_chars("beta", 800), "beta");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn long_text_gets_a_notice() {
        let out = truncate_chars("abcdefghij", 4);
        assert_eq!(out, "abcd\n[truncated 6 chars]");
    }

    #[test]
    fn cuts_on_char_boundaries() {
        let out = truncate_chars("héllo wörld", 2);
        assert!(out.starts_with("hé\n"));
        assert!(out.ends_with("[truncated 9 chars]"));
    }

    #[test]
    fn exact_length_is_not_truncated() {
        assert_eq!(truncate_chars("abcd", 4), "abcd");
    }
}
