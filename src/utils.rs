//! String helpers for error messages and terminal display
//!
//! Response bodies end up in error messages and secrets end up on screen
//! during login; both go through these helpers first.

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes.
///
/// # Example
/// ```
/// use spacectl::utils::safe_truncate;
///
/// // 'é' is 2 bytes - truncating at byte 4 would cut it in half
/// assert_eq!(safe_truncate("Café", 4), "Caf");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a string for an error message, noting the original size.
///
/// # Example
/// ```
/// use spacectl::utils::truncate_for_display;
///
/// assert_eq!(truncate_for_display("short", 10), "short");
/// assert_eq!(
///     truncate_for_display("This is a long message", 10),
///     "This is a ... (22 bytes total)"
/// );
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}... ({} bytes total)", s.len())
    } else {
        truncated.to_string()
    }
}

/// Mask a secret for display, keeping a short recognizable prefix.
///
/// # Example
/// ```
/// use spacectl::utils::mask_secret;
///
/// assert_eq!(mask_secret("01HZX4Q9ABCDEF"), "01HZ**********");
/// assert_eq!(mask_secret("abc"), "***");
/// ```
#[must_use]
pub fn mask_secret(s: &str) -> String {
    const VISIBLE: usize = 4;

    let count = s.chars().count();
    if count <= VISIBLE * 2 {
        return "*".repeat(count);
    }

    let prefix: String = s.chars().take(VISIBLE).collect();
    format!("{prefix}{}", "*".repeat(count - VISIBLE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_ascii() {
        let text = "Hello, World!";
        assert_eq!(safe_truncate(text, 7), "Hello, ");
        assert_eq!(safe_truncate(text, 100), text);
        assert_eq!(safe_truncate(text, 0), "");
    }

    #[test]
    fn test_safe_truncate_multibyte() {
        // Chinese characters are 3 bytes each
        let text = "你好世界";
        assert_eq!(safe_truncate(text, 4), "你");
        assert_eq!(safe_truncate(text, 6), "你好");
    }

    #[test]
    fn test_truncate_for_display_emoji() {
        let text = "Hello 🌍 World";
        assert_eq!(truncate_for_display(text, 7), "Hello ... (16 bytes total)");
    }

    #[test]
    fn test_mask_secret_unicode() {
        assert_eq!(mask_secret("ключ-секрет-123"), "ключ***********");
        assert_eq!(mask_secret(""), "");
    }
}
