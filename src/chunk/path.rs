//! Filesystem path sanitization.
//!
//! Any `upload_id` or extension that reaches a filesystem path arrives from
//! an untrusted client; sanitize before use and reject empty results.

/// Strips path separators, null bytes, `..`, and anything outside
/// `[A-Za-z0-9_-]`. An empty result is the caller's signal to reject the
/// request with `InvalidUploadId`.
pub fn sanitize_upload_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Same idea as [`sanitize_upload_id`] but restricted to alphanumerics and
/// capped at 10 characters — long enough for any real extension, short
/// enough to bound a malicious one.
pub fn sanitize_ext(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(10)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_traversal_and_separators() {
        assert_eq!(sanitize_upload_id("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_upload_id("a/b\\c"), "abc");
    }

    #[test]
    fn strips_null_bytes() {
        assert_eq!(sanitize_upload_id("abc\0def"), "abcdef");
    }

    #[test]
    fn pure_traversal_sanitizes_to_empty() {
        assert_eq!(sanitize_upload_id("../.."), "");
    }

    #[test]
    fn preserves_well_formed_hex_ids() {
        let id = "a".repeat(64);
        assert_eq!(sanitize_upload_id(&id), id);
    }

    #[test]
    fn extension_is_capped_at_ten_chars() {
        assert_eq!(sanitize_ext("tar.gz.backup.extra"), "targzbacku");
        assert_eq!(sanitize_ext("pdf"), "pdf");
        assert_eq!(sanitize_ext("../evil"), "evil");
    }
}
