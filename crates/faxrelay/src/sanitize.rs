//! Helpers for keeping log fields and span attributes free of full paths
//! and credentials.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks the local part of an email address: `ops@example.com` -> `o***@example.com`.
pub fn redact_email(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Truncates a response body so vendor error payloads cannot flood the log.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        let head: String = body.chars().take(max_chars).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(&PathBuf::from("/mnt/nas/fax/2026/scan_0001.tif")),
            "scan_0001.tif"
        );
    }

    #[test]
    fn test_redact_path_without_filename() {
        assert_eq!(redact_path(&PathBuf::from("/")), "<unknown>");
    }

    #[test]
    fn test_redact_email() {
        assert_eq!(redact_email("ops@example.com"), "o***@example.com");
        assert_eq!(redact_email("not-an-address"), "***");
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        assert_eq!(truncate_body("short", 10), "short");
        assert_eq!(truncate_body("日本語のテキスト", 3), "日本語... (truncated)");
    }
}
