//! URL validation and filename derivation for HTTP tasks.

mod sanitize;
mod unique;

pub use sanitize::sanitize_filename;
pub use unique::unique_filename;

use url::Url;

/// Schemes the HTTP engine can transfer.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ftp"];

/// Parse and validate a download URL.
pub fn parse_download_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("invalid URL {raw:?}: {e}"))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(format!("unsupported URL scheme: {}", url.scheme()));
    }
    Ok(url)
}

/// Last non-empty path segment of `url`, if any.
pub fn last_path_segment(url: &Url) -> Option<&str> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .filter(|s| *s != "." && *s != "..")
}

/// Local filename for a download of `url` created at `created_millis`.
///
/// Uses the sanitized last path segment, falling back to `download-<created_millis>`.
pub fn filename_for_url(url: &Url, created_millis: u64) -> String {
    last_path_segment(url)
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("download-{created_millis}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> String {
        filename_for_url(&parse_download_url(raw).unwrap(), 1700000000000)
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(name("https://example.com/archive.zip"), "archive.zip");
        assert_eq!(name("https://cdn.example.com/path/to/debian-12.iso"), "debian-12.iso");
        assert_eq!(name("https://example.com/file.zip?token=abc"), "file.zip");
        assert_eq!(name("ftp://mirror.example.org/pub/ls-lR.gz"), "ls-lR.gz");
    }

    #[test]
    fn filename_falls_back_to_timestamp() {
        assert_eq!(name("https://example.com/"), "download-1700000000000");
        assert_eq!(name("https://example.com"), "download-1700000000000");
        assert_eq!(name("https://example.com/..."), "download-1700000000000");
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(parse_download_url("not a url").is_err());
        let err = parse_download_url("file:///etc/passwd").unwrap_err();
        assert!(err.contains("unsupported URL scheme"));
        assert!(parse_download_url("magnet:?xt=urn:btih:abc").is_err());
    }
}
