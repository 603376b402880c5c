//! Collision-free naming within a download directory.

use super::sanitize::MAX_NAME_BYTES;

/// Return `candidate`, or `stem (n).ext` with the smallest `n >= 1` that `taken` rejects.
pub fn unique_filename(candidate: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(candidate) {
        return candidate.to_string();
    }
    let (stem, ext) = split_extension(candidate);
    (1u32..)
        .map(|n| numbered(stem, n, ext))
        .find(|name| !taken(name))
        .unwrap_or_else(|| candidate.to_string())
}

/// `stem (n).ext`, with the stem shortened when the result would not fit.
fn numbered(stem: &str, n: u32, ext: &str) -> String {
    let tag = format!(" ({n}){ext}");
    let mut end = stem.len().min(MAX_NAME_BYTES.saturating_sub(tag.len()));
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{tag}", &stem[..end])
}

/// `archive.tar.gz` splits as (`archive.tar`, `.gz`); dotfiles keep their name as the stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
