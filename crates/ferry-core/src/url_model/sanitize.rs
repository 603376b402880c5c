//! Linux-safe filename sanitization.

use crate::storage::TEMP_SUFFIX;

/// Linux NAME_MAX less room for the temp suffix, so `<name>.tmp` still fits.
pub(crate) const MAX_NAME_BYTES: usize = 255 - TEMP_SUFFIX.len();

fn is_forbidden(c: char) -> bool {
    c == '/' || c == '\\' || c == '\0' || c.is_control()
}

/// Make a candidate filename safe to create on Linux.
///
/// Forbidden characters (`/`, `\`, NUL, control characters) become `_`,
/// surrounding dots and whitespace are trimmed, and the result is cut on a
/// character boundary so the name plus `.tmp` fits in 255 bytes. May return
/// an empty string.
pub fn sanitize_filename(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());

    let mut end = trimmed.len().min(MAX_NAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
