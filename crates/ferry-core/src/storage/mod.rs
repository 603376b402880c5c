//! Disk I/O and file lifecycle for download artifacts.
//!
//! Payload bytes are appended to `<filename>.tmp`; on success the temp file is
//! renamed onto the final name. Cancelled transfers remove the temp file.

mod writer;

pub use writer::TempWriter;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Temporary file suffix used before the final rename.
pub const TEMP_SUFFIX: &str = ".tmp";

/// `dir/name.ext` -> `dir/name.ext.tmp`.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Length of an artifact on disk, `None` if it does not exist.
pub fn artifact_len(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

/// Rename the finished temp file onto `target`.
pub fn finalize(temp: &Path, target: &Path) -> io::Result<()> {
    fs::rename(temp, target)
}

/// Remove a leftover file. Missing files are not an error; returns whether something was removed.
pub fn remove_artifact(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove downloaded content that may be a single file or a directory tree.
pub fn remove_content(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|_| true),
        Ok(_) => fs::remove_file(path).map(|_| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
