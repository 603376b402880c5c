//! Sequential writer for a single transfer's temp file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Append-only writer for `<filename>.tmp`.
pub struct TempWriter {
    file: File,
}

impl TempWriter {
    /// Open the temp file for a transfer starting at `offset`.
    ///
    /// With `offset == 0` the file is created or truncated. Otherwise the file is
    /// cut to exactly `offset` bytes and opened for appending.
    pub fn open(temp_path: &Path, offset: u64) -> io::Result<Self> {
        let file = if offset == 0 {
            File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(temp_path)?
        } else {
            let file = OpenOptions::new().create(true).append(true).open(temp_path)?;
            file.set_len(offset)?;
            file
        };
        Ok(Self { file })
    }

    /// Drop everything written so far; later appends start at byte 0.
    pub fn restart(&mut self) -> io::Result<()> {
        self.file.set_len(0)
    }

    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    /// Flush and sync to disk, closing the file.
    pub fn close(mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resume_cuts_file_to_offset_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.tmp");
        fs::write(&path, b"0123456789").unwrap();

        let mut w = TempWriter::open(&path, 4).unwrap();
        w.append(b"abc").unwrap();
        w.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"0123abc");
    }

    #[test]
    fn restart_discards_previous_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.tmp");
        fs::write(&path, b"stale").unwrap();

        let mut w = TempWriter::open(&path, 5).unwrap();
        w.restart().unwrap();
        w.append(b"fresh body").unwrap();
        w.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fresh body");
    }

    #[test]
    fn zero_offset_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.tmp");
        fs::write(&path, b"old contents").unwrap();

        let mut w = TempWriter::open(&path, 0).unwrap();
        w.append(b"new").unwrap();
        w.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }
}
