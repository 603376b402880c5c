use super::{TaskHeader, TaskStatus};
use crate::storage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One HTTP(S)/FTP download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTask {
    #[serde(flatten)]
    pub header: TaskHeader,
    pub url: String,
    /// Final file name inside `directory`.
    pub filename: String,
    /// Server advertised byte ranges on the last response.
    #[serde(default)]
    pub resumable: bool,
}

impl HttpTask {
    /// New `pending` record.
    pub fn new(url: impl Into<String>, filename: impl Into<String>, directory: PathBuf) -> Self {
        Self {
            header: TaskHeader::new(directory, TaskStatus::Pending),
            url: url.into(),
            filename: filename.into(),
            resumable: false,
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.header.directory.join(&self.filename)
    }

    /// In-progress artifact: `<filename>.tmp` next to the target.
    pub fn temp_path(&self) -> PathBuf {
        storage::temp_path(&self.target_path())
    }
}
