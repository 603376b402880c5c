use super::{TaskHeader, TaskStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name shown for a magnet download until swarm metadata arrives.
pub const MAGNET_PLACEHOLDER_NAME: &str = "Magnet Download";

/// One torrent download, sourced from a magnet URI or a local `.torrent` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentTask {
    #[serde(flatten)]
    pub header: TaskHeader,
    #[serde(
        rename = "magnetURI",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub magnet_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub name: String,
    #[serde(default)]
    pub uploaded_bytes: u64,
    /// Bytes per second.
    #[serde(default)]
    pub download_speed: u64,
    /// Bytes per second.
    #[serde(default)]
    pub upload_speed: u64,
    /// Fraction in `[0, 1]`.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub peers: u32,
    /// Known once the swarm has resolved the metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(default)]
    pub is_seeding: bool,
}

impl TorrentTask {
    fn new(name: String, directory: PathBuf) -> Self {
        Self {
            header: TaskHeader::new(directory, TaskStatus::Pending),
            magnet_uri: None,
            file_path: None,
            name,
            uploaded_bytes: 0,
            download_speed: 0,
            upload_speed: 0,
            progress: 0.0,
            peers: 0,
            info_hash: None,
            is_seeding: false,
        }
    }

    pub fn from_magnet(uri: impl Into<String>, directory: PathBuf) -> Self {
        let mut task = Self::new(MAGNET_PLACEHOLDER_NAME.to_string(), directory);
        task.magnet_uri = Some(uri.into());
        task
    }

    /// The initial name is the file's base name without the `.torrent` extension.
    pub fn from_file(path: PathBuf, directory: PathBuf) -> Self {
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let name = match base.strip_suffix(".torrent") {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => base,
        };
        let mut task = Self::new(name, directory);
        task.file_path = Some(path);
        task
    }

    /// Still showing the magnet placeholder instead of a real name.
    pub fn has_placeholder_name(&self) -> bool {
        self.magnet_uri.is_some() && self.name == MAGNET_PLACEHOLDER_NAME
    }

    /// Zero the live swarm rates (used whenever the torrent stops moving data).
    pub fn clear_rates(&mut self) {
        self.download_speed = 0;
        self.upload_speed = 0;
        self.peers = 0;
    }
}
