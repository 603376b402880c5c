//! Launcher that records requests instead of starting transfers.

use super::{Launcher, TransferRequest};
use std::sync::{Arc, Mutex};

#[derive(Default, Clone)]
pub(crate) struct RecordingLauncher {
    launched: Arc<Mutex<Vec<TransferRequest>>>,
}

impl RecordingLauncher {
    pub(crate) fn requests(&self) -> Vec<TransferRequest> {
        self.launched.lock().unwrap().clone()
    }

    /// Most recent request for the transfer writing to `temp_name`.
    pub(crate) fn last_for(&self, temp_name: &str) -> TransferRequest {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.temp_path.file_name().and_then(|n| n.to_str()) == Some(temp_name))
            .unwrap_or_else(|| panic!("no transfer launched for {temp_name}"))
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, request: TransferRequest) {
        self.launched.lock().unwrap().push(request);
    }
}
