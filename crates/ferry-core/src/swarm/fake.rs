//! In-memory swarm client for engine and service tests.

use super::{SwarmClient, SwarmError, SwarmSink, SwarmSource, SwarmStats};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    adds: Vec<(SwarmSource, PathBuf, SwarmSink)>,
    tracked: HashMap<String, SwarmStats>,
    removed: Vec<(String, bool)>,
    reject: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeSwarm {
    state: Mutex<State>,
}

impl FakeSwarm {
    pub(crate) fn reject_adds(&self, message: &str) {
        self.state.lock().unwrap().reject = Some(message.to_string());
    }

    pub(crate) fn add_count(&self) -> usize {
        self.state.lock().unwrap().adds.len()
    }

    pub(crate) fn last_add(&self) -> (SwarmSource, PathBuf, SwarmSink) {
        self.state
            .lock()
            .unwrap()
            .adds
            .last()
            .cloned()
            .expect("no source was added")
    }

    pub(crate) fn last_sink(&self) -> SwarmSink {
        self.last_add().2
    }

    /// Pretend the client now tracks `info_hash` with these metrics.
    pub(crate) fn track(&self, info_hash: &str, stats: SwarmStats) {
        self.state
            .lock()
            .unwrap()
            .tracked
            .insert(info_hash.to_string(), stats);
    }

    pub(crate) fn is_tracked(&self, info_hash: &str) -> bool {
        self.state.lock().unwrap().tracked.contains_key(info_hash)
    }

    pub(crate) fn removed(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl SwarmClient for FakeSwarm {
    fn add(
        &self,
        source: &SwarmSource,
        directory: &Path,
        sink: SwarmSink,
    ) -> Result<(), SwarmError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.reject {
            return Err(SwarmError::new(message.clone()));
        }
        state
            .adds
            .push((source.clone(), directory.to_path_buf(), sink));
        Ok(())
    }

    fn get(&self, info_hash: &str) -> Option<SwarmStats> {
        self.state.lock().unwrap().tracked.get(info_hash).cloned()
    }

    fn remove(&self, info_hash: &str, destroy_store: bool) -> Result<(), SwarmError> {
        let mut state = self.state.lock().unwrap();
        state.tracked.remove(info_hash);
        state.removed.push((info_hash.to_string(), destroy_store));
        Ok(())
    }
}
