//! Pause/cancel plumbing: abort tokens and the per-task attempt registry.
//!
//! Each time an engine starts a task it registers a new *attempt*. Events
//! produced by a transfer carry the attempt number they were started with; once
//! the task is paused, cancelled, or restarted, its attempt is released and any
//! late events from the old transfer are recognized as stale and dropped.

use crate::task::TaskId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const RUNNING: u8 = 0;
const STOPPED: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared flag a running transfer polls; set when pause/cancel is requested.
///
/// A stopped transfer keeps its temp file. A cancelled one deletes it on exit,
/// so a late open on the transfer thread cannot leave the artifact behind.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicU8>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the transfer, keeping what it wrote.
    pub fn abort(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Stop the transfer and discard its artifact.
    pub fn cancel(&self) {
        self.0.store(CANCELLED, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire) != RUNNING
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }
}

/// Serializes the transfer threads of one task around its temp file.
///
/// A new attempt may be launched while the previous attempt's thread is still
/// finishing a write; holding the lock for the whole transfer keeps the two
/// from touching the file at the same time.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLock(Arc<Mutex<()>>);

impl ArtifactLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no other attempt of this task holds the file.
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
impl ArtifactLock {
    pub(crate) fn same_as(&self, other: &ArtifactLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Live handles of running tasks keyed by task id, tagged with attempt numbers.
#[derive(Debug)]
pub struct HandleRegistry<H> {
    entries: HashMap<TaskId, (u64, H)>,
    next_attempt: u64,
}

impl<H> Default for HandleRegistry<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_attempt: 1,
        }
    }
}

impl<H> HandleRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new attempt for `id`, replacing (and returning) any previous handle.
    pub fn register(&mut self, id: &TaskId, handle: H) -> (u64, Option<H>) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let previous = self
            .entries
            .insert(id.clone(), (attempt, handle))
            .map(|(_, h)| h);
        (attempt, previous)
    }

    /// Drop the handle for `id` regardless of attempt.
    pub fn take(&mut self, id: &TaskId) -> Option<H> {
        self.entries.remove(id).map(|(_, h)| h)
    }

    /// Drop the handle only if `attempt` is still the current one.
    pub fn release(&mut self, id: &TaskId, attempt: u64) -> Option<H> {
        if self.is_current(id, attempt) {
            self.take(id)
        } else {
            None
        }
    }

    pub fn is_current(&self, id: &TaskId, attempt: u64) -> bool {
        matches!(self.entries.get(id), Some((a, _)) if *a == attempt)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    /// Attempt number of the live handle, if any. Later attempts have larger numbers.
    pub fn attempt(&self, id: &TaskId) -> Option<u64> {
        self.entries.get(id).map(|(a, _)| *a)
    }

    /// Remove every handle, returning them with their task ids.
    pub fn drain(&mut self) -> Vec<(TaskId, H)> {
        self.entries.drain().map(|(id, (_, h))| (id, h)).collect()
    }
}

impl HandleRegistry<AbortToken> {
    /// Signal the transfer for `id` to stop and forget it.
    pub fn abort(&mut self, id: &TaskId) -> bool {
        match self.take(id) {
            Some(token) => {
                token.abort();
                true
            }
            None => false,
        }
    }

    /// Signal the transfer for `id` to stop and delete its artifact, and forget it.
    pub fn cancel(&mut self, id: &TaskId) -> bool {
        match self.take(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&mut self) {
        for (_, token) in self.drain() {
            token.abort();
        }
    }
}
