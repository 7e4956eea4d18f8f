//! Live stream handles, keyed by session id.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::stream::SessionHandle;

/// Tracks the live query-stream handle for each session so that later
/// operations (rewind, interrupt) reuse the in-flight stream instead of
/// starting a fresh one.
///
/// `register` runs on every observed system-init event; repeated
/// registrations for the same id are expected and the last write wins.
#[derive(Default)]
pub struct SessionHandleRegistry {
    handles: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, handle: SessionHandle) {
        self.handles
            .lock()
            .expect("handle registry lock poisoned")
            .insert(session_id.to_string(), handle);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.handles
            .lock()
            .expect("handle registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.handles
            .lock()
            .expect("handle registry lock poisoned")
            .remove(session_id)
            .is_some()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.handles
            .lock()
            .expect("handle registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
