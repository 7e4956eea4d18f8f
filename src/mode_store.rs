//! Per-session permission mode overrides.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::PermissionMode;

/// Mapping from session id to the mode override currently in force.
///
/// An override is written when an exit-plan approval lands and survives
/// until explicitly cleared; it is deliberately not removed when a turn
/// ends or aborts, so a resumed session keeps its switched mode.
///
/// Readers (the gate, on every decision) and the single writer (the mode
/// switch coordinator) share this through a plain mutex; contention is one
/// entry per live session.
#[derive(Debug, Default)]
pub struct SessionModeStore {
    modes: Mutex<HashMap<String, PermissionMode>>,
}

impl SessionModeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<PermissionMode> {
        self.modes
            .lock()
            .expect("mode store lock poisoned")
            .get(session_id)
            .copied()
    }

    pub fn set(&self, session_id: &str, mode: PermissionMode) {
        self.modes
            .lock()
            .expect("mode store lock poisoned")
            .insert(session_id.to_string(), mode);
    }

    pub fn clear(&self, session_id: &str) {
        self.modes
            .lock()
            .expect("mode store lock poisoned")
            .remove(session_id);
    }
}
