//! Applies approved exit-plan mode switches.

use std::sync::Arc;

use serde_json::json;

use crate::backend::events::{emit_event, EventSink};
use crate::mode_store::SessionModeStore;
use crate::types::PermissionMode;

/// Connects exit-plan approvals to the session mode store and tells the
/// frontend about the change.
pub struct ModeSwitchCoordinator {
    modes: Arc<SessionModeStore>,
    sink: Arc<dyn EventSink>,
}

impl ModeSwitchCoordinator {
    pub fn new(modes: Arc<SessionModeStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { modes, sink }
    }

    /// Records the approved target mode for the session and emits a
    /// `thread/modeChanged` notification. The store write completes before
    /// this returns, so the next gate decision for the session reads the
    /// switched mode.
    pub fn on_exit_plan_approved(&self, session_id: &str, target_mode: PermissionMode) {
        self.modes.set(session_id, target_mode);
        emit_event(
            self.sink.as_ref(),
            session_id,
            "thread/modeChanged",
            json!({
                "threadId": session_id,
                "mode": target_mode.as_str(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::events::BroadcastEventSink;

    #[test]
    fn approval_updates_store_and_notifies() {
        let modes = Arc::new(SessionModeStore::new());
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();
        let coordinator = ModeSwitchCoordinator::new(modes.clone(), Arc::new(sink));

        coordinator.on_exit_plan_approved("sess-1", PermissionMode::AcceptEdits);

        assert_eq!(modes.get("sess-1"), Some(PermissionMode::AcceptEdits));
        let event = rx.try_recv().expect("mode change event");
        assert_eq!(event.message["method"], "thread/modeChanged");
        assert_eq!(event.message["params"]["mode"], "acceptEdits");
    }
}
