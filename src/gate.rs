//! Per-tool-invocation permission decisions.
//!
//! Every tool-use request from the engine passes through
//! [`PermissionGate::decide`] before it may execute. The gate reads the
//! session's mode fresh on every call, enforces plan mode locally (the
//! engine has no such mode), applies the auto-approval tables, and defers
//! everything else to the human-approval channel.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::approvals::ApprovalChannel;
use crate::coordinator::ModeSwitchCoordinator;
use crate::error::BridgeError;
use crate::mode_store::SessionModeStore;
use crate::types::{ApprovalDecision, ApprovalRequest, PermissionMode};

/// The one tool allowed through while a session is planning. Its approval
/// carries the target execution mode and ends plan mode for the session.
pub const EXIT_PLAN_TOOL: &str = "ExitPlanMode";

/// Tools auto-approved under `acceptEdits`.
pub const ACCEPT_EDITS_TOOLS: [&str; 7] = [
    "Write",
    "Edit",
    "MultiEdit",
    "CreateDirectory",
    "MoveFile",
    "CopyFile",
    "Rename",
];

const PLAN_DENY_REASON: &str = "Permission mode is plan (no execution)";

pub struct PermissionGate {
    modes: Arc<SessionModeStore>,
    coordinator: Arc<ModeSwitchCoordinator>,
    channel: Option<Arc<dyn ApprovalChannel>>,
}

impl PermissionGate {
    pub fn new(
        modes: Arc<SessionModeStore>,
        coordinator: Arc<ModeSwitchCoordinator>,
        channel: Option<Arc<dyn ApprovalChannel>>,
    ) -> Self {
        Self {
            modes,
            coordinator,
            channel,
        }
    }

    /// Decides one tool invocation.
    ///
    /// `initial_mode` is the mode the user picked when the turn started; it
    /// applies only while no override has been recorded for the session.
    /// The store is consulted on every call, so a mode switched mid-turn
    /// takes effect on the very next decision.
    ///
    /// This function never panics and never returns an error: a failing
    /// approval channel degrades to a deny.
    pub async fn decide(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_input: &Value,
        initial_mode: PermissionMode,
    ) -> ApprovalDecision {
        let current_mode = self.modes.get(session_id).unwrap_or(initial_mode);

        if current_mode == PermissionMode::Plan && tool_name != EXIT_PLAN_TOOL {
            return ApprovalDecision::deny(PLAN_DENY_REASON);
        }

        match current_mode {
            PermissionMode::BypassPermissions => return ApprovalDecision::Approve,
            PermissionMode::AcceptEdits if ACCEPT_EDITS_TOOLS.contains(&tool_name) => {
                return ApprovalDecision::Approve;
            }
            _ => {}
        }

        let Some(channel) = &self.channel else {
            return ApprovalDecision::Indeterminate;
        };

        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            tool_input: tool_input.clone(),
        };
        match channel.request(&request).await {
            Ok(verdict) if verdict.allow => {
                if tool_name == EXIT_PLAN_TOOL {
                    let target_mode = verdict.mode.unwrap_or(PermissionMode::Default);
                    self.coordinator
                        .on_exit_plan_approved(session_id, target_mode);
                }
                ApprovalDecision::Approve
            }
            Ok(verdict) => ApprovalDecision::deny(
                verdict
                    .message
                    .unwrap_or_else(|| "Tool use denied".to_string()),
            ),
            Err(err) => {
                let message = match err {
                    BridgeError::ApprovalChannel(message) => message,
                    other => other.to_string(),
                };
                ApprovalDecision::deny(format!("Permission check failed: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::events::NullEventSink;
    use crate::types::ApprovalVerdict;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedChannel {
        requests: Mutex<Vec<ApprovalRequest>>,
        outcome: Box<dyn Fn(&ApprovalRequest) -> Result<ApprovalVerdict, BridgeError> + Send + Sync>,
    }

    impl ScriptedChannel {
        fn new(
            outcome: impl Fn(&ApprovalRequest) -> Result<ApprovalVerdict, BridgeError>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                outcome: Box::new(outcome),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ApprovalChannel for ScriptedChannel {
        async fn request(
            &self,
            request: &ApprovalRequest,
        ) -> Result<ApprovalVerdict, BridgeError> {
            self.requests.lock().unwrap().push(request.clone());
            (self.outcome)(request)
        }
    }

    fn build_gate(
        channel: Option<Arc<dyn ApprovalChannel>>,
    ) -> (PermissionGate, Arc<SessionModeStore>) {
        let modes = Arc::new(SessionModeStore::new());
        let coordinator = Arc::new(ModeSwitchCoordinator::new(
            modes.clone(),
            Arc::new(NullEventSink),
        ));
        (PermissionGate::new(modes.clone(), coordinator, channel), modes)
    }

    #[tokio::test]
    async fn plan_mode_denies_every_tool_except_exit_plan() {
        let channel = ScriptedChannel::new(|_| {
            Ok(ApprovalVerdict {
                allow: false,
                message: Some("rejected".to_string()),
                mode: None,
            })
        });
        let (gate, _) = build_gate(Some(channel.clone()));

        for tool in ["Bash", "Write", "Read", "WebSearch", "Task"] {
            let decision = gate
                .decide("sess-1", tool, &json!({}), PermissionMode::Plan)
                .await;
            assert_eq!(
                decision,
                ApprovalDecision::deny("Permission mode is plan (no execution)"),
                "tool {tool} must be suppressed in plan mode"
            );
        }
        // None of the suppressed tools reached the channel.
        assert_eq!(channel.request_count(), 0);

        // The exit-plan tool goes through to the channel instead.
        let decision = gate
            .decide("sess-1", EXIT_PLAN_TOOL, &json!({}), PermissionMode::Plan)
            .await;
        assert_eq!(decision, ApprovalDecision::deny("rejected"));
        assert_eq!(channel.request_count(), 1);
    }

    #[tokio::test]
    async fn exit_plan_denial_keeps_the_session_planning() {
        let channel = ScriptedChannel::new(|_| {
            Ok(ApprovalVerdict {
                allow: false,
                message: None,
                mode: None,
            })
        });
        let (gate, modes) = build_gate(Some(channel));

        gate.decide("sess-1", EXIT_PLAN_TOOL, &json!({}), PermissionMode::Plan)
            .await;
        assert_eq!(modes.get("sess-1"), None);
        // A later tool call is still suppressed.
        let decision = gate
            .decide("sess-1", "Bash", &json!({}), PermissionMode::Plan)
            .await;
        assert!(matches!(decision, ApprovalDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn approved_exit_plan_switches_mode_for_the_next_decision() {
        let channel = ScriptedChannel::new(|_| {
            Ok(ApprovalVerdict {
                allow: true,
                message: None,
                mode: Some(PermissionMode::AcceptEdits),
            })
        });
        let (gate, modes) = build_gate(Some(channel.clone()));

        let decision = gate
            .decide("sess-1", EXIT_PLAN_TOOL, &json!({}), PermissionMode::Plan)
            .await;
        assert_eq!(decision, ApprovalDecision::Approve);
        assert_eq!(modes.get("sess-1"), Some(PermissionMode::AcceptEdits));

        // Same initial mode, but the override now wins: Write is
        // auto-approved without another channel round trip.
        let decision = gate
            .decide("sess-1", "Write", &json!({}), PermissionMode::Plan)
            .await;
        assert_eq!(decision, ApprovalDecision::Approve);
        assert_eq!(channel.request_count(), 1);
    }

    #[tokio::test]
    async fn bypass_approves_any_tool() {
        let (gate, _) = build_gate(None);
        for tool in ["Bash", "Write", "Read", "SomethingNew", EXIT_PLAN_TOOL] {
            let decision = gate
                .decide(
                    "sess-1",
                    tool,
                    &json!({ "arbitrary": true }),
                    PermissionMode::BypassPermissions,
                )
                .await;
            assert_eq!(decision, ApprovalDecision::Approve);
        }
    }

    #[tokio::test]
    async fn accept_edits_auto_approves_only_the_edit_tools() {
        let channel = ScriptedChannel::new(|_| {
            Ok(ApprovalVerdict {
                allow: true,
                message: None,
                mode: None,
            })
        });
        let (gate, _) = build_gate(Some(channel.clone()));

        let decision = gate
            .decide("sess-1", "Edit", &json!({}), PermissionMode::AcceptEdits)
            .await;
        assert_eq!(decision, ApprovalDecision::Approve);
        assert_eq!(channel.request_count(), 0);

        // Bash is not in the fixed set, so it goes to the channel.
        let decision = gate
            .decide("sess-1", "Bash", &json!({}), PermissionMode::AcceptEdits)
            .await;
        assert_eq!(decision, ApprovalDecision::Approve);
        assert_eq!(channel.request_count(), 1);
    }

    #[tokio::test]
    async fn default_mode_defers_to_the_channel() {
        let channel = ScriptedChannel::new(|_| {
            Ok(ApprovalVerdict {
                allow: true,
                message: None,
                mode: None,
            })
        });
        let (gate, _) = build_gate(Some(channel.clone()));
        let decision = gate
            .decide("sess-1", "Write", &json!({}), PermissionMode::Default)
            .await;
        assert_eq!(decision, ApprovalDecision::Approve);
        assert_eq!(channel.request_count(), 1);
    }

    #[tokio::test]
    async fn channel_failure_degrades_to_deny() {
        let channel = ScriptedChannel::new(|_| {
            Err(BridgeError::ApprovalChannel("transport broke".to_string()))
        });
        let (gate, _) = build_gate(Some(channel));
        let decision = gate
            .decide("sess-1", "Bash", &json!({}), PermissionMode::Default)
            .await;
        assert_eq!(
            decision,
            ApprovalDecision::deny("Permission check failed: transport broke")
        );
    }

    #[tokio::test]
    async fn no_channel_means_no_opinion() {
        let (gate, _) = build_gate(None);
        let decision = gate
            .decide("sess-1", "Bash", &json!({}), PermissionMode::Default)
            .await;
        assert_eq!(decision, ApprovalDecision::Indeterminate);
    }
}
