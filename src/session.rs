//! Session orchestration: turns, interrupts and rewinds.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::approvals::{ApprovalChannel, FileApprovalChannel};
use crate::backend::claude_cli::{build_claude_path_env, check_claude_installation, QueryOptions};
use crate::backend::events::{emit_event, EventSink};
use crate::backend::stream::{EngineMessage, QueryStream, SessionHandle};
use crate::claude_home::session_exists;
use crate::coordinator::ModeSwitchCoordinator;
use crate::error::BridgeError;
use crate::gate::PermissionGate;
use crate::history::CheckpointHistoryReader;
use crate::mode_store::SessionModeStore;
use crate::registry::SessionHandleRegistry;
use crate::rewind::{rewind_with_fallback, REWIND_ATTEMPT_TIMEOUT};
use crate::settings::BridgeSettings;
use crate::types::{PermissionMode, RewindOutcome};

/// Per-turn request parameters.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
}

/// Owns the shared session state (mode store, handle registry) and drives
/// query streams against the engine. One manager serves one workspace.
pub struct SessionManager {
    settings: BridgeSettings,
    cwd: String,
    modes: Arc<SessionModeStore>,
    registry: Arc<SessionHandleRegistry>,
    gate: Arc<PermissionGate>,
    sink: Arc<dyn EventSink>,
    history: CheckpointHistoryReader,
}

impl SessionManager {
    pub fn new(
        cwd: impl Into<String>,
        settings: BridgeSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let channel: Option<Arc<dyn ApprovalChannel>> =
            settings.approvals_dir.as_ref().map(|dir| {
                Arc::new(FileApprovalChannel::new(
                    dir.clone(),
                    settings.approval_timeout(),
                )) as Arc<dyn ApprovalChannel>
            });
        Self::with_approval_channel(cwd, settings, sink, channel)
    }

    /// Constructor taking an explicit approval channel, so embedders and
    /// tests can substitute their own transport.
    pub fn with_approval_channel(
        cwd: impl Into<String>,
        settings: BridgeSettings,
        sink: Arc<dyn EventSink>,
        channel: Option<Arc<dyn ApprovalChannel>>,
    ) -> Self {
        let cwd = cwd.into();
        let modes = Arc::new(SessionModeStore::new());
        let coordinator = Arc::new(ModeSwitchCoordinator::new(modes.clone(), sink.clone()));
        let gate = Arc::new(PermissionGate::new(modes.clone(), coordinator, channel));
        Self {
            history: CheckpointHistoryReader::new(cwd.clone()),
            settings,
            cwd,
            modes,
            registry: Arc::new(SessionHandleRegistry::new()),
            gate,
            sink,
        }
    }

    pub fn modes(&self) -> &Arc<SessionModeStore> {
        &self.modes
    }

    pub fn registry(&self) -> &Arc<SessionHandleRegistry> {
        &self.registry
    }

    /// Reports whether the engine binary is runnable, and its version.
    pub async fn doctor(&self) -> Result<Value, BridgeError> {
        let claude_bin = self.settings.claude_bin.clone();
        let path_env = build_claude_path_env(claude_bin.as_deref());
        let version = check_claude_installation(claude_bin.clone()).await?;
        Ok(json!({
            "ok": version.is_some(),
            "claudeBin": claude_bin,
            "version": version,
            "path": path_env,
        }))
    }

    fn query_options(&self, session_id: &str, options: &TurnOptions) -> QueryOptions {
        let mut query = QueryOptions::new(self.cwd.clone(), session_id);
        query.permission_mode = options.permission_mode;
        query.model = options
            .model
            .clone()
            .or_else(|| self.settings.model.clone());
        query.claude_bin = self.settings.claude_bin.clone();
        query.file_checkpoints = self.settings.file_checkpoints;
        query
    }

    /// Runs one full turn: spawns (or resumes) the session's stream, sends
    /// the prompt, gates every tool-use request, forwards assistant output
    /// to the event sink, and surfaces any terminal error as a failure.
    pub async fn run_turn(
        &self,
        session_id: &str,
        prompt: &str,
        options: TurnOptions,
    ) -> Result<Value, BridgeError> {
        if prompt.trim().is_empty() {
            return Err(BridgeError::configuration("empty user message"));
        }
        let turn_id = Uuid::new_v4().to_string();
        emit_event(
            self.sink.as_ref(),
            session_id,
            "turn/started",
            json!({
                "threadId": session_id,
                "turn": { "id": turn_id, "threadId": session_id },
            }),
        );

        let outcome = self
            .drive_turn(session_id, prompt, &options, &turn_id)
            .await;

        match outcome {
            Ok(value) => {
                emit_event(
                    self.sink.as_ref(),
                    session_id,
                    "turn/completed",
                    json!({
                        "threadId": session_id,
                        "turn": { "id": turn_id, "threadId": session_id },
                    }),
                );
                Ok(value)
            }
            Err(err) => {
                emit_event(
                    self.sink.as_ref(),
                    session_id,
                    "error",
                    err.to_failure_value(),
                );
                Err(err)
            }
        }
    }

    async fn drive_turn(
        &self,
        session_id: &str,
        prompt: &str,
        options: &TurnOptions,
        turn_id: &str,
    ) -> Result<Value, BridgeError> {
        let query = self.query_options(session_id, options);
        let mut stream = QueryStream::spawn(&query).await?;
        stream.handle.send_user_message(prompt).await?;

        let initial_mode = options.permission_mode;
        let mut item_id = format!("{turn_id}-assistant");
        let mut full_text = String::new();
        let mut result_error: Option<String> = None;
        let mut registered_ids: Vec<String> = Vec::new();
        let mut approval_tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        // A `result` message is the turn's terminal marker; the process
        // itself stays alive on stdin until we close it below.
        while let Some(message) = stream.next_message().await {
            match message {
                EngineMessage::System {
                    subtype,
                    session_id: announced,
                } => {
                    if subtype == "init" {
                        let id = announced.as_deref().unwrap_or(session_id);
                        self.registry.register(id, stream.handle.clone());
                        registered_ids.push(id.to_string());
                        if id != session_id {
                            // The engine re-keyed the session; keep the
                            // turn's id addressable too.
                            self.registry.register(session_id, stream.handle.clone());
                            registered_ids.push(session_id.to_string());
                        }
                    }
                }
                EngineMessage::ControlRequest {
                    request_id,
                    request,
                } => {
                    approval_tasks.retain(|task| !task.is_finished());
                    approval_tasks.push(self.spawn_control_task(
                        session_id,
                        initial_mode,
                        stream.handle.clone(),
                        request_id,
                        request,
                    ));
                }
                EngineMessage::Assistant { message, uuid, .. } => {
                    if let Some(uuid) = uuid.filter(|value| !value.is_empty()) {
                        item_id = uuid;
                    }
                    let text = extract_text_from_message(&message);
                    if !text.is_empty() {
                        full_text = text;
                    }
                }
                EngineMessage::Result {
                    is_error, result, ..
                } => {
                    if is_error {
                        let message = result
                            .as_ref()
                            .and_then(|value| value.as_str())
                            .unwrap_or("Turn ended with an error result")
                            .to_string();
                        result_error = Some(message);
                    }
                    break;
                }
                EngineMessage::User { .. }
                | EngineMessage::ControlResponse { .. }
                | EngineMessage::Unknown => {}
            }
        }

        // The turn is over; nothing will answer a pending approval.
        for task in approval_tasks {
            task.abort();
        }

        stream.handle.close_stdin().await;
        let finish_result = stream.finish().await;
        // The stream is no longer in-flight; later rewinds resume fresh.
        for id in registered_ids {
            self.registry.remove(&id);
        }
        finish_result?;

        if let Some(message) = result_error {
            return Err(BridgeError::TurnFailed { message });
        }

        if !full_text.is_empty() {
            emit_event(
                self.sink.as_ref(),
                session_id,
                "item/completed",
                json!({
                    "threadId": session_id,
                    "item": {
                        "id": item_id,
                        "type": "agentMessage",
                        "text": full_text,
                    },
                }),
            );
        }

        Ok(json!({
            "result": {
                "turn": { "id": turn_id, "threadId": session_id },
            }
        }))
    }

    fn spawn_control_task(
        &self,
        session_id: &str,
        initial_mode: PermissionMode,
        handle: SessionHandle,
        request_id: String,
        request: Value,
    ) -> tokio::task::JoinHandle<()> {
        let gate = self.gate.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let subtype = request
                .get("subtype")
                .and_then(|value| value.as_str())
                .unwrap_or("");
            let response = if subtype == "can_use_tool" {
                let tool_name = request
                    .get("tool_name")
                    .and_then(|value| value.as_str())
                    .unwrap_or("");
                let tool_input = request.get("input").cloned().unwrap_or(Value::Null);
                gate.decide(&session_id, tool_name, &tool_input, initial_mode)
                    .await
                    .to_engine_response()
            } else {
                // Unknown engine-initiated requests are acknowledged
                // without an opinion so the stream never stalls on us.
                json!({})
            };
            if let Err(err) = handle.respond_control(&request_id, response).await {
                warn!(request_id, "failed to answer engine control request: {err}");
            }
        })
    }

    /// Interrupts the session's in-flight turn, if any.
    pub async fn interrupt(&self, session_id: &str) -> Result<(), BridgeError> {
        match self.registry.get(session_id) {
            Some(handle) => handle.interrupt().await,
            None => Ok(()),
        }
    }

    /// Drops the tracked handle for a session.
    pub fn release_session(&self, session_id: &str) -> bool {
        self.registry.remove(session_id)
    }

    /// Restores the session's files to the checkpoint at `target_uuid`,
    /// falling back to resolved candidates when that exact checkpoint is
    /// gone. Reuses the live stream when one is registered; otherwise a
    /// stream is resumed solely for the rewind and released afterwards,
    /// whether or not the rewind worked.
    pub async fn rewind_files(
        &self,
        session_id: &str,
        target_uuid: &str,
    ) -> Result<RewindOutcome, BridgeError> {
        let (handle, scratch) = match self.registry.get(session_id) {
            Some(handle) => (handle, None),
            None => {
                let (handle, pump) = self.resume_for_rewind(session_id).await?;
                (handle.clone(), Some((handle, pump)))
            }
        };

        let attempt_handle = handle.clone();
        let result = rewind_with_fallback(
            target_uuid,
            move |uuid| {
                let handle = attempt_handle.clone();
                async move {
                    // The engine may still complete a rewind after the
                    // timer fires; the late response is dropped by the
                    // correlation map rather than cancelled.
                    match timeout(REWIND_ATTEMPT_TIMEOUT, handle.rewind_to_checkpoint(&uuid))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(BridgeError::RewindTimeout {
                            seconds: REWIND_ATTEMPT_TIMEOUT.as_secs(),
                        }),
                    }
                }
            },
            || self.history.read(session_id),
        )
        .await;

        if let Some((handle, pump)) = scratch {
            if let Err(err) = handle.interrupt().await {
                warn!("failed to release rewind stream: {err}");
            }
            pump.abort();
        }
        result
    }

    /// Resumes a session's stream for the sole purpose of issuing a rewind.
    /// Returns the handle plus the reader task that routes its control
    /// responses; the caller releases both.
    async fn resume_for_rewind(
        &self,
        session_id: &str,
    ) -> Result<(SessionHandle, tokio::task::JoinHandle<()>), BridgeError> {
        if !session_exists(&self.cwd, session_id) {
            return Err(BridgeError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        let mut query = QueryOptions::new(self.cwd.clone(), session_id);
        query.claude_bin = self.settings.claude_bin.clone();
        query.file_checkpoints = true;
        let mut stream = QueryStream::spawn(&query).await?;
        let handle = stream.handle.clone();
        let pump = tokio::spawn(async move {
            while stream.next_message().await.is_some() {}
        });
        Ok((handle, pump))
    }
}

fn extract_text_from_message(message: &Value) -> String {
    let Some(content) = message.get("content") else {
        return String::new();
    };
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                    block.get("text").and_then(|v| v.as_str())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::events::NullEventSink;

    fn manager_for(cwd: &str) -> SessionManager {
        SessionManager::with_approval_channel(
            cwd,
            BridgeSettings::default(),
            Arc::new(NullEventSink),
            None,
        )
    }

    #[test]
    fn extracts_text_from_both_content_shapes() {
        assert_eq!(
            extract_text_from_message(&json!({ "content": "plain  " })),
            "plain"
        );
        assert_eq!(
            extract_text_from_message(&json!({
                "content": [
                    { "type": "thinking", "thinking": "hmm" },
                    { "type": "text", "text": "hello " },
                    { "type": "text", "text": "world" },
                ]
            })),
            "hello world"
        );
        assert_eq!(extract_text_from_message(&json!({})), "");
    }

    #[tokio::test]
    async fn rewind_without_handle_or_log_reports_missing_session() {
        let claude_home = tempfile::tempdir().expect("tempdir");
        std::env::set_var("CLAUDE_HOME", claude_home.path());
        let manager = manager_for("/workspace/project");
        let err = manager
            .rewind_files("sess-none", "uuid-1")
            .await
            .expect_err("no session anywhere");
        assert!(matches!(err, BridgeError::SessionNotFound { .. }));
        std::env::remove_var("CLAUDE_HOME");
    }

    #[tokio::test]
    async fn rewind_reuses_a_registered_handle() {
        let manager = manager_for("/workspace/project");
        manager
            .registry()
            .register("sess-1", SessionHandle::detached());
        // The detached handle has no stdin, so the attempt fails with a
        // stream termination — which must propagate as fatal rather than
        // trigger candidate resolution.
        let err = manager
            .rewind_files("sess-1", "uuid-1")
            .await
            .expect_err("detached stream cannot rewind");
        assert!(matches!(err, BridgeError::StreamTermination { .. }));
    }

    #[tokio::test]
    async fn interrupt_releases_the_stream_but_keeps_the_mode_override() {
        let manager = manager_for("/workspace/project");
        manager.modes().set("sess-1", PermissionMode::AcceptEdits);
        manager
            .registry()
            .register("sess-1", SessionHandle::detached());

        manager.interrupt("sess-1").await.expect("interrupt");
        // An aborted turn keeps its mode: resuming the session later
        // continues under the switched mode.
        assert_eq!(
            manager.modes().get("sess-1"),
            Some(PermissionMode::AcceptEdits)
        );

        assert!(manager.release_session("sess-1"));
        assert!(manager.registry().get("sess-1").is_none());
        assert_eq!(
            manager.modes().get("sess-1"),
            Some(PermissionMode::AcceptEdits)
        );
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_spawning() {
        let manager = manager_for("/workspace/project");
        let err = manager
            .run_turn("sess-1", "   ", TurnOptions::default())
            .await
            .expect_err("empty prompt");
        assert!(matches!(err, BridgeError::Configuration(_)));
    }
}
