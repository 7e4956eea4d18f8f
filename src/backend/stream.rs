//! Live query streams against the engine process.
//!
//! A spawned stream speaks line-delimited JSON on both stdio directions.
//! Outbound control requests (interrupt, rewind) are correlated to their
//! responses through a pending map keyed by generated request ids.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::BridgeError;

use super::claude_cli::{build_query_command, QueryOptions};

/// Failure marker the engine uses when a rewind target has no checkpoint.
pub const CHECKPOINT_MISSING_MARKER: &str = "No file checkpoint found for message";

/// One tagged line from the engine's stdout. Unrecognized tags map to
/// [`EngineMessage::Unknown`] so a newer engine cannot crash the loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: Value,
        #[serde(default)]
        uuid: Option<String>,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },
    User {
        #[serde(default)]
        message: Value,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        usage: Option<Value>,
    },
    ControlRequest {
        request_id: String,
        #[serde(default)]
        request: Value,
    },
    ControlResponse {
        #[serde(default)]
        response: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug)]
pub(crate) enum ControlError {
    /// The engine answered the request with an error payload.
    Engine(String),
    /// The stream went away before an answer arrived.
    Closed(String),
}

struct HandleShared {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: StdMutex<HashMap<String, oneshot::Sender<Result<Value, String>>>>,
}

/// Cheap clonable reference to one live engine stream.
///
/// The registry owns the authoritative mapping from session id to handle;
/// everyone else borrows a clone for the duration of a single operation.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleShared>,
}

impl SessionHandle {
    fn new(child: Child, stdin: ChildStdin) -> Self {
        Self {
            inner: Arc::new(HandleShared {
                child: Mutex::new(Some(child)),
                stdin: Mutex::new(Some(stdin)),
                pending: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Handle with no backing process, for exercising registry and
    /// coordination logic without spawning the engine.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            inner: Arc::new(HandleShared {
                child: Mutex::new(None),
                stdin: Mutex::new(None),
                pending: StdMutex::new(HashMap::new()),
            }),
        }
    }

    async fn write_line(&self, value: &Value) -> Result<(), BridgeError> {
        let mut guard = self.inner.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(BridgeError::StreamTermination {
                message: "Engine stdin is closed".to_string(),
                stderr: None,
            });
        };
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Sends the user message that starts a turn.
    pub async fn send_user_message(&self, text: &str) -> Result<(), BridgeError> {
        self.write_line(&json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{ "type": "text", "text": text }],
            },
        }))
        .await
    }

    /// Answers an engine-issued control request (e.g. a tool-use gate).
    pub async fn respond_control(
        &self,
        request_id: &str,
        response: Value,
    ) -> Result<(), BridgeError> {
        self.write_line(&json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": response,
            },
        }))
        .await
    }

    /// Sends a control request and waits for the correlated response.
    /// The wait is unbounded; callers needing a bound race it themselves.
    pub(crate) async fn send_control(&self, request: Value) -> Result<Value, ControlError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending control lock poisoned")
            .insert(request_id.clone(), tx);

        let envelope = json!({
            "type": "control_request",
            "request_id": request_id,
            "request": request,
        });
        if let Err(err) = self.write_line(&envelope).await {
            self.inner
                .pending
                .lock()
                .expect("pending control lock poisoned")
                .remove(&request_id);
            return Err(ControlError::Closed(err.to_string()));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ControlError::Engine(message)),
            Err(_) => Err(ControlError::Closed(
                "Engine stream ended before the control response arrived".to_string(),
            )),
        }
    }

    /// Restores files to the checkpoint recorded for `target_uuid`.
    pub async fn rewind_to_checkpoint(&self, target_uuid: &str) -> Result<(), BridgeError> {
        let request = json!({
            "subtype": "rewind",
            "message_id": target_uuid,
        });
        match self.send_control(request).await {
            Ok(_) => Ok(()),
            Err(ControlError::Engine(message)) => {
                if message.contains(CHECKPOINT_MISSING_MARKER) {
                    Err(BridgeError::CheckpointNotFound { message })
                } else {
                    Err(BridgeError::Rewind(message))
                }
            }
            Err(ControlError::Closed(message)) => Err(BridgeError::StreamTermination {
                message,
                stderr: None,
            }),
        }
    }

    /// Routes an inbound `control_response` payload to its waiting sender.
    /// Late responses (the waiter gave up) are dropped silently.
    pub(crate) fn complete_control(&self, response: &Value) {
        let Some(request_id) = response.get("request_id").and_then(|v| v.as_str()) else {
            debug!("control response without request_id");
            return;
        };
        let sender = self
            .inner
            .pending
            .lock()
            .expect("pending control lock poisoned")
            .remove(request_id);
        let Some(sender) = sender else {
            debug!(request_id, "control response with no pending waiter");
            return;
        };
        let outcome = match response.get("subtype").and_then(|v| v.as_str()) {
            Some("error") => Err(response
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("engine control error")
                .to_string()),
            _ => Ok(response.get("response").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    /// Closes the engine's stdin. In stream-json input mode the process
    /// exits once its input ends, so this is how a turn's stream is shut
    /// down without killing it.
    pub(crate) async fn close_stdin(&self) {
        self.inner.stdin.lock().await.take();
    }

    /// Kills the backing process. Tolerates a process that already exited;
    /// waiters on in-flight control requests observe a closed stream.
    pub async fn interrupt(&self) -> Result<(), BridgeError> {
        self.inner
            .pending
            .lock()
            .expect("pending control lock poisoned")
            .clear();
        let mut guard = self.inner.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };
        match child.kill().await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(BridgeError::Io(err.to_string())),
        }
    }

    pub(crate) async fn wait_for_exit(&self) -> Result<ExitStatus, BridgeError> {
        let mut guard = self.inner.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(BridgeError::StreamTermination {
                message: "Engine process is not attached".to_string(),
                stderr: None,
            });
        };
        child.wait().await.map_err(|err| BridgeError::Io(err.to_string()))
    }
}

/// A spawned engine query: the message reader plus its handle.
pub struct QueryStream {
    pub handle: SessionHandle,
    lines: Lines<BufReader<ChildStdout>>,
    stderr_task: tokio::task::JoinHandle<String>,
}

impl QueryStream {
    pub async fn spawn(options: &QueryOptions) -> Result<QueryStream, BridgeError> {
        let mut command = build_query_command(options);
        let mut child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BridgeError::configuration(
                    "Claude Code CLI not found. Install Claude Code and ensure `claude` is on your PATH.",
                )
            } else {
                BridgeError::Io(err.to_string())
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| BridgeError::StreamTermination {
            message: "missing stdin".to_string(),
            stderr: None,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::StreamTermination {
            message: "missing stdout".to_string(),
            stderr: None,
        })?;
        let stderr = child.stderr.take().ok_or_else(|| BridgeError::StreamTermination {
            message: "missing stderr".to_string(),
            stderr: None,
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                output.push_str(&line);
                output.push('\n');
            }
            output
        });

        Ok(QueryStream {
            handle: SessionHandle::new(child, stdin),
            lines: BufReader::new(stdout).lines(),
            stderr_task,
        })
    }

    /// Next message from the engine. Control responses are routed to their
    /// pending waiters and skipped; unparseable lines are skipped.
    pub async fn next_message(&mut self) -> Option<EngineMessage> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => return None,
            };
            if line.trim().is_empty() {
                continue;
            }
            let message: EngineMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(err) => {
                    debug!("skipping unparseable engine line: {err}");
                    continue;
                }
            };
            if let EngineMessage::ControlResponse { response } = &message {
                self.handle.complete_control(response);
                continue;
            }
            return Some(message);
        }
    }

    /// Waits for the process to exit and surfaces a non-zero status as a
    /// stream termination failure carrying captured stderr.
    pub async fn finish(self) -> Result<(), BridgeError> {
        let status = self.handle.wait_for_exit().await?;
        let stderr = self.stderr_task.await.unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        let detail = stderr.trim();
        let message = if detail.is_empty() {
            "Claude CLI exited unexpectedly".to_string()
        } else {
            format!("Claude CLI exited unexpectedly: {detail}")
        };
        Err(BridgeError::StreamTermination {
            message,
            stderr: if detail.is_empty() {
                None
            } else {
                Some(detail.to_string())
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_messages_deserialize_by_tag() {
        let init: EngineMessage = serde_json::from_str(
            r#"{"type":"system","subtype":"init","session_id":"sess-9"}"#,
        )
        .unwrap();
        match init {
            EngineMessage::System { subtype, session_id } => {
                assert_eq!(subtype, "init");
                assert_eq!(session_id.as_deref(), Some("sess-9"));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let result: EngineMessage =
            serde_json::from_str(r#"{"type":"result","is_error":true}"#).unwrap();
        assert!(matches!(result, EngineMessage::Result { is_error: true, .. }));

        let future: EngineMessage =
            serde_json::from_str(r#"{"type":"telemetry_snapshot","data":{}}"#).unwrap();
        assert!(matches!(future, EngineMessage::Unknown));
    }

    #[test]
    fn control_request_carries_payload() {
        let message: EngineMessage = serde_json::from_str(
            r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#,
        )
        .unwrap();
        match message {
            EngineMessage::ControlRequest { request_id, request } => {
                assert_eq!(request_id, "r1");
                assert_eq!(request["subtype"], "can_use_tool");
                assert_eq!(request["tool_name"], "Bash");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_control_response_is_dropped() {
        let handle = SessionHandle::detached();
        // No pending waiter registered for this id.
        handle.complete_control(&json!({
            "subtype": "success",
            "request_id": "gone",
            "response": {},
        }));
        // Interrupting a detached handle is a no-op.
        handle.interrupt().await.unwrap();
    }
}
