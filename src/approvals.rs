//! The human-approval channel.
//!
//! The gate defers undecided tool invocations to an [`ApprovalChannel`]:
//! one request, one verdict, correlated by the generated request id. The
//! default transport is file-based — the frontend watches for
//! `<id>.request.json` and answers with `<id>.response.json` — but the
//! trait keeps the transport replaceable.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tracing::warn;

use crate::error::BridgeError;
use crate::types::{ApprovalRequest, ApprovalVerdict, PermissionMode};

#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Asks for a decision on one tool invocation. May block for as long
    /// as the transport's wait policy allows; by default there is no cap —
    /// if the engine waits indefinitely, so do we.
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalVerdict, BridgeError>;
}

/// File-based request/response transport.
pub struct FileApprovalChannel {
    dir: PathBuf,
    /// `None` waits indefinitely. Headless embedders should set a cap.
    wait_timeout: Option<Duration>,
}

const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl FileApprovalChannel {
    pub fn new(dir: impl Into<PathBuf>, wait_timeout: Option<Duration>) -> Self {
        Self {
            dir: dir.into(),
            wait_timeout,
        }
    }

    fn request_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.request.json"))
    }

    fn response_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.response.json"))
    }

    async fn await_response(&self, id: &str) -> Result<ApprovalVerdict, BridgeError> {
        let response_path = self.response_path(id);
        let deadline = self.wait_timeout.map(|timeout| Instant::now() + timeout);

        // Debounced directory watch; the periodic tick below is the
        // fallback for platforms where the watcher misses events.
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_millis(100), tx)
            .map_err(|err| BridgeError::ApprovalChannel(err.to_string()))?;
        if let Err(err) = debouncer
            .watcher()
            .watch(&self.dir, RecursiveMode::NonRecursive)
        {
            warn!("approval dir watch failed, polling only: {err}");
        }

        loop {
            if response_path.exists() {
                let contents = std::fs::read_to_string(&response_path)
                    .map_err(|err| BridgeError::ApprovalChannel(err.to_string()))?;
                let verdict: ApprovalVerdict = serde_json::from_str(&contents)
                    .map_err(|err| BridgeError::ApprovalChannel(err.to_string()))?;
                let _ = std::fs::remove_file(&response_path);
                return Ok(verdict);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(BridgeError::ApprovalChannel(format!(
                        "No approval response for request {id} within the configured wait"
                    )));
                }
            }
            // Drain watcher notifications; the existence check above is
            // what actually decides.
            while rx.try_recv().is_ok() {}
            tokio::time::sleep(RESPONSE_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ApprovalChannel for FileApprovalChannel {
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalVerdict, BridgeError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|err| BridgeError::ApprovalChannel(err.to_string()))?;
        let request_path = self.request_path(&request.id);
        let payload = serde_json::to_string_pretty(request)
            .map_err(|err| BridgeError::ApprovalChannel(err.to_string()))?;
        std::fs::write(&request_path, payload)
            .map_err(|err| BridgeError::ApprovalChannel(err.to_string()))?;

        let outcome = self.await_response(&request.id).await;
        let _ = std::fs::remove_file(&request_path);
        outcome
    }
}

/// Channel that approves everything. For non-interactive embedders and
/// tests; exit-plan approvals carry the configured target mode.
pub struct AutoApproveChannel {
    pub exit_plan_mode: Option<PermissionMode>,
}

impl Default for AutoApproveChannel {
    fn default() -> Self {
        Self {
            exit_plan_mode: Some(PermissionMode::Default),
        }
    }
}

#[async_trait]
impl ApprovalChannel for AutoApproveChannel {
    async fn request(&self, _request: &ApprovalRequest) -> Result<ApprovalVerdict, BridgeError> {
        Ok(ApprovalVerdict {
            allow: true,
            message: None,
            mode: self.exit_plan_mode,
        })
    }
}
