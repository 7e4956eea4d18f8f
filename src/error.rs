//! Error types for the bridge.

use serde_json::{json, Value};
use thiserror::Error;

/// Shared error type for the session bridge.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Settings or environment problem the user has to fix.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The human-approval round trip failed. PermissionGate converts this
    /// into a deny decision; it only escapes for channel setup problems.
    #[error("Approval channel error: {0}")]
    ApprovalChannel(String),

    /// The engine reported that no file checkpoint exists for the requested
    /// message. Recoverable via fallback candidate resolution.
    #[error("{message}")]
    CheckpointNotFound { message: String },

    /// A rewind attempt failed for a reason other than a missing checkpoint.
    #[error("Rewind failed: {0}")]
    Rewind(String),

    /// A single rewind attempt exceeded its time bound.
    #[error("Rewind attempt timed out after {seconds}s")]
    RewindTimeout { seconds: u64 },

    /// The engine stream or its backing process ended unexpectedly.
    #[error("{message}")]
    StreamTermination {
        message: String,
        stderr: Option<String>,
    },

    /// The engine finished the turn with an error result.
    #[error("{message}")]
    TurnFailed { message: String },

    /// Session history could not be located for a rewind lookup.
    #[error("Session file not found for {session_id}")]
    SessionNotFound { session_id: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Json(String),
}

impl BridgeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn is_checkpoint_not_found(&self) -> bool {
        matches!(self, Self::CheckpointNotFound { .. })
    }

    /// The stable failure shape surfaced to the consuming frontend.
    pub fn to_failure_value(&self) -> Value {
        let details = match self {
            Self::StreamTermination { stderr, .. } => json!({
                "kind": "streamTermination",
                "stderr": stderr,
            }),
            Self::CheckpointNotFound { .. } => json!({ "kind": "checkpointNotFound" }),
            Self::RewindTimeout { seconds } => json!({
                "kind": "rewindTimeout",
                "seconds": seconds,
            }),
            Self::ApprovalChannel(_) => json!({ "kind": "approvalChannel" }),
            Self::Configuration(_) => json!({ "kind": "configuration" }),
            Self::SessionNotFound { session_id } => json!({
                "kind": "sessionNotFound",
                "sessionId": session_id,
            }),
            Self::Rewind(_) => json!({ "kind": "rewind" }),
            Self::TurnFailed { .. } => json!({ "kind": "turnFailed" }),
            Self::Io(_) => json!({ "kind": "io" }),
            Self::Json(_) => json!({ "kind": "serialization" }),
        };
        json!({
            "success": false,
            "error": self.to_string(),
            "details": details,
        })
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_value_has_canonical_shape() {
        let err = BridgeError::StreamTermination {
            message: "Claude CLI exited unexpectedly".to_string(),
            stderr: Some("boom".to_string()),
        };
        let value = err.to_failure_value();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Claude CLI exited unexpectedly");
        assert_eq!(value["details"]["stderr"], "boom");
    }

    #[test]
    fn checkpoint_not_found_is_recognized() {
        let err = BridgeError::CheckpointNotFound {
            message: "No file checkpoint found for message abc".to_string(),
        };
        assert!(err.is_checkpoint_not_found());
        assert!(!BridgeError::Rewind("other".to_string()).is_checkpoint_not_found());
    }
}
