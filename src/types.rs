use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Permission mode in force for a session.
///
/// `Plan` is enforced by this crate, not by the engine: the engine never
/// receives `plan` as a configuration value, so [`PermissionMode::engine_value`]
/// substitutes `default` and the gate suppresses tool execution instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Default
    }
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }

    /// The value actually sent to the engine's `--permission-mode` flag.
    pub fn engine_value(&self) -> &'static str {
        match self {
            PermissionMode::Plan => "default",
            other => other.as_str(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(PermissionMode::Default),
            "acceptEdits" => Some(PermissionMode::AcceptEdits),
            "bypassPermissions" => Some(PermissionMode::BypassPermissions),
            "plan" => Some(PermissionMode::Plan),
            _ => None,
        }
    }
}

/// Outcome of a single tool-use evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny { reason: String },
    /// No explicit policy applies; the engine proceeds with its own flow.
    Indeterminate,
}

impl ApprovalDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        ApprovalDecision::Deny {
            reason: reason.into(),
        }
    }

    /// Adapt the decision into the engine's hook-response encoding.
    pub fn to_engine_response(&self) -> Value {
        match self {
            ApprovalDecision::Approve => json!({ "behavior": "allow" }),
            ApprovalDecision::Deny { reason } => json!({
                "behavior": "deny",
                "message": reason,
            }),
            ApprovalDecision::Indeterminate => json!({}),
        }
    }
}

/// One pending request on the human-approval channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_input: Value,
}

/// The answer read back from the human-approval channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalVerdict {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Target execution mode carried by an approved exit-plan request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PermissionMode>,
}

/// One entry of a persisted session log (one JSON record per line).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: Value,
}

impl MessageRecord {
    /// Whether this record is a user message carrying visible text, either
    /// as a plain string or as at least one non-empty text content block.
    pub fn is_user_text_message(&self) -> bool {
        if self.record_type != "user" {
            return false;
        }
        let Some(body) = &self.message else {
            return false;
        };
        match &body.content {
            Value::String(text) => !text.trim().is_empty(),
            Value::Array(blocks) => blocks.iter().any(|block| {
                block.get("type").and_then(|v| v.as_str()) == Some("text")
                    && block
                        .get("text")
                        .and_then(|v| v.as_str())
                        .map(|text| !text.trim().is_empty())
                        .unwrap_or(false)
            }),
            _ => false,
        }
    }
}

/// Result of a rewind request; `used_uuid` differs from `requested_uuid`
/// when a fallback candidate was applied.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewindOutcome {
    pub requested_uuid: String,
    pub used_uuid: String,
}
