use std::env;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::claude_home::session_exists;
use crate::error::BridgeError;
use crate::types::PermissionMode;

/// Everything needed to start one query stream against the engine.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Working directory of the conversation.
    pub cwd: String,
    /// Session id the stream belongs to. Resumes the persisted session if
    /// one exists, otherwise starts fresh under this id.
    pub session_id: String,
    pub permission_mode: PermissionMode,
    pub model: Option<String>,
    pub claude_bin: Option<String>,
    /// File checkpointing must be on for rewind to be available.
    pub file_checkpoints: bool,
}

impl QueryOptions {
    pub fn new(cwd: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            session_id: session_id.into(),
            permission_mode: PermissionMode::Default,
            model: None,
            claude_bin: None,
            file_checkpoints: true,
        }
    }
}

pub(crate) fn build_claude_path_env(claude_bin: Option<&str>) -> Option<String> {
    let mut paths: Vec<String> = env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .collect();
    let mut extras = vec![
        "/opt/homebrew/bin",
        "/usr/local/bin",
        "/usr/bin",
        "/bin",
        "/usr/sbin",
        "/sbin",
    ]
    .into_iter()
    .map(|value| value.to_string())
    .collect::<Vec<String>>();
    if let Ok(home) = env::var("HOME") {
        extras.push(format!("{home}/.local/bin"));
        extras.push(format!("{home}/.local/share/mise/shims"));
        extras.push(format!("{home}/.cargo/bin"));
        extras.push(format!("{home}/.bun/bin"));
        let nvm_root = Path::new(&home).join(".nvm/versions/node");
        if let Ok(entries) = std::fs::read_dir(nvm_root) {
            for entry in entries.flatten() {
                let bin_path = entry.path().join("bin");
                if bin_path.is_dir() {
                    extras.push(bin_path.to_string_lossy().to_string());
                }
            }
        }
    }
    if let Some(bin_path) = claude_bin.filter(|value| !value.trim().is_empty()) {
        if let Some(parent) = Path::new(bin_path).parent() {
            extras.push(parent.to_string_lossy().to_string());
        }
    }
    for extra in extras {
        if !paths.contains(&extra) {
            paths.push(extra);
        }
    }
    if paths.is_empty() {
        None
    } else {
        Some(paths.join(":"))
    }
}

pub(crate) fn build_claude_command_with_bin(claude_bin: Option<String>) -> Command {
    let bin = claude_bin
        .clone()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "claude".into());
    let mut command = Command::new(bin);
    if let Some(path_env) = build_claude_path_env(claude_bin.as_deref()) {
        command.env("PATH", path_env);
    }
    command
}

/// Builds the engine invocation for a bidirectional stream-json query.
///
/// The permission mode sent over the flag is the engine-valid substitute:
/// `plan` never reaches the engine, its enforcement lives in the gate.
pub(crate) fn build_query_command(options: &QueryOptions) -> Command {
    let mut command = build_claude_command_with_bin(options.claude_bin.clone());
    command.current_dir(&options.cwd);
    command.arg("--input-format").arg("stream-json");
    command.arg("--output-format").arg("stream-json");
    command.arg("--verbose");
    command.arg("--add-dir").arg(&options.cwd);
    command
        .arg("--permission-mode")
        .arg(options.permission_mode.engine_value());
    if let Some(model) = options.model.as_deref() {
        if !model.trim().is_empty() {
            command.arg("--model").arg(model);
        }
    }
    if options.file_checkpoints {
        command.arg("--enable-file-checkpoints");
    }
    if session_exists(&options.cwd, &options.session_id) {
        command.arg("--resume").arg(&options.session_id);
    } else {
        command.arg("--session-id").arg(&options.session_id);
    }
    command.stdin(std::process::Stdio::piped());
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    command
}

/// Verifies the engine binary is runnable and reports its version.
pub async fn check_claude_installation(
    claude_bin: Option<String>,
) -> Result<Option<String>, BridgeError> {
    let mut command = build_claude_command_with_bin(claude_bin);
    command.arg("--version");
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let output = match timeout(Duration::from_secs(5), command.output()).await {
        Ok(result) => result.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BridgeError::configuration(
                    "Claude Code CLI not found. Install Claude Code and ensure `claude` is on your PATH.",
                )
            } else {
                BridgeError::configuration(e.to_string())
            }
        })?,
        Err(_) => {
            return Err(BridgeError::configuration(
                "Timed out while checking Claude Code CLI. Make sure `claude --version` runs in a terminal.",
            ));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        if detail.is_empty() {
            return Err(BridgeError::configuration(
                "Claude Code CLI failed to start. Try running `claude --version` in a terminal.",
            ));
        }
        return Err(BridgeError::configuration(format!(
            "Claude Code CLI failed to start: {detail}. Try running `claude --version` in a terminal."
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(if version.is_empty() { None } else { Some(version) })
}
