use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BridgeError;

/// Host-side configuration of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Explicit path to the engine binary; `claude` on PATH otherwise.
    pub claude_bin: Option<String>,
    /// Default model for new turns.
    pub model: Option<String>,
    /// Directory the file-based approval channel exchanges files in.
    /// `None` disables the channel (the gate reports no opinion).
    pub approvals_dir: Option<String>,
    /// Cap on each approval wait, in seconds. `None` waits indefinitely,
    /// matching how the engine itself waits on permission prompts.
    pub approval_timeout_secs: Option<u64>,
    /// File checkpointing for spawned streams; required for rewind.
    pub file_checkpoints: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            claude_bin: None,
            model: None,
            approvals_dir: None,
            approval_timeout_secs: None,
            file_checkpoints: true,
        }
    }
}

impl BridgeSettings {
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }
}

/// Reads settings from a JSON file.
///
/// A missing file is not an error: defaults apply and the choice is logged
/// so the user knows what is in force. A file that exists but does not
/// parse is a configuration error naming the path.
pub fn read_settings(path: &Path) -> Result<BridgeSettings, BridgeError> {
    if !path.exists() {
        info!(
            path = %path.display(),
            "no settings file; using defaults (claude on PATH, no approval timeout)"
        );
        return Ok(BridgeSettings::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|err| {
        BridgeError::configuration(format!(
            "Failed to read settings file {}: {err}",
            path.display()
        ))
    })?;
    serde_json::from_str(&contents).map_err(|err| {
        BridgeError::configuration(format!(
            "Settings file {} is not valid JSON: {err}",
            path.display()
        ))
    })
}

pub fn write_settings(path: &Path, settings: &BridgeSettings) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            BridgeError::configuration(format!(
                "Failed to create settings directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents).map_err(|err| {
        BridgeError::configuration(format!(
            "Failed to write settings file {}: {err}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = read_settings(&dir.path().join("settings.json")).expect("defaults");
        assert_eq!(settings, BridgeSettings::default());
        assert!(settings.file_checkpoints);
        assert!(settings.approval_timeout().is_none());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let settings = BridgeSettings {
            claude_bin: Some("/opt/tools/claude".to_string()),
            model: Some("claude-opus-4-5-20251101".to_string()),
            approvals_dir: Some("/tmp/approvals".to_string()),
            approval_timeout_secs: Some(120),
            file_checkpoints: false,
        };
        write_settings(&path, &settings).expect("write");
        let loaded = read_settings(&path).expect("read");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.approval_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn malformed_settings_name_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").expect("seed file");
        let err = read_settings(&path).expect_err("must fail");
        assert!(err.to_string().contains("settings.json"));
    }
}
