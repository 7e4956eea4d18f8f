use std::env;
use std::path::PathBuf;

pub fn resolve_default_claude_home() -> Option<PathBuf> {
    if let Ok(value) = env::var("CLAUDE_HOME") {
        if !value.trim().is_empty() {
            return Some(PathBuf::from(value.trim()));
        }
    }
    resolve_home_dir().map(|home| home.join(".claude"))
}

fn resolve_home_dir() -> Option<PathBuf> {
    if let Ok(value) = env::var("HOME") {
        if !value.trim().is_empty() {
            return Some(PathBuf::from(value));
        }
    }
    if let Ok(value) = env::var("USERPROFILE") {
        if !value.trim().is_empty() {
            return Some(PathBuf::from(value));
        }
    }
    None
}

/// Directory holding the JSONL session logs for a project path, following
/// the engine's `~/.claude/projects/<encoded-path>` layout.
pub fn resolve_project_dir(project_path: &str) -> Option<PathBuf> {
    let projects_root = resolve_default_claude_home()?.join("projects");
    Some(projects_root.join(encode_project_path(project_path)))
}

pub fn resolve_session_path(project_path: &str, session_id: &str) -> Option<PathBuf> {
    let project_dir = resolve_project_dir(project_path)?;
    let candidate = project_dir.join(format!("{session_id}.jsonl"));
    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

pub fn session_exists(project_path: &str, session_id: &str) -> bool {
    resolve_session_path(project_path, session_id).is_some()
}

fn encode_project_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    if normalized.starts_with('/') {
        format!("-{}", normalized.trim_start_matches('/').replace('/', "-"))
    } else {
        normalized.replace('/', "-")
    }
}
