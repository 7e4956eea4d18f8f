//! Reader for persisted session logs.
//!
//! The engine appends one JSON record per line to
//! `~/.claude/projects/<encoded-path>/<session-id>.jsonl`. Rewind target
//! resolution needs the user/assistant message graph from that log;
//! malformed lines are skipped, never fatal.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::DateTime;
use serde_json::Value;
use tracing::warn;

use crate::claude_home::resolve_session_path;
use crate::error::BridgeError;
use crate::types::MessageRecord;

/// Loads message history for sessions of one project directory.
#[derive(Debug, Clone)]
pub struct CheckpointHistoryReader {
    project_path: String,
}

impl CheckpointHistoryReader {
    pub fn new(project_path: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
        }
    }

    /// Reads the full message history of a session, in log order.
    pub fn read(&self, session_id: &str) -> Result<Vec<MessageRecord>, BridgeError> {
        let path = resolve_session_path(&self.project_path, session_id).ok_or_else(|| {
            BridgeError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        load_session_history(&path)
    }
}

/// Parses a JSONL session log into message records, skipping lines that are
/// empty, unparseable, or missing a uuid.
pub fn load_session_history(path: &Path) -> Result<Vec<MessageRecord>, BridgeError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => continue,
        };
        if line.trim().is_empty() {
            continue;
        }
        let record: MessageRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), "skipping malformed session log line: {err}");
                continue;
            }
        };
        if record.uuid.is_empty() {
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

/// Summary of a session log: first user prompt, user/assistant message
/// count, and the newest record timestamp. Used for thread previews;
/// tolerant of unreadable files.
pub fn scan_session_metadata(path: &Path) -> (Option<String>, Option<i64>, Option<i64>) {
    let records = match load_session_history(path) {
        Ok(records) => records,
        Err(_) => return (None, None, None),
    };
    let mut first_prompt = None;
    let mut message_count: i64 = 0;
    let mut updated_at: Option<i64> = None;
    for record in &records {
        if record.record_type == "user" || record.record_type == "assistant" {
            message_count += 1;
        }
        if let Some(millis) = record_timestamp_millis(record) {
            updated_at = Some(updated_at.map_or(millis, |current: i64| current.max(millis)));
        }
        if first_prompt.is_none() && record.is_user_text_message() {
            first_prompt = record.message.as_ref().map(|body| match &body.content {
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
                    .join(""),
                _ => String::new(),
            });
        }
    }
    (
        first_prompt.filter(|text| !text.is_empty()),
        if message_count > 0 {
            Some(message_count)
        } else {
            None
        },
        updated_at,
    )
}

/// Millisecond timestamp of a record. Accepts RFC 3339 strings and raw
/// epoch numbers; second-precision numbers are scaled to milliseconds.
pub fn record_timestamp_millis(record: &MessageRecord) -> Option<i64> {
    match record.timestamp.as_ref()? {
        Value::String(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.timestamp_millis())
            .ok(),
        Value::Number(value) => value.as_i64().map(|raw| {
            if raw < 1_000_000_000_000 {
                raw * 1000
            } else {
                raw
            }
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp log");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    #[test]
    fn loads_records_and_skips_malformed_lines() {
        let log = write_log(&[
            r#"{"uuid":"a","parentUuid":null,"type":"user","message":{"content":"hi"}}"#,
            "not json at all",
            "",
            r#"{"uuid":"b","parentUuid":"a","type":"assistant","message":{"content":[]}}"#,
            r#"{"type":"system","subtype":"init"}"#,
        ]);
        let records = load_session_history(log.path()).expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].uuid, "a");
        assert_eq!(records[1].parent_uuid.as_deref(), Some("a"));
    }

    #[test]
    fn metadata_scan_finds_first_prompt_count_and_timestamp() {
        let log = write_log(&[
            r#"{"uuid":"a","type":"user","message":{"content":[{"type":"text","text":"first prompt"}],"role":"user"},"timestamp":"2026-01-05T10:00:00Z"}"#,
            r#"{"uuid":"b","parentUuid":"a","type":"assistant","message":{"content":[{"type":"text","text":"reply"}]},"timestamp":"2026-01-05T10:00:30Z"}"#,
            r#"{"uuid":"c","parentUuid":"b","type":"user","message":{"content":"second"}}"#,
        ]);
        let (first_prompt, count, updated_at) = scan_session_metadata(log.path());
        assert_eq!(first_prompt.as_deref(), Some("first prompt"));
        assert_eq!(count, Some(3));
        assert_eq!(updated_at, Some(1_767_607_230_000));
    }

    #[test]
    fn timestamps_parse_from_strings_and_numbers() {
        let record: MessageRecord = serde_json::from_str(
            r#"{"uuid":"a","type":"user","timestamp":"2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(record_timestamp_millis(&record), Some(1_767_607_200_000));

        let seconds: MessageRecord =
            serde_json::from_str(r#"{"uuid":"b","type":"user","timestamp":1767607200}"#).unwrap();
        assert_eq!(record_timestamp_millis(&seconds), Some(1_767_607_200_000));

        let millis: MessageRecord =
            serde_json::from_str(r#"{"uuid":"c","type":"user","timestamp":1767607200123}"#)
                .unwrap();
        assert_eq!(record_timestamp_millis(&millis), Some(1_767_607_200_123));
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = Path::new("/definitely/not/here.jsonl");
        assert!(load_session_history(missing).is_err());
    }
}
