//! Rewind target resolution.
//!
//! A rewind request names a message uuid, but the engine only keeps file
//! checkpoints for some messages. When the exact target has none, the
//! candidate resolver walks the message parent chain and falls back to the
//! most recent user message, and the retry protocol tries each candidate
//! in order.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use crate::error::BridgeError;
use crate::types::{MessageRecord, RewindOutcome};

/// Upper bound on fallback candidates tried for one rewind request.
pub const MAX_REWIND_CANDIDATES: usize = 8;

/// Time bound on each individual rewind attempt.
pub const REWIND_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(45);

/// Computes the ordered fallback targets for a rewind whose exact target
/// has no checkpoint. Pure over the supplied history; does no I/O.
///
/// The walk follows `parentUuid` links upward from the requested message,
/// collecting every visited uuid, and stops at the first user message with
/// visible text (that anchor is pushed twice; the de-dup pass collapses
/// it). The most recent user text message of the whole log is appended as
/// the final fallback. Cycles and dangling parent links in malformed logs
/// terminate the walk instead of hanging it.
pub fn resolve_candidates(requested_uuid: &str, history: &[MessageRecord]) -> Vec<String> {
    let by_uuid: HashMap<&str, &MessageRecord> = history
        .iter()
        .map(|record| (record.uuid.as_str(), record))
        .collect();

    let mut candidates: Vec<String> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut cursor = Some(requested_uuid);
    while let Some(uuid) = cursor {
        if !visited.insert(uuid) {
            break;
        }
        let Some(record) = by_uuid.get(uuid) else {
            break;
        };
        candidates.push(uuid.to_string());
        if record.is_user_text_message() {
            candidates.push(uuid.to_string());
            break;
        }
        cursor = record.parent_uuid.as_deref();
    }

    if let Some(latest_user) = history.iter().rev().find(|r| r.is_user_text_message()) {
        candidates.push(latest_user.uuid.clone());
    }

    let mut seen: HashSet<String> = HashSet::new();
    candidates
        .into_iter()
        .filter(|uuid| !uuid.is_empty())
        .filter(|uuid| seen.insert(uuid.clone()))
        .take(MAX_REWIND_CANDIDATES)
        .collect()
}

/// Whether a failed attempt leaves room for trying another candidate.
fn attempt_is_retryable(err: &BridgeError) -> bool {
    matches!(
        err,
        BridgeError::CheckpointNotFound { .. } | BridgeError::RewindTimeout { .. }
    )
}

/// Runs the rewind retry protocol.
///
/// The exact requested uuid is attempted first. Only a missing-checkpoint
/// failure opens the fallback path: history is loaded, candidates are
/// resolved, and each is attempted in order until one succeeds. A timeout
/// fails only the attempt it bounded; any other failure aborts the whole
/// protocol immediately. When every candidate fails, the last candidate's
/// error is surfaced.
pub async fn rewind_with_fallback<A, AFut, H>(
    requested_uuid: &str,
    mut attempt: A,
    load_history: H,
) -> Result<RewindOutcome, BridgeError>
where
    A: FnMut(String) -> AFut,
    AFut: Future<Output = Result<(), BridgeError>>,
    H: FnOnce() -> Result<Vec<MessageRecord>, BridgeError>,
{
    let first_error = match attempt(requested_uuid.to_string()).await {
        Ok(()) => {
            return Ok(RewindOutcome {
                requested_uuid: requested_uuid.to_string(),
                used_uuid: requested_uuid.to_string(),
            });
        }
        Err(err) if err.is_checkpoint_not_found() => err,
        Err(err) => return Err(err),
    };

    let history = load_history()?;
    let candidates = resolve_candidates(requested_uuid, &history);
    let mut last_error = first_error;
    for candidate in candidates {
        if candidate == requested_uuid {
            continue;
        }
        match attempt(candidate.clone()).await {
            Ok(()) => {
                return Ok(RewindOutcome {
                    requested_uuid: requested_uuid.to_string(),
                    used_uuid: candidate,
                });
            }
            Err(err) if attempt_is_retryable(&err) => {
                last_error = err;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_error)
}
