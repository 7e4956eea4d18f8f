//! Host-side bridge to the Claude Code CLI.
//!
//! The engine executes tools and streams messages; this crate supplies the
//! coordination the engine does not: a per-session permission gate with a
//! locally-enforced plan mode, mid-turn mode switching, live stream handle
//! tracking, and checkpoint rewind with fallback target resolution.

mod approvals;
mod backend;
mod claude_home;
mod coordinator;
mod error;
mod gate;
mod history;
mod mode_store;
mod registry;
mod rewind;
mod session;
mod settings;
mod types;

pub use approvals::{ApprovalChannel, AutoApproveChannel, FileApprovalChannel};
pub use backend::claude_cli::{check_claude_installation, QueryOptions};
pub use backend::events::{AppServerEvent, BroadcastEventSink, EventSink, NullEventSink};
pub use backend::stream::{EngineMessage, QueryStream, SessionHandle, CHECKPOINT_MISSING_MARKER};
pub use claude_home::{resolve_default_claude_home, resolve_project_dir, resolve_session_path};
pub use coordinator::ModeSwitchCoordinator;
pub use error::BridgeError;
pub use gate::{PermissionGate, ACCEPT_EDITS_TOOLS, EXIT_PLAN_TOOL};
pub use history::{
    load_session_history, record_timestamp_millis, scan_session_metadata, CheckpointHistoryReader,
};
pub use mode_store::SessionModeStore;
pub use registry::SessionHandleRegistry;
pub use rewind::{
    resolve_candidates, rewind_with_fallback, MAX_REWIND_CANDIDATES, REWIND_ATTEMPT_TIMEOUT,
};
pub use session::{SessionManager, TurnOptions};
pub use settings::{read_settings, write_settings, BridgeSettings};
pub use types::{
    ApprovalDecision, ApprovalRequest, ApprovalVerdict, MessageBody, MessageRecord,
    PermissionMode, RewindOutcome,
};
