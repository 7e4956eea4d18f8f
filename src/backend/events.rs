use serde_json::{json, Value};
use tokio::sync::broadcast;

/// One notification destined for the consuming frontend.
#[derive(Debug, Clone)]
pub struct AppServerEvent {
    pub session_id: String,
    pub message: Value,
}

/// Sink for frontend notifications. The bridge never blocks on a sink;
/// emission is fire-and-forget.
pub trait EventSink: Send + Sync {
    fn emit_app_server_event(&self, event: AppServerEvent);
}

/// Broadcast-channel sink; the host subscribes and forwards to its UI.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<AppServerEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppServerEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit_app_server_event(&self, event: AppServerEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sink that drops everything. Used by headless embedders and tests.
#[derive(Debug, Clone, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit_app_server_event(&self, _event: AppServerEvent) {}
}

pub fn emit_event(sink: &dyn EventSink, session_id: &str, method: &str, params: Value) {
    sink.emit_app_server_event(AppServerEvent {
        session_id: session_id.to_string(),
        message: json!({
            "method": method,
            "params": params,
        }),
    });
}
