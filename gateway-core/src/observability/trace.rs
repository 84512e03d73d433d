//! Per-request trace events. Handlers and proxies emit granular events
//! against the current request id; a background writer persists them so a
//! single request id fetches the full causal chain.

use serde::Serialize;
use tokio::sync::mpsc;

/// Request id attached to request extensions by the traffic logger.
#[derive(Debug, Clone, Default)]
pub struct RequestId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceLevel {
    Info,
    Warn,
    Error,
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::Info => "INFO",
            TraceLevel::Warn => "WARN",
            TraceLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub request_id: String,
    pub level: TraceLevel,
    pub component: String,
    pub message: String,
}

/// Cloneable handle feeding the background trace writer.
#[derive(Debug, Clone)]
pub struct TraceSink {
    tx: mpsc::UnboundedSender<TraceEvent>,
}

impl TraceSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TraceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn info(&self, request_id: &str, component: &str, message: impl Into<String>) {
        self.emit(request_id, TraceLevel::Info, component, message.into());
    }

    pub fn warn(&self, request_id: &str, component: &str, message: impl Into<String>) {
        self.emit(request_id, TraceLevel::Warn, component, message.into());
    }

    pub fn error(&self, request_id: &str, component: &str, message: impl Into<String>) {
        self.emit(request_id, TraceLevel::Error, component, message.into());
    }

    fn emit(&self, request_id: &str, level: TraceLevel, component: &str, message: String) {
        // Events without a request id cannot be correlated; skip them.
        if request_id.is_empty() {
            return;
        }
        let event = TraceEvent {
            request_id: request_id.to_string(),
            level,
            component: component.to_string(),
            message,
        };
        if self.tx.send(event).is_err() {
            tracing::warn!("Trace writer is gone, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = TraceSink::new();
        sink.info("req-1", "REST", "Proxying to http://upstream");
        sink.error("req-1", "REST", "Upstream transport error");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.level, TraceLevel::Info);
        assert_eq!(first.component, "REST");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, TraceLevel::Error);
        assert_eq!(second.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_empty_request_id_is_skipped() {
        let (sink, mut rx) = TraceSink::new();
        sink.info("", "REST", "orphan event");
        sink.info("req-2", "gRPC", "kept");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request_id, "req-2");
    }
}
