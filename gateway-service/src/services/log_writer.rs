//! Background persistence of request logs and trace events.
//!
//! The response path only enqueues; this task owns the database writes. A
//! crash loses at most the unflushed tail, which is the accepted trade for
//! keeping observability off the latency path.

use crate::services::Database;
use gateway_core::middleware::RequestLogEntry;
use gateway_core::observability::TraceEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub fn spawn_log_writer(
    db: Database,
    mut request_logs: mpsc::UnboundedReceiver<RequestLogEntry>,
    mut traces: mpsc::UnboundedReceiver<TraceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                entry = request_logs.recv() => match entry {
                    Some(entry) => {
                        if let Err(e) = db.insert_request_log(&entry).await {
                            warn!(request_id = %entry.request_id, error = %e, "Failed to persist request log");
                        }
                    }
                    None => break,
                },
                event = traces.recv() => match event {
                    Some(event) => {
                        if let Err(e) = db.insert_trace_log(&event).await {
                            warn!(request_id = %event.request_id, error = %e, "Failed to persist trace event");
                        }
                    }
                    None => break,
                },
            }
        }
    })
}
