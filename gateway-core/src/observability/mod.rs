pub mod log_buffer;
pub mod logging;
pub mod trace;

pub use log_buffer::{LogBuffer, LogLine};
pub use logging::init_tracing;
pub use trace::{RequestId, TraceEvent, TraceLevel, TraceSink};
