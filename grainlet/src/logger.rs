//! Logger surface handed to grain handlers.
//!
//! Two implementations, selected at startup: [`PrintLogger`] for oneshot
//! runs with no connection, and [`RemoteLogger`] which ships each call to
//! the orchestrator as a fire-and-forget SYSTEM frame.

use uuid::Uuid;

use crate::connection::FrameSink;
use crate::envelope::LogEnvelope;
use crate::frame::{Frame, MessageType};

/// Severity scale shared with the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Information = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
}

/// What handlers log against. Object-safe so the pipeline can pick the
/// implementation at runtime.
pub trait GrainLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Information, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }
}

/// Plain stdout logger for oneshot mode.
pub struct PrintLogger;

impl GrainLogger for PrintLogger {
    fn log(&self, level: LogLevel, message: &str) {
        println!("LOG:{}: {}", level as u8, message);
    }
}

/// Ships log calls to the orchestrator over the shared connection.
///
/// Each call gets a fresh notification id and is sent asynchronously:
/// the caller never blocks, delivery is not acknowledged, and ordering
/// among concurrent in-flight sends is not guaranteed.
pub struct RemoteLogger {
    sink: FrameSink,
    execution_id: String,
}

impl RemoteLogger {
    pub fn new(sink: FrameSink, execution_id: impl Into<String>) -> Self {
        Self {
            sink,
            execution_id: execution_id.into(),
        }
    }
}

impl GrainLogger for RemoteLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let envelope = LogEnvelope::new(level, &self.execution_id, message);
        let body = match serde_json::to_string(&envelope) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping log notification that failed to serialize");
                return;
            }
        };

        let frame = Frame::new(MessageType::System, Uuid::new_v4().to_string(), body);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(frame).await {
                tracing::warn!(error = %e, "Failed to forward log notification");
            }
        });
    }
}
