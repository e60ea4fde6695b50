// Execution Events
// Progress reporting for launched tasks and fan-out runs

use crate::futures::handle::{HandleId, TaskStatus};
use crate::stages::StageKind;

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while tasks run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Task composed and handed to the executor
    TaskScheduled {
        handle_id: HandleId,
        stage: StageKind,
        task_dir: PathBuf,
        upstream: Vec<HandleId>,
    },

    /// Upstream resolved and a worker slot was acquired
    TaskStarted { handle_id: HandleId, stage: StageKind },

    /// Task resolved
    TaskCompleted {
        handle_id: HandleId,
        stage: StageKind,
        status: TaskStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Task never launched because an upstream task failed
    TaskSkipped {
        handle_id: HandleId,
        stage: StageKind,
        reason: String,
    },

    /// A fan-out instance was composed
    InstanceScheduled {
        instance: String,
        root: PathBuf,
        terminal: HandleId,
    },

    /// The fan-in aggregation was scheduled over every instance
    FanInScheduled { handle_id: HandleId, instances: usize },

    /// Log message (info, warning, error)
    Log { level: LogLevel, message: String },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a task completed event
    pub fn task_completed(
        handle_id: &HandleId,
        stage: StageKind,
        status: TaskStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::TaskCompleted {
            handle_id: handle_id.clone(),
            stage,
            status,
            duration,
            exit_code,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
