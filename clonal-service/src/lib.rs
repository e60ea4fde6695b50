// Clonal Service Library
// Orchestrates the clonal-evolution analysis pipeline over external tools

pub mod config;
pub mod error;
pub mod execution;
pub mod futures;
pub mod operations;
pub mod orchestrator;
pub mod runners;
pub mod stages;
pub mod template;

// Re-export commonly used types
pub use config::FlowConfig;
pub use error::{ServiceError, ServiceResult};

// Re-export handle types
pub use futures::{FutureRegistry, HandleId, HandleState, OutputSet, TaskFailure, TaskHandle, TaskStatus};

// Re-export execution types
pub use execution::{
    progress_channel, EventSender, ExecutionEvent, FanOutRun, FanOutRunner, LogLevel,
    PipelineComposer, PipelineRun, ProgressReceiver, ProgressSender, StageInput, TaskExecutor,
};

pub use operations::{Operation, OperationCall};
pub use orchestrator::Orchestrator;
pub use runners::{ProcessInvocation, ProcessOutcome, ProcessRunner, Shell, ShellRunner};
pub use stages::StageKind;
