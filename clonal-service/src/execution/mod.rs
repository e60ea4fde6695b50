// Execution Engine Module
// Task launching, pipeline composition and fan-out/fan-in

pub mod composer;
pub mod events;
pub mod executor;
pub mod fanout;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export key types
pub use composer::{PipelineComposer, PipelineRun};
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{InputSource, StageInput, TaskExecutor};
pub use fanout::{FanOutRun, FanOutRunner};
