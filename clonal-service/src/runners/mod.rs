// Runners Module
// Launches the external program behind each stage

pub mod shell;

// Re-export key types
pub use shell::{Shell, ShellRunner};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A fully rendered external process invocation
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    /// Rendered command passed to the shell
    pub script: String,
    /// Directory the process is launched from
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    /// File receiving standard output
    pub stdout_path: PathBuf,
    /// File receiving standard error
    pub stderr_path: PathBuf,
}

/// How an external process ended
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code (None if killed by a signal or never started)
    pub exit_code: Option<i32>,
    /// Set when the process could not be started or awaited
    pub launch_error: Option<String>,
    pub duration: Duration,
}

impl ProcessOutcome {
    pub fn launch_failed(message: String, duration: Duration) -> Self {
        Self {
            exit_code: None,
            launch_error: Some(message),
            duration,
        }
    }

    pub fn success(&self) -> bool {
        self.launch_error.is_none() && self.exit_code == Some(0)
    }
}

/// Trait for process runners
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the invocation to completion
    async fn run(&self, invocation: &ProcessInvocation) -> ProcessOutcome;
}
