// Shell Runner
// Launches stage commands through a shell with stdout/stderr captured to files

use crate::runners::{ProcessInvocation, ProcessOutcome, ProcessRunner};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shell {
    /// POSIX sh (cmd on Windows)
    #[serde(rename = "sh")]
    Default,
    /// Bash shell
    #[serde(rename = "bash")]
    Bash,
}

impl Shell {
    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            Shell::Bash => ("bash", &["-c"]),
        }
    }

    /// Fall back to the default shell when bash is not installed
    pub fn resolve(self) -> Self {
        match self {
            Shell::Bash if which::which("bash").is_err() => {
                tracing::warn!("bash not found on PATH, falling back to sh");
                Shell::Default
            }
            shell => shell,
        }
    }
}

/// Shell runner for stage commands
pub struct ShellRunner {
    shell: Shell,
}

impl ShellRunner {
    /// Create a new shell runner with the default shell
    pub fn new() -> Self {
        Self {
            shell: Shell::Default,
        }
    }

    /// Create a shell runner with a specific shell
    pub fn with_shell(shell: Shell) -> Self {
        Self {
            shell: shell.resolve(),
        }
    }

    pub fn shell(&self) -> Shell {
        self.shell
    }

    async fn run_with_shell(&self, invocation: &ProcessInvocation) -> ProcessOutcome {
        let start = Instant::now();
        let (shell_cmd, shell_args) = self.shell.get_command();

        let (stdout, stderr) = match open_capture_files(invocation) {
            Ok(files) => files,
            Err(e) => {
                return ProcessOutcome::launch_failed(
                    format!("Failed to create capture files: {}", e),
                    start.elapsed(),
                );
            }
        };

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(&invocation.script);
        cmd.current_dir(&invocation.working_dir);
        cmd.envs(&invocation.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));

        // Spawn the process
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ProcessOutcome::launch_failed(
                    format!("Failed to spawn shell process '{}': {}", shell_cmd, e),
                    start.elapsed(),
                );
            }
        };

        match child.wait().await {
            Ok(status) => ProcessOutcome {
                exit_code: status.code(),
                launch_error: None,
                duration: start.elapsed(),
            },
            Err(e) => ProcessOutcome::launch_failed(
                format!("Failed to wait for shell process: {}", e),
                start.elapsed(),
            ),
        }
    }
}

fn open_capture_files(invocation: &ProcessInvocation) -> std::io::Result<(File, File)> {
    let stdout = File::create(&invocation.stdout_path)?;
    let stderr = File::create(&invocation.stderr_path)?;
    Ok((stdout, stderr))
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, invocation: &ProcessInvocation) -> ProcessOutcome {
        self.run_with_shell(invocation).await
    }
}
