pub mod operations;
pub mod replay;
pub mod run;
pub mod run_many;
pub mod stage;

use crate::output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::Result;

use clonal_service::{
    progress_channel, FlowConfig, FutureRegistry, Orchestrator, OutputSet, ProgressReceiver,
    ServiceError, TaskExecutor, TaskHandle,
};

/// Load configuration and apply command-line overrides
pub fn load_config(path: Option<&Path>, max_procs: Option<usize>) -> Result<FlowConfig> {
    let mut config = FlowConfig::load(path)?;
    if let Some(max) = max_procs {
        config = config.with_max_concurrent_processes(max);
        config.validate()?;
    }
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

/// `runs_dir/run_<unix seconds>`
pub fn default_run_dir(config: &FlowConfig) -> Result<PathBuf> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(config.runs_dir.join(format!("run_{}", secs)))
}

/// Build an orchestrator whose progress events arrive on the returned receiver
pub fn orchestrator(config: FlowConfig, session_dir: PathBuf) -> (Orchestrator, ProgressReceiver) {
    let (tx, rx) = progress_channel();
    let executor = TaskExecutor::new(config, Arc::new(FutureRegistry::new())).with_progress(tx);
    (Orchestrator::from_executor(executor, session_dir), rx)
}

/// Print progress until every task has finished, then report each handle's result.
///
/// Takes ownership of the orchestrator so the event channel closes once the
/// last task resolves.
pub async fn follow(
    orchestrator: Orchestrator,
    mut rx: ProgressReceiver,
    handles: Vec<TaskHandle>,
) -> Result<Vec<Result<OutputSet, ServiceError>>> {
    let waiter = tokio::spawn(async move {
        let mut results = Vec::with_capacity(handles.len());
        for handle in &handles {
            results.push(handle.wait().await.cloned());
        }
        results
    });
    drop(orchestrator);

    while let Some(event) = rx.recv().await {
        output::event(&event);
    }

    Ok(waiter.await?)
}

/// Report a failed handle and turn it into the command's error
pub fn report_failure(label: &str, err: ServiceError) -> color_eyre::Report {
    output::failure(&format!("{} failed", label));
    if let ServiceError::ProcessFailure { stderr_path, .. } = &err {
        output::dim(&format!("    stderr: {}", stderr_path.display()));
    }
    color_eyre::eyre::eyre!(err)
}
