// Task Executor
// Turns one stage invocation into an asynchronously resolving task handle

use crate::config::FlowConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::futures::handle::{
    HandleId, HandleResolver, HandleState, OutputSet, TaskFailure, TaskHandle, TaskStatus,
};
use crate::futures::registry::FutureRegistry;
use crate::runners::{ProcessInvocation, ProcessRunner, ShellRunner};
use crate::stages::{Arity, OutputPlacement, StageKind};
use crate::template::{self, TemplateContext};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Where a stage input comes from
#[derive(Debug, Clone)]
pub enum InputSource {
    /// A file supplied by the caller; must exist at launch
    File(PathBuf),
    /// A named output of an upstream task; only its path is needed at launch
    Upstream { handle: TaskHandle, output: String },
}

/// One input of a stage invocation
#[derive(Debug, Clone)]
pub struct StageInput {
    pub source: InputSource,
    /// Name reported when this input's upstream fails during a fan-in
    pub label: Option<String>,
}

impl StageInput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: InputSource::File(path.into()),
            label: None,
        }
    }

    pub fn upstream(handle: &TaskHandle, output: &str) -> Self {
        Self {
            source: InputSource::Upstream {
                handle: handle.clone(),
                output: output.to_string(),
            },
            label: None,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// An input resolved to a concrete path
#[derive(Debug, Clone)]
struct ResolvedInput {
    name: &'static str,
    path: PathBuf,
}

/// An upstream task a launch must wait for
#[derive(Debug, Clone)]
struct Dependency {
    handle: TaskHandle,
    label: String,
}

/// What runs once upstream has resolved
#[derive(Debug, Clone)]
enum TaskAction {
    Process(ProcessInvocation),
    MergeDocuments {
        inputs: Vec<PathBuf>,
        output: PathBuf,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
    },
}

/// Launches stage invocations and registers their handles
pub struct TaskExecutor {
    config: Arc<FlowConfig>,
    registry: Arc<FutureRegistry>,
    runner: Arc<dyn ProcessRunner>,
    /// Bounds the number of external processes in flight
    pool: Arc<Semaphore>,
    event_tx: Option<ProgressSender>,
}

impl TaskExecutor {
    /// Create an executor running stage commands through the configured shell
    pub fn new(config: FlowConfig, registry: Arc<FutureRegistry>) -> Self {
        let runner = ShellRunner::with_shell(config.shell);
        tracing::debug!(
            shell = ?runner.shell(),
            max_concurrent_processes = config.max_concurrent_processes,
            "executor ready"
        );
        let runner = Arc::new(runner);
        let pool = Arc::new(Semaphore::new(config.max_concurrent_processes.max(1)));
        Self {
            config: Arc::new(config),
            registry,
            runner,
            pool,
            event_tx: None,
        }
    }

    /// Replace the process runner
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FutureRegistry> {
        &self.registry
    }

    pub(crate) fn events(&self) -> &Option<ProgressSender> {
        &self.event_tx
    }

    /// Launch `stage` into `run_dir/<stage>` under a freshly allocated id
    pub fn execute(
        &self,
        stage: StageKind,
        inputs: Vec<StageInput>,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        let id = self.registry.allocate_id(stage.name());
        self.execute_as(id, stage, inputs, run_dir)
    }

    /// Launch `stage` into `run_dir/<stage>` under a caller-allocated id.
    ///
    /// Returns immediately with a pending handle. Composition errors
    /// (arity, unknown outputs or placeholders, missing files, duplicate
    /// ids) are returned here; process failures only surface when the
    /// handle is waited on.
    pub fn execute_as(
        &self,
        id: HandleId,
        stage: StageKind,
        inputs: Vec<StageInput>,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        let resolved = resolve_inputs(stage, &inputs)?;
        let dependencies = collect_dependencies(&inputs);

        let run_dir = std::path::absolute(run_dir)?;
        let task_dir = run_dir.join(stage.name());
        let output_dir = match stage.schema().placement {
            OutputPlacement::TaskDir => task_dir.clone(),
            OutputPlacement::RunDir => run_dir.clone(),
        };
        let outputs = OutputSet::declare(stage, &output_dir);
        let action = self.build_action(stage, &resolved, &outputs, &task_dir)?;

        if self.registry.contains(&id) {
            return Err(ServiceError::DuplicateRegistration(id));
        }
        if task_dir.exists() {
            self.event_tx.send_event(ExecutionEvent::warning(format!(
                "replacing previous {} output in {}",
                stage,
                task_dir.display()
            )));
        }
        prepare_task_dir(stage, &task_dir, &outputs)?;

        let (handle, resolver) = TaskHandle::pending(id, stage, task_dir.clone(), outputs);
        self.registry.register(handle.clone())?;

        tracing::info!(
            handle = %handle.id(),
            stage = %stage,
            task_dir = %task_dir.display(),
            upstream = dependencies.len(),
            "task scheduled"
        );
        self.event_tx.send_event(ExecutionEvent::TaskScheduled {
            handle_id: handle.id().clone(),
            stage,
            task_dir,
            upstream: dependencies.iter().map(|d| d.handle.id().clone()).collect(),
        });

        let worker = TaskWorker {
            id: handle.id().clone(),
            stage,
            stderr_path: handle.stderr_path(),
            dependencies,
            action,
            runner: self.runner.clone(),
            pool: self.pool.clone(),
            event_tx: self.event_tx.clone(),
        };
        tokio::spawn(worker.run(resolver));

        Ok(handle)
    }

    fn build_action(
        &self,
        stage: StageKind,
        inputs: &[ResolvedInput],
        outputs: &OutputSet,
        task_dir: &Path,
    ) -> ServiceResult<TaskAction> {
        let stdout_path = task_dir.join("stdout.txt");
        let stderr_path = task_dir.join("stderr.txt");

        if stage.is_builtin() {
            let output = outputs.at(0)?.to_path_buf();
            return Ok(TaskAction::MergeDocuments {
                inputs: inputs.iter().map(|i| i.path.clone()).collect(),
                output,
                stdout_path,
                stderr_path,
            });
        }

        let mut context = TemplateContext {
            stage: Some(stage),
            task_dir: Some(task_dir),
            ..Default::default()
        };
        for input in inputs {
            context.inputs.insert(input.name, input.path.as_path());
        }
        for (name, path) in outputs.named() {
            context.outputs.insert(name, path);
        }
        for spec in stage.schema().scratch_dirs {
            context.dirs.insert(spec.name, task_dir.join(spec.file_name));
        }
        for (name, value) in &self.config.params {
            context.params.insert(name.as_str(), value.as_str());
        }
        for name in ["vcf_type", "alpha", "cluster_type"] {
            if let Some(value) = self.config.param(name) {
                context.params.entry(name).or_insert(value);
            }
        }

        let script = template::render(self.config.command_for(stage), &context)?;

        Ok(TaskAction::Process(ProcessInvocation {
            script,
            working_dir: std::path::absolute(&self.config.tools_dir)?,
            env: self.config.env.clone(),
            stdout_path,
            stderr_path,
        }))
    }
}

/// Check arity and existence, and map every input to its path
fn resolve_inputs(stage: StageKind, inputs: &[StageInput]) -> ServiceResult<Vec<ResolvedInput>> {
    if inputs.is_empty() {
        return Err(ServiceError::MissingInput(format!(
            "stage '{}' was given no inputs",
            stage
        )));
    }

    let names: Vec<&'static str> = match stage.schema().inputs {
        Arity::Fixed(names) => {
            if names.len() != inputs.len() {
                return Err(ServiceError::MissingInput(format!(
                    "stage '{}' expects {} inputs ({}), got {}",
                    stage,
                    names.len(),
                    names.join(", "),
                    inputs.len()
                )));
            }
            names.to_vec()
        }
        Arity::Variadic(name) => vec![name; inputs.len()],
    };

    names
        .into_iter()
        .zip(inputs)
        .map(|(name, input)| {
            let path = match &input.source {
                InputSource::File(path) => {
                    if !path.exists() {
                        return Err(ServiceError::MissingInput(format!(
                            "input '{}' of stage '{}' does not exist: {}",
                            name,
                            stage,
                            path.display()
                        )));
                    }
                    std::path::absolute(path)?
                }
                InputSource::Upstream { handle, output } => {
                    handle.outputs().get(output)?.to_path_buf()
                }
            };
            Ok(ResolvedInput { name, path })
        })
        .collect()
}

/// Distinct upstream handles, in input order
fn collect_dependencies(inputs: &[StageInput]) -> Vec<Dependency> {
    let mut seen = HashSet::new();
    inputs
        .iter()
        .filter_map(|input| match &input.source {
            InputSource::Upstream { handle, .. } if seen.insert(handle.id().clone()) => {
                Some(Dependency {
                    handle: handle.clone(),
                    label: input
                        .label
                        .clone()
                        .unwrap_or_else(|| handle.id().to_string()),
                })
            }
            _ => None,
        })
        .collect()
}

/// Give the task a clean directory, replacing any earlier run of the same stage
fn prepare_task_dir(stage: StageKind, task_dir: &Path, outputs: &OutputSet) -> ServiceResult<()> {
    if task_dir.exists() {
        tracing::debug!(task_dir = %task_dir.display(), "replacing previous task directory");
        fs::remove_dir_all(task_dir)?;
    }
    fs::create_dir_all(task_dir)?;

    for spec in stage.schema().scratch_dirs {
        fs::create_dir_all(task_dir.join(spec.file_name))?;
    }
    if stage.schema().placement == OutputPlacement::RunDir {
        for path in outputs.paths() {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
    }
    Ok(())
}

/// Everything a spawned task needs after the launch call has returned
struct TaskWorker {
    id: HandleId,
    stage: StageKind,
    stderr_path: PathBuf,
    dependencies: Vec<Dependency>,
    action: TaskAction,
    runner: Arc<dyn ProcessRunner>,
    pool: Arc<Semaphore>,
    event_tx: Option<ProgressSender>,
}

impl TaskWorker {
    async fn run(self, resolver: HandleResolver) {
        if let Err(failure) = self.await_dependencies().await {
            let reason = match &failure {
                TaskFailure::Partial {
                    failed_instances, ..
                } => format!("failed instances: {}", failed_instances.join(", ")),
                TaskFailure::Process { handle_id, .. } | TaskFailure::Aborted(handle_id) => {
                    format!("upstream {} failed", handle_id)
                }
            };
            tracing::warn!(handle = %self.id, stage = %self.stage, %reason, "task skipped");
            self.event_tx.send_event(ExecutionEvent::TaskSkipped {
                handle_id: self.id.clone(),
                stage: self.stage,
                reason,
            });
            resolver.resolve(HandleState::Failed(failure));
            return;
        }

        let state = match &self.action {
            TaskAction::Process(invocation) => self.run_process(invocation).await,
            TaskAction::MergeDocuments {
                inputs,
                output,
                stdout_path,
                stderr_path,
            } => {
                self.run_merge(inputs, output, stdout_path, stderr_path)
                    .await
            }
        };
        resolver.resolve(state);
    }

    /// Wait for every upstream task, even after one has failed
    async fn await_dependencies(&self) -> Result<(), TaskFailure> {
        let mut failures = Vec::new();
        for dependency in &self.dependencies {
            if let Err(failure) = dependency.handle.outcome().await {
                failures.push((dependency.label.clone(), failure));
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        if self.stage.is_fan_in() {
            return Err(TaskFailure::Partial {
                failed_instances: failures.into_iter().map(|(label, _)| label).collect(),
                total: self.dependencies.len(),
            });
        }
        // Report the root cause rather than this stage
        Err(failures.swap_remove(0).1)
    }

    async fn run_process(&self, invocation: &ProcessInvocation) -> HandleState {
        let _permit = match self.pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return HandleState::Failed(TaskFailure::Aborted(self.id.clone())),
        };

        tracing::debug!(handle = %self.id, script = %invocation.script, "launching process");
        self.event_tx.send_event(ExecutionEvent::TaskStarted {
            handle_id: self.id.clone(),
            stage: self.stage,
        });

        let outcome = self.runner.run(invocation).await;

        if let Some(message) = &outcome.launch_error {
            append_diagnostic(&self.stderr_path, message).await;
            self.event_tx.send_event(ExecutionEvent::error(format!(
                "{} could not be launched: {}",
                self.id, message
            )));
        }
        self.finish(outcome.success(), outcome.exit_code, outcome.duration)
    }

    async fn run_merge(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> HandleState {
        let start = Instant::now();
        self.event_tx.send_event(ExecutionEvent::TaskStarted {
            handle_id: self.id.clone(),
            stage: self.stage,
        });

        let result = merge_documents(inputs, output).await;
        let (stdout, stderr) = match &result {
            Ok(()) => (
                format!("merged {} documents into {}\n", inputs.len(), output.display()),
                String::new(),
            ),
            Err(e) => {
                self.event_tx.send_event(ExecutionEvent::error(format!(
                    "{} merge failed: {}",
                    self.id, e
                )));
                (String::new(), format!("{}\n", e))
            }
        };
        if let Err(e) = tokio::fs::write(stdout_path, stdout).await {
            tracing::warn!(error = %e, "failed to write stdout capture");
        }
        if let Err(e) = tokio::fs::write(stderr_path, stderr).await {
            tracing::warn!(error = %e, "failed to write stderr capture");
        }

        self.finish(result.is_ok(), None, start.elapsed())
    }

    fn finish(&self, success: bool, exit_code: Option<i32>, duration: Duration) -> HandleState {
        let status = if success {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };

        if success {
            tracing::info!(handle = %self.id, stage = %self.stage, ?duration, "task succeeded");
        } else {
            tracing::warn!(
                handle = %self.id,
                stage = %self.stage,
                ?exit_code,
                stderr = %self.stderr_path.display(),
                "task failed"
            );
        }
        self.event_tx.send_event(ExecutionEvent::task_completed(
            &self.id, self.stage, status, duration, exit_code,
        ));

        if success {
            HandleState::Succeeded
        } else {
            HandleState::Failed(TaskFailure::Process {
                handle_id: self.id.clone(),
                stage: self.stage,
                exit_code,
                stderr_path: self.stderr_path.clone(),
            })
        }
    }
}

async fn append_diagnostic(path: &Path, message: &str) {
    use tokio::io::AsyncWriteExt;

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await;
    match file {
        Ok(mut file) => {
            if let Err(e) = file.write_all(format!("{}\n", message).as_bytes()).await {
                tracing::warn!(error = %e, "failed to record launch error");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to open stderr capture"),
    }
}

/// Read every input as a JSON document and write them as one array, in input order
async fn merge_documents(inputs: &[PathBuf], output: &Path) -> ServiceResult<()> {
    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        let bytes = tokio::fs::read(input).await.map_err(|e| {
            ServiceError::MissingInput(format!("cannot read {}: {}", input.display(), e))
        })?;
        let document: serde_json::Value = serde_json::from_slice(&bytes)?;
        documents.push(document);
    }
    tokio::fs::write(output, serde_json::to_vec(&documents)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::{progress_channel, LogLevel};
    use crate::runners::ProcessOutcome;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_executor(config: FlowConfig) -> TaskExecutor {
        TaskExecutor::new(config, Arc::new(FutureRegistry::new()))
    }

    fn cluster_config() -> FlowConfig {
        FlowConfig::default().with_stage_command(
            StageKind::Cluster,
            "cat {inputs.cluster_input} > {outputs.cluster_fit}; \
             echo assigned > {outputs.cluster_assignment}",
        )
    }

    #[tokio::test]
    async fn test_execute_success_resolves_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "mutation\n").unwrap();
        let executor = make_executor(cluster_config());

        let handle = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();

        assert!(handle.id().as_str().ends_with("_cluster"));
        assert_eq!(handle.task_dir(), dir.path().join("cluster"));

        let outputs = handle.wait().await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(fs::read_to_string(outputs.at(0).unwrap()).unwrap(), "mutation\n");
        assert_eq!(
            fs::read_to_string(outputs.get("cluster_assignment").unwrap()).unwrap(),
            "assigned\n"
        );
        assert!(handle.stdout_path().exists());
        assert!(handle.stderr_path().exists());
        assert!(executor.registry().contains(handle.id()));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_on_wait_only() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let config = FlowConfig::default()
            .with_stage_command(StageKind::Cluster, "echo 'model diverged' >&2; exit 4");
        let executor = make_executor(config);

        // Launch itself succeeds
        let handle = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        match err {
            ServiceError::ProcessFailure {
                exit_code,
                stderr_path,
                stage,
                ..
            } => {
                assert_eq!(exit_code, Some(4));
                assert_eq!(stage, "cluster");
                assert_eq!(stderr_path, handle.stderr_path());
                let stderr = fs::read_to_string(stderr_path).unwrap();
                assert!(stderr.contains("model diverged"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handle.status(), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_commands_run_from_tools_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        fs::write(tools.path().join("model.txt"), "fitted\n").unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let config = FlowConfig::default()
            .with_tools_dir(tools.path())
            .with_stage_command(
                StageKind::Cluster,
                "cat model.txt > {outputs.cluster_fit}; touch {outputs.cluster_assignment}",
            );
        let executor = make_executor(config);

        let handle = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        let outputs = handle.wait().await.unwrap();

        assert_eq!(
            fs::read_to_string(outputs.get("cluster_fit").unwrap()).unwrap(),
            "fitted\n"
        );
    }

    #[tokio::test]
    async fn test_launch_error_reported_in_stderr_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let config = FlowConfig::default()
            .with_tools_dir(dir.path().join("no_such_tools"))
            .with_stage_command(StageKind::Cluster, "touch {outputs.cluster_fit}");
        let (tx, mut rx) = progress_channel();
        let executor = make_executor(config).with_progress(tx);

        let handle = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        let err = handle.wait().await.unwrap_err();
        drop(executor);

        assert!(matches!(err, ServiceError::ProcessFailure { exit_code: None, .. }));
        let stderr = fs::read_to_string(handle.stderr_path()).unwrap();
        assert!(stderr.contains("Failed to spawn"));
        assert!(!handle.outputs().get("cluster_fit").unwrap().exists());

        let mut errors = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::Log {
                level: LogLevel::Error,
                message,
            } = event
            {
                errors.push(message);
            }
        }
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains(handle.id().as_str()));
    }

    #[tokio::test]
    async fn test_missing_declared_output_is_not_checked() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let config = FlowConfig::default().with_stage_command(StageKind::Cluster, "true");
        let executor = make_executor(config);

        let handle = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();

        let outputs = handle.wait().await.unwrap();
        assert!(!outputs.at(0).unwrap().exists());
    }

    #[tokio::test]
    async fn test_rerun_replaces_task_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let executor = make_executor(cluster_config());

        let first = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        first.wait().await.unwrap();
        let stale = first.task_dir().join("stale.txt");
        fs::write(&stale, "left over").unwrap();

        let second = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        second.wait().await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.task_dir(), second.task_dir());
        assert!(!stale.exists());
        assert!(second.outputs().get("cluster_fit").unwrap().exists());
    }

    #[tokio::test]
    async fn test_arity_mismatch_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let executor = make_executor(FlowConfig::default());

        let err = executor
            .execute(StageKind::ClusterTransform, vec![StageInput::file(&input)], dir.path())
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingInput(_)));

        let err = executor
            .execute(StageKind::Cluster, Vec::new(), dir.path())
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingInput(_)));

        // Nothing was launched or registered
        assert!(executor.registry().is_empty());
        assert!(!dir.path().join("cluster").exists());
    }

    #[tokio::test]
    async fn test_nonexistent_file_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let executor = make_executor(FlowConfig::default());

        let err = executor
            .execute(
                StageKind::Cluster,
                vec![StageInput::file(dir.path().join("nope.tsv"))],
                dir.path(),
            )
            .unwrap_err();

        assert!(matches!(err, ServiceError::MissingInput(msg) if msg.contains("nope.tsv")));
    }

    #[tokio::test]
    async fn test_unknown_upstream_output_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let executor = make_executor(cluster_config());

        let cluster = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        let err = executor
            .execute(
                StageKind::TreeBuild,
                vec![StageInput::upstream(&cluster, "tree_input")],
                dir.path(),
            )
            .unwrap_err();

        assert!(matches!(err, ServiceError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let executor = make_executor(cluster_config());
        let id = HandleId::from("future_1_cluster");

        executor
            .execute_as(id.clone(), StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        let err = executor
            .execute_as(id, StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap_err();

        assert!(matches!(err, ServiceError::DuplicateRegistration(_)));
    }

    #[tokio::test]
    async fn test_downstream_waits_for_upstream_and_inherits_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let config = FlowConfig::default()
            .with_stage_command(StageKind::Cluster, "sleep 0.2; exit 7")
            .with_stage_command(StageKind::ClusterTransform, "touch {outputs.tree_input}");
        let executor = make_executor(config);

        let cluster = executor
            .execute(StageKind::Cluster, vec![StageInput::file(&input)], dir.path())
            .unwrap();
        let downstream = executor
            .execute(
                StageKind::ClusterTransform,
                vec![
                    StageInput::file(&input),
                    StageInput::upstream(&cluster, "cluster_assignment"),
                ],
                dir.path(),
            )
            .unwrap();

        assert_eq!(downstream.status(), TaskStatus::Pending);

        let err = downstream.wait().await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::ProcessFailure { ref stage, exit_code: Some(7), .. } if stage == "cluster"
        ));
        // The downstream command never ran
        assert!(!downstream.outputs().at(0).unwrap().exists());
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        struct CountingRunner {
            running: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl ProcessRunner for CountingRunner {
            async fn run(&self, _invocation: &ProcessInvocation) -> ProcessOutcome {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                ProcessOutcome {
                    exit_code: Some(0),
                    launch_error: None,
                    duration: Duration::from_millis(50),
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "x").unwrap();
        let runner = Arc::new(CountingRunner {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let executor = make_executor(FlowConfig::default().with_max_concurrent_processes(2))
            .with_runner(runner.clone());

        let handles: Vec<_> = (0..6)
            .map(|i| {
                executor
                    .execute(
                        StageKind::Cluster,
                        vec![StageInput::file(&input)],
                        &dir.path().join(format!("instance_{}", i)),
                    )
                    .unwrap()
            })
            .collect();
        for handle in &handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_merge_documents_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        fs::write(&a, r#"{"sample": "a"}"#).unwrap();
        fs::write(&b, r#"[1, 2]"#).unwrap();
        let executor = make_executor(FlowConfig::default());

        let handle = executor
            .execute(
                StageKind::AggregateWorkflows,
                vec![StageInput::file(&a), StageInput::file(&b)],
                dir.path(),
            )
            .unwrap();
        let outputs = handle.wait().await.unwrap();

        let merged = outputs.get("aggregated_workflows").unwrap();
        assert_eq!(merged, dir.path().join("aggregated_workflows.json"));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(merged).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!([{"sample": "a"}, [1, 2]]));
    }

    #[tokio::test]
    async fn test_merge_invalid_json_fails_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        fs::write(&a, "not json").unwrap();
        let executor = make_executor(FlowConfig::default());

        let handle = executor
            .execute(StageKind::AggregateWorkflows, vec![StageInput::file(&a)], dir.path())
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, ServiceError::ProcessFailure { exit_code: None, .. }));
        assert!(!fs::read_to_string(handle.stderr_path()).unwrap().is_empty());
    }
}
