// Orchestrator
// Caller-facing API over the registry, executor, composer and fan-out runner

use crate::config::FlowConfig;
use crate::error::ServiceResult;
use crate::execution::composer::{self, PipelineComposer};
use crate::execution::executor::{StageInput, TaskExecutor};
use crate::execution::fanout::FanOutRunner;
use crate::futures::handle::{HandleId, TaskHandle, TaskStatus};
use crate::futures::registry::FutureRegistry;
use crate::operations::Operation;
use crate::stages::StageKind;

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns one registry and everything that launches tasks into it.
///
/// Calls made by id (`submit`, `call`) run inside the session directory:
/// each task under `session_dir/<handle id>/<stage>` and each workflow
/// under its own `session_dir/<workflow id>`.
pub struct Orchestrator {
    registry: Arc<FutureRegistry>,
    executor: Arc<TaskExecutor>,
    composer: Arc<PipelineComposer>,
    fan_out: FanOutRunner,
    session_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(config: FlowConfig, session_dir: impl Into<PathBuf>) -> Self {
        let executor = TaskExecutor::new(config, Arc::new(FutureRegistry::new()));
        Self::from_executor(executor, session_dir)
    }

    /// Wrap an executor that has already been configured, e.g. with a progress sender
    pub fn from_executor(executor: TaskExecutor, session_dir: impl Into<PathBuf>) -> Self {
        let registry = executor.registry().clone();
        let executor = Arc::new(executor);
        let composer = Arc::new(PipelineComposer::new(executor.clone()));
        let fan_out = FanOutRunner::new(composer.clone());
        Self {
            registry,
            executor,
            composer,
            fan_out,
            session_dir: session_dir.into(),
        }
    }

    pub fn registry(&self) -> &Arc<FutureRegistry> {
        &self.registry
    }

    pub fn composer(&self) -> &Arc<PipelineComposer> {
        &self.composer
    }

    pub fn fan_out(&self) -> &FanOutRunner {
        &self.fan_out
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Launch one stage from files
    pub fn submit(&self, stage: StageKind, inputs: Vec<PathBuf>) -> ServiceResult<HandleId> {
        let inputs = inputs.into_iter().map(StageInput::file).collect();
        self.launch(stage, inputs)
    }

    /// Wait for a handle and return its output paths
    pub async fn resolve(&self, id: &HandleId) -> ServiceResult<Vec<PathBuf>> {
        let handle = self.handle(id)?;
        let outputs = handle.wait().await?;
        Ok(outputs.paths().to_vec())
    }

    pub fn handle(&self, id: &HandleId) -> ServiceResult<TaskHandle> {
        self.registry.resolve(id)
    }

    pub fn status(&self, id: &HandleId) -> ServiceResult<TaskStatus> {
        Ok(self.registry.resolve(id)?.status())
    }

    /// Compose the five-stage pipeline; returns the terminal handle's id
    pub fn run_pipeline(&self, root: &Path, run_dir: &Path) -> ServiceResult<HandleId> {
        let run = self.composer.run_pipeline(root, run_dir)?;
        Ok(run.terminal().id().clone())
    }

    /// Fan out over `roots`; returns the fan-in handle's id
    pub fn run_many(&self, roots: &[PathBuf], run_dir: &Path) -> ServiceResult<HandleId> {
        let run = self.fan_out.run_many(roots, run_dir)?;
        Ok(run.terminal().id().clone())
    }

    /// Invoke an operation by name with JSON arguments
    pub fn call(&self, name: &str, arguments: Value) -> ServiceResult<HandleId> {
        self.dispatch(Operation::from_call(name, arguments)?)
    }

    pub fn dispatch(&self, operation: Operation) -> ServiceResult<HandleId> {
        tracing::info!(operation = operation.name(), "dispatching operation");

        match operation {
            Operation::TransformFromFiles { vcf } => self.submit(StageKind::Transform, vec![vcf]),
            Operation::ClusterFromFiles { cluster_input } => {
                self.submit(StageKind::Cluster, vec![cluster_input])
            }
            Operation::ClusterFromFutures { transform_id } => {
                let transform = self.handle(&transform_id)?;
                self.launch(StageKind::Cluster, composer::cluster_inputs(&transform)?)
            }
            Operation::ClusterTransformFromFiles {
                cluster_input,
                cluster_assignment,
            } => self.submit(
                StageKind::ClusterTransform,
                vec![cluster_input, cluster_assignment],
            ),
            Operation::ClusterTransformFromFutures {
                transform_id,
                cluster_id,
            } => {
                let transform = self.handle(&transform_id)?;
                let cluster = self.handle(&cluster_id)?;
                self.launch(
                    StageKind::ClusterTransform,
                    composer::cluster_transform_inputs(&transform, &cluster)?,
                )
            }
            Operation::TreeBuildFromFiles { tree_input } => {
                self.submit(StageKind::TreeBuild, vec![tree_input])
            }
            Operation::TreeBuildFromFutures {
                cluster_transform_id,
            } => {
                let cluster_transform = self.handle(&cluster_transform_id)?;
                self.launch(
                    StageKind::TreeBuild,
                    composer::tree_build_inputs(&cluster_transform)?,
                )
            }
            Operation::AggregateFromFiles {
                vcf,
                cluster_assignment,
                tree_report_json,
                compressed_trees,
            } => self.submit(
                StageKind::Aggregate,
                vec![vcf, cluster_assignment, tree_report_json, compressed_trees],
            ),
            Operation::AggregateFromFutures {
                vcf,
                cluster_id,
                tree_build_id,
            } => {
                let cluster = self.handle(&cluster_id)?;
                let tree_build = self.handle(&tree_build_id)?;
                self.launch(
                    StageKind::Aggregate,
                    composer::aggregate_inputs(&vcf, &cluster, &tree_build)?,
                )
            }
            Operation::FullWorkflow { vcf } => {
                let run_dir = self.workflow_dir("workflow");
                self.run_pipeline(&vcf, &run_dir)
            }
            Operation::ParallelWorkflows { vcfs } => {
                let run_dir = self.workflow_dir("workflows");
                self.run_many(&vcfs, &run_dir)
            }
        }
    }

    fn launch(&self, stage: StageKind, inputs: Vec<StageInput>) -> ServiceResult<HandleId> {
        let id = self.registry.allocate_id(stage.name());
        let run_dir = self.session_dir.join(id.as_str());
        let handle = self.executor.execute_as(id, stage, inputs, &run_dir)?;
        Ok(handle.id().clone())
    }

    fn workflow_dir(&self, name: &str) -> PathBuf {
        let id = self.registry.allocate_id(name);
        self.session_dir.join(id.as_str())
    }
}
