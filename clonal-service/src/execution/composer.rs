// Pipeline Composer
// Wires the five analysis stages together through named upstream outputs

use crate::error::{ServiceError, ServiceResult};
use crate::execution::executor::{StageInput, TaskExecutor};
use crate::futures::handle::TaskHandle;
use crate::stages::StageKind;

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn expect_stage(handle: &TaskHandle, expected: StageKind) -> ServiceResult<()> {
    if handle.stage() != expected {
        return Err(ServiceError::SchemaMismatch(format!(
            "{} is a '{}' task, expected '{}'",
            handle.id(),
            handle.stage(),
            expected
        )));
    }
    Ok(())
}

/// `cluster` reads the cluster-ready table produced by `transform`
pub fn cluster_inputs(transform: &TaskHandle) -> ServiceResult<Vec<StageInput>> {
    expect_stage(transform, StageKind::Transform)?;
    Ok(vec![StageInput::upstream(transform, "cluster_input")])
}

/// `cluster_transform` reads the cluster-ready table and the cluster assignment
pub fn cluster_transform_inputs(
    transform: &TaskHandle,
    cluster: &TaskHandle,
) -> ServiceResult<Vec<StageInput>> {
    expect_stage(transform, StageKind::Transform)?;
    expect_stage(cluster, StageKind::Cluster)?;
    Ok(vec![
        StageInput::upstream(transform, "cluster_input"),
        StageInput::upstream(cluster, "cluster_assignment"),
    ])
}

pub fn tree_build_inputs(cluster_transform: &TaskHandle) -> ServiceResult<Vec<StageInput>> {
    expect_stage(cluster_transform, StageKind::ClusterTransform)?;
    Ok(vec![StageInput::upstream(cluster_transform, "tree_input")])
}

/// `aggregate` reads the root VCF plus the cluster assignment and both tree reports
pub fn aggregate_inputs(
    root: &Path,
    cluster: &TaskHandle,
    tree_build: &TaskHandle,
) -> ServiceResult<Vec<StageInput>> {
    expect_stage(cluster, StageKind::Cluster)?;
    expect_stage(tree_build, StageKind::TreeBuild)?;
    Ok(vec![
        StageInput::file(root),
        StageInput::upstream(cluster, "cluster_assignment"),
        StageInput::upstream(tree_build, "report_json"),
        StageInput::upstream(tree_build, "compressed_trees"),
    ])
}

/// Handles of one composed pipeline instance
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Root artifact as copied into the run directory
    pub root: PathBuf,
    pub transform: TaskHandle,
    pub cluster: TaskHandle,
    pub cluster_transform: TaskHandle,
    pub tree_build: TaskHandle,
    pub aggregate: TaskHandle,
}

impl PipelineRun {
    /// The handle whose output is the pipeline's result
    pub fn terminal(&self) -> &TaskHandle {
        &self.aggregate
    }

    /// Stage handles in pipeline order
    pub fn handles(&self) -> [&TaskHandle; 5] {
        [
            &self.transform,
            &self.cluster,
            &self.cluster_transform,
            &self.tree_build,
            &self.aggregate,
        ]
    }
}

/// Launches stages either from caller-supplied files or from upstream handles
pub struct PipelineComposer {
    executor: Arc<TaskExecutor>,
}

impl PipelineComposer {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn transform_from_files(&self, vcf: &Path, run_dir: &Path) -> ServiceResult<TaskHandle> {
        self.executor
            .execute(StageKind::Transform, vec![StageInput::file(vcf)], run_dir)
    }

    pub fn cluster_from_files(
        &self,
        cluster_input: &Path,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::Cluster,
            vec![StageInput::file(cluster_input)],
            run_dir,
        )
    }

    pub fn cluster_from_handles(
        &self,
        transform: &TaskHandle,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor
            .execute(StageKind::Cluster, cluster_inputs(transform)?, run_dir)
    }

    pub fn cluster_transform_from_files(
        &self,
        cluster_input: &Path,
        cluster_assignment: &Path,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::ClusterTransform,
            vec![
                StageInput::file(cluster_input),
                StageInput::file(cluster_assignment),
            ],
            run_dir,
        )
    }

    pub fn cluster_transform_from_handles(
        &self,
        transform: &TaskHandle,
        cluster: &TaskHandle,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::ClusterTransform,
            cluster_transform_inputs(transform, cluster)?,
            run_dir,
        )
    }

    pub fn tree_build_from_files(
        &self,
        tree_input: &Path,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::TreeBuild,
            vec![StageInput::file(tree_input)],
            run_dir,
        )
    }

    pub fn tree_build_from_handles(
        &self,
        cluster_transform: &TaskHandle,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::TreeBuild,
            tree_build_inputs(cluster_transform)?,
            run_dir,
        )
    }

    pub fn aggregate_from_files(
        &self,
        vcf: &Path,
        cluster_assignment: &Path,
        tree_report_json: &Path,
        compressed_trees: &Path,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::Aggregate,
            vec![
                StageInput::file(vcf),
                StageInput::file(cluster_assignment),
                StageInput::file(tree_report_json),
                StageInput::file(compressed_trees),
            ],
            run_dir,
        )
    }

    pub fn aggregate_from_handles(
        &self,
        vcf: &Path,
        cluster: &TaskHandle,
        tree_build: &TaskHandle,
        run_dir: &Path,
    ) -> ServiceResult<TaskHandle> {
        self.executor.execute(
            StageKind::Aggregate,
            aggregate_inputs(vcf, cluster, tree_build)?,
            run_dir,
        )
    }

    /// Launch all five stages for one root artifact.
    ///
    /// The root is copied into `run_dir` first and the copy is what the
    /// stages read. Every stage is launched before any of them finishes;
    /// each one waits for its upstream tasks itself.
    pub fn run_pipeline(&self, root: &Path, run_dir: &Path) -> ServiceResult<PipelineRun> {
        let root = stage_root(root, run_dir)?;

        let transform = self.transform_from_files(&root, run_dir)?;
        let cluster = self.cluster_from_handles(&transform, run_dir)?;
        let cluster_transform = self.cluster_transform_from_handles(&transform, &cluster, run_dir)?;
        let tree_build = self.tree_build_from_handles(&cluster_transform, run_dir)?;
        let aggregate = self.aggregate_from_handles(&root, &cluster, &tree_build, run_dir)?;

        tracing::info!(
            root = %root.display(),
            run_dir = %run_dir.display(),
            terminal = %aggregate.id(),
            "pipeline composed"
        );

        Ok(PipelineRun {
            root,
            transform,
            cluster,
            cluster_transform,
            tree_build,
            aggregate,
        })
    }
}

/// Copy the root artifact into the run directory, returning the copy's path
fn stage_root(root: &Path, run_dir: &Path) -> ServiceResult<PathBuf> {
    let file_name = check_root(root)?;

    let run_dir = std::path::absolute(run_dir)?;
    fs::create_dir_all(&run_dir)?;
    let staged = run_dir.join(file_name);
    // Copying a file onto itself truncates it
    let same_file = staged.exists() && fs::canonicalize(root)? == fs::canonicalize(&staged)?;
    if !same_file {
        fs::copy(root, &staged)?;
    }
    Ok(staged)
}

/// A root must be an existing file whose name cannot shadow a stage directory
pub(crate) fn check_root(root: &Path) -> ServiceResult<&OsStr> {
    if !root.is_file() {
        return Err(ServiceError::MissingInput(format!(
            "root artifact does not exist: {}",
            root.display()
        )));
    }
    let file_name = root.file_name().ok_or_else(|| {
        ServiceError::MissingInput(format!("root artifact has no file name: {}", root.display()))
    })?;
    if StageKind::ALL
        .iter()
        .any(|stage| OsStr::new(stage.name()) == file_name)
    {
        return Err(ServiceError::SchemaMismatch(format!(
            "root artifact {} is named after a stage directory",
            root.display()
        )));
    }
    Ok(file_name)
}
