// Task Handles
// Shared, write-once view of a launched task: declared outputs plus completion state

use crate::error::{ServiceError, ServiceResult};
use crate::stages::StageKind;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Opaque identifier of a handle, e.g. `future_3_cluster`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(String);

impl HandleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HandleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Completion status of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::Succeeded => write!(f, "Succeeded"),
            TaskStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Why a handle resolved to failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The stage (or the upstream stage that caused this one to be skipped) did not succeed
    Process {
        handle_id: HandleId,
        stage: StageKind,
        exit_code: Option<i32>,
        stderr_path: PathBuf,
    },
    /// One or more fan-out instances failed
    Partial {
        failed_instances: Vec<String>,
        total: usize,
    },
    /// The worker driving the task went away without resolving it
    Aborted(HandleId),
}

/// State published exactly once by the worker driving a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    Pending,
    Succeeded,
    Failed(TaskFailure),
}

impl HandleState {
    pub fn status(&self) -> TaskStatus {
        match self {
            HandleState::Pending => TaskStatus::Pending,
            HandleState::Succeeded => TaskStatus::Succeeded,
            HandleState::Failed(_) => TaskStatus::Failed,
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self, HandleState::Pending)
    }
}

/// Ordered, named output paths of a task, fixed at launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSet {
    stage: StageKind,
    paths: Vec<PathBuf>,
}

impl OutputSet {
    /// Lay out the declared outputs of `stage` inside `dir`
    pub fn declare(stage: StageKind, dir: &Path) -> Self {
        let paths = stage
            .schema()
            .outputs
            .iter()
            .map(|spec| dir.join(spec.file_name))
            .collect();
        Self { stage, paths }
    }

    /// Output by name
    pub fn get(&self, name: &str) -> ServiceResult<&Path> {
        let index = self.stage.output_index(name)?;
        Ok(&self.paths[index])
    }

    /// Output by declared position
    pub fn at(&self, index: usize) -> ServiceResult<&Path> {
        self.paths.get(index).map(PathBuf::as_path).ok_or_else(|| {
            ServiceError::SchemaMismatch(format!(
                "stage '{}' declares {} outputs, index {} is out of range",
                self.stage,
                self.paths.len(),
                index
            ))
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn named(&self) -> impl Iterator<Item = (&'static str, &Path)> + '_ {
        self.stage
            .schema()
            .outputs
            .iter()
            .zip(&self.paths)
            .map(|(spec, path)| (spec.name, path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug)]
struct HandleInner {
    id: HandleId,
    stage: StageKind,
    task_dir: PathBuf,
    outputs: OutputSet,
    state: watch::Receiver<HandleState>,
}

/// Cheaply cloneable handle to a launched task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

/// Publishing side of a handle, owned by the worker that drives the task
#[derive(Debug)]
pub struct HandleResolver {
    tx: watch::Sender<HandleState>,
}

impl HandleResolver {
    /// Publish the final state; later calls are ignored
    pub fn resolve(&self, state: HandleState) {
        self.tx.send_if_modified(|current| {
            if current.is_pending() && !state.is_pending() {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

impl TaskHandle {
    /// Create a pending handle and the resolver that will complete it
    pub fn pending(
        id: HandleId,
        stage: StageKind,
        task_dir: PathBuf,
        outputs: OutputSet,
    ) -> (Self, HandleResolver) {
        let (tx, rx) = watch::channel(HandleState::Pending);
        let handle = Self {
            inner: Arc::new(HandleInner {
                id,
                stage,
                task_dir,
                outputs,
                state: rx,
            }),
        };
        (handle, HandleResolver { tx })
    }

    pub fn id(&self) -> &HandleId {
        &self.inner.id
    }

    pub fn stage(&self) -> StageKind {
        self.inner.stage
    }

    pub fn task_dir(&self) -> &Path {
        &self.inner.task_dir
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.inner.task_dir.join("stdout.txt")
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.inner.task_dir.join("stderr.txt")
    }

    /// Declared outputs; known as soon as the task is launched
    pub fn outputs(&self) -> &OutputSet {
        &self.inner.outputs
    }

    /// Current state without waiting.
    ///
    /// A task whose resolver went away without publishing reads as aborted.
    pub fn state(&self) -> HandleState {
        let state = self.inner.state.borrow().clone();
        if state.is_pending() && self.inner.state.has_changed().is_err() {
            return HandleState::Failed(TaskFailure::Aborted(self.inner.id.clone()));
        }
        state
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status()
    }

    /// Wait until the task resolves.
    ///
    /// This is the only suspension point in the orchestrator: composing,
    /// launching and registering never wait. On failure the captured failure
    /// is returned as an error; on success the declared outputs are returned
    /// without checking that the files exist.
    pub async fn wait(&self) -> ServiceResult<&OutputSet> {
        self.outcome().await.map_err(ServiceError::from)?;
        Ok(&self.inner.outputs)
    }

    pub(crate) async fn outcome(&self) -> Result<(), TaskFailure> {
        let mut rx = self.inner.state.clone();
        let state = match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.clone(),
            // Resolver dropped; reads as aborted unless it published first
            Err(_) => self.state(),
        };

        match state {
            HandleState::Succeeded => Ok(()),
            HandleState::Failed(failure) => Err(failure),
            HandleState::Pending => Err(TaskFailure::Aborted(self.inner.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(stage: StageKind) -> (TaskHandle, HandleResolver) {
        let dir = PathBuf::from("/runs/r1").join(stage.name());
        let outputs = OutputSet::declare(stage, &dir);
        TaskHandle::pending(HandleId::from("future_1_test"), stage, dir, outputs)
    }

    #[test]
    fn test_outputs_known_before_completion() {
        let (handle, _resolver) = make_handle(StageKind::Transform);

        assert_eq!(handle.status(), TaskStatus::Pending);
        assert_eq!(handle.outputs().len(), 3);
        assert_eq!(
            handle.outputs().get("cluster_input").unwrap(),
            Path::new("/runs/r1/transform/pyclone_vi_formatted.tsv")
        );
        assert_eq!(
            handle.outputs().at(2).unwrap(),
            handle.outputs().get("cluster_input").unwrap()
        );
        assert_eq!(handle.stderr_path(), PathBuf::from("/runs/r1/transform/stderr.txt"));
    }

    #[test]
    fn test_out_of_range_index_is_schema_mismatch() {
        let (handle, _resolver) = make_handle(StageKind::Cluster);

        assert!(matches!(
            handle.outputs().at(2),
            Err(ServiceError::SchemaMismatch(_))
        ));
        assert!(matches!(
            handle.outputs().get("report_json"),
            Err(ServiceError::SchemaMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_returns_outputs_on_success() {
        let (handle, resolver) = make_handle(StageKind::ClusterTransform);
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait().await.map(|o| o.paths().to_vec()) });

        resolver.resolve(HandleState::Succeeded);

        let paths = task.await.unwrap().unwrap();
        assert_eq!(paths, vec![PathBuf::from("/runs/r1/cluster_transform/spruce_formatted.tsv")]);
        assert_eq!(handle.status(), TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_resolves_exactly_once() {
        let (handle, resolver) = make_handle(StageKind::Cluster);
        let failure = TaskFailure::Process {
            handle_id: handle.id().clone(),
            stage: StageKind::Cluster,
            exit_code: Some(1),
            stderr_path: handle.stderr_path(),
        };

        resolver.resolve(HandleState::Failed(failure.clone()));
        resolver.resolve(HandleState::Succeeded);

        assert_eq!(handle.state(), HandleState::Failed(failure));
        assert!(matches!(
            handle.wait().await,
            Err(ServiceError::ProcessFailure { exit_code: Some(1), .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_resolver_aborts_waiters() {
        let (handle, resolver) = make_handle(StageKind::TreeBuild);
        assert_eq!(handle.status(), TaskStatus::Pending);
        drop(resolver);

        assert!(matches!(handle.wait().await, Err(ServiceError::TaskAborted(_))));
        assert_eq!(handle.status(), TaskStatus::Failed);
        assert_eq!(
            handle.state(),
            HandleState::Failed(TaskFailure::Aborted(HandleId::from("future_1_test")))
        );
    }

    #[test]
    fn test_resolved_state_survives_dropped_resolver() {
        let (handle, resolver) = make_handle(StageKind::Aggregate);
        resolver.resolve(HandleState::Succeeded);
        drop(resolver);

        assert_eq!(handle.state(), HandleState::Succeeded);
    }
}
