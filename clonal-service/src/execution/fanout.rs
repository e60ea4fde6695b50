// Fan-Out/Fan-In Runner
// Runs one pipeline per root artifact and merges every instance's result

use crate::error::{ServiceError, ServiceResult};
use crate::execution::composer::{check_root, PipelineComposer, PipelineRun};
use crate::execution::events::{EventSender, ExecutionEvent};
use crate::execution::executor::StageInput;
use crate::futures::handle::TaskHandle;
use crate::stages::StageKind;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the subdirectory holding instance `index`
pub fn instance_name(index: usize) -> String {
    format!("instance_{}", index)
}

/// Handles of a fan-out run
#[derive(Debug, Clone)]
pub struct FanOutRun {
    /// One composed pipeline per root, in input order
    pub instances: Vec<PipelineRun>,
    /// Merges every instance's aggregated result; fails with the names of
    /// the failed instances if any of them failed
    pub aggregate: TaskHandle,
}

impl FanOutRun {
    pub fn terminal(&self) -> &TaskHandle {
        &self.aggregate
    }
}

/// Runs the composed pipeline once per root artifact
pub struct FanOutRunner {
    composer: Arc<PipelineComposer>,
}

impl FanOutRunner {
    pub fn new(composer: Arc<PipelineComposer>) -> Self {
        Self { composer }
    }

    /// Launch one pipeline per root under `run_dir/instance_<i>` and a final
    /// aggregation over all of them.
    ///
    /// Instances run concurrently, bounded only by the worker pool. The
    /// aggregation waits for every instance to resolve and never reads a
    /// partial set: if any instance fails it resolves to a partial failure
    /// listing the failed instances, and successful instances keep their
    /// artifacts on disk.
    pub fn run_many(&self, roots: &[PathBuf], run_dir: &Path) -> ServiceResult<FanOutRun> {
        if roots.is_empty() {
            return Err(ServiceError::MissingInput(
                "fan-out needs at least one root artifact".to_string(),
            ));
        }
        let missing: Vec<String> = roots
            .iter()
            .filter(|root| !root.is_file())
            .map(|root| root.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::MissingInput(format!(
                "root artifacts do not exist: {}",
                missing.join(", ")
            )));
        }
        for root in roots {
            check_root(root)?;
        }

        let events = self.composer.executor().events().clone();
        let mut instances = Vec::with_capacity(roots.len());
        for (index, root) in roots.iter().enumerate() {
            let instance = instance_name(index);
            let run = self
                .composer
                .run_pipeline(root, &run_dir.join(&instance))?;

            events.send_event(ExecutionEvent::InstanceScheduled {
                instance,
                root: root.clone(),
                terminal: run.terminal().id().clone(),
            });
            instances.push(run);
        }

        let inputs = instances
            .iter()
            .enumerate()
            .map(|(index, run)| {
                StageInput::upstream(run.terminal(), "aggregated").labeled(instance_name(index))
            })
            .collect();
        let aggregate =
            self.composer
                .executor()
                .execute(StageKind::AggregateWorkflows, inputs, run_dir)?;

        tracing::info!(
            instances = instances.len(),
            handle = %aggregate.id(),
            "fan-in scheduled"
        );
        events.send_event(ExecutionEvent::FanInScheduled {
            handle_id: aggregate.id().clone(),
            instances: instances.len(),
        });

        Ok(FanOutRun {
            instances,
            aggregate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::execution::events::progress_channel;
    use crate::execution::executor::TaskExecutor;
    use crate::execution::fixtures::{pipeline_config, write_vcf};
    use crate::futures::handle::TaskStatus;
    use crate::futures::registry::FutureRegistry;

    use std::fs;

    fn make_runner(config: FlowConfig) -> FanOutRunner {
        let executor = TaskExecutor::new(config, Arc::new(FutureRegistry::new()));
        FanOutRunner::new(Arc::new(PipelineComposer::new(Arc::new(executor))))
    }

    fn write_roots(dir: &Path, samples: &[&str]) -> Vec<PathBuf> {
        samples
            .iter()
            .enumerate()
            .map(|(i, sample)| write_vcf(dir, &format!("sample_{}.vcf", i), sample))
            .collect()
    }

    #[tokio::test]
    async fn test_run_many_merges_every_instance() {
        let data = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        let roots = write_roots(data.path(), &["alpha", "beta", "gamma"]);
        let runner = make_runner(pipeline_config());

        let run = runner.run_many(&roots, runs.path()).unwrap();
        let outputs = run.terminal().wait().await.unwrap();

        let merged = outputs.get("aggregated_workflows").unwrap();
        assert_eq!(merged, runs.path().join("aggregated_workflows.json"));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(merged).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!(["alpha", "beta", "gamma"]));

        for index in 0..3 {
            let instance_dir = runs.path().join(instance_name(index));
            for stage in ["transform", "cluster", "cluster_transform", "tree_build", "aggregate"] {
                assert!(instance_dir.join(stage).is_dir());
            }
        }
    }

    #[tokio::test]
    async fn test_partial_failure_refuses_to_aggregate() {
        let data = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        let roots = write_roots(data.path(), &["alpha", "bad beta", "gamma"]);
        let runner = make_runner(pipeline_config());

        let run = runner.run_many(&roots, runs.path()).unwrap();
        let err = run.terminal().wait().await.unwrap_err();

        match err {
            ServiceError::PartialFailure {
                failed_instances,
                total,
            } => {
                assert_eq!(failed_instances, vec!["instance_1".to_string()]);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runs.path().join("aggregated_workflows.json").exists());

        // Siblings ran to completion and kept their artifacts
        assert_eq!(run.instances[0].terminal().status(), TaskStatus::Succeeded);
        assert_eq!(run.instances[2].terminal().status(), TaskStatus::Succeeded);
        assert!(run.instances[2].terminal().outputs().at(0).unwrap().exists());
    }

    #[tokio::test]
    async fn test_missing_root_launches_nothing() {
        let data = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        let mut roots = write_roots(data.path(), &["alpha"]);
        roots.push(data.path().join("absent.vcf"));
        let runner = make_runner(pipeline_config());

        let err = runner.run_many(&roots, runs.path()).unwrap_err();

        assert!(matches!(err, ServiceError::MissingInput(msg) if msg.contains("absent.vcf")));
        assert!(!runs.path().join(instance_name(0)).exists());
        assert!(matches!(
            runner.run_many(&[], runs.path()),
            Err(ServiceError::MissingInput(_))
        ));
    }

    #[tokio::test]
    async fn test_root_named_after_stage_launches_nothing() {
        let data = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        let mut roots = write_roots(data.path(), &["alpha"]);
        roots.push(write_vcf(data.path(), "tree_build", "beta"));
        let runner = make_runner(pipeline_config());

        let err = runner.run_many(&roots, runs.path()).unwrap_err();

        assert!(matches!(err, ServiceError::SchemaMismatch(msg) if msg.contains("tree_build")));
        assert!(!runs.path().join(instance_name(0)).exists());
    }

    #[tokio::test]
    async fn test_fan_out_events() {
        let data = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        let roots = write_roots(data.path(), &["alpha", "beta"]);
        let (tx, mut rx) = progress_channel();
        let executor = TaskExecutor::new(pipeline_config(), Arc::new(FutureRegistry::new()))
            .with_progress(tx);
        let runner = FanOutRunner::new(Arc::new(PipelineComposer::new(Arc::new(executor))));

        let run = runner.run_many(&roots, runs.path()).unwrap();
        run.terminal().wait().await.unwrap();
        drop(runner);

        let mut instances = Vec::new();
        let mut fan_in = None;
        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                ExecutionEvent::InstanceScheduled { instance, .. } => instances.push(instance),
                ExecutionEvent::FanInScheduled { instances, .. } => fan_in = Some(instances),
                ExecutionEvent::TaskCompleted { .. } => completed += 1,
                _ => {}
            }
        }

        assert_eq!(instances, vec!["instance_0", "instance_1"]);
        assert_eq!(fan_in, Some(2));
        // Five stages per instance plus the merge
        assert_eq!(completed, 11);
    }
}
