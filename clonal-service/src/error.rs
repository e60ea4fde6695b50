// Service Errors
// Error kinds raised by the registry, executor, composer and fan-in runner

use crate::futures::handle::{HandleId, TaskFailure};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Handle already registered: {0}")]
    DuplicateRegistration(HandleId),

    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error(
        "Stage '{stage}' ({handle_id}) failed with {}; stderr captured at {}",
        describe_exit(.exit_code),
        .stderr_path.display()
    )]
    ProcessFailure {
        handle_id: HandleId,
        stage: String,
        exit_code: Option<i32>,
        stderr_path: PathBuf,
    },

    #[error(
        "{} of {total} workflow instances failed: {}",
        .failed_instances.len(),
        .failed_instances.join(", ")
    )]
    PartialFailure {
        failed_instances: Vec<String>,
        total: usize,
    },

    #[error("Task {0} stopped before resolving")]
    TaskAborted(HandleId),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid arguments for '{operation}': {message}")]
    InvalidArguments { operation: String, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

impl From<TaskFailure> for ServiceError {
    fn from(failure: TaskFailure) -> Self {
        match failure {
            TaskFailure::Process {
                handle_id,
                stage,
                exit_code,
                stderr_path,
            } => ServiceError::ProcessFailure {
                handle_id,
                stage: stage.name().to_string(),
                exit_code,
                stderr_path,
            },
            TaskFailure::Partial {
                failed_instances,
                total,
            } => ServiceError::PartialFailure {
                failed_instances,
                total,
            },
            TaskFailure::Aborted(id) => ServiceError::TaskAborted(id),
        }
    }
}
