// Flow Configuration
// YAML-backed settings for the worker pool, tool locations and stage commands

use crate::error::{ServiceError, ServiceResult};
use crate::runners::shell::Shell;
use crate::stages::StageKind;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of external processes allowed in flight
pub const DEFAULT_MAX_CONCURRENT_PROCESSES: usize = 4;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Maximum external processes running at once
    pub max_concurrent_processes: usize,
    /// Working directory external processes are launched from
    pub tools_dir: PathBuf,
    /// Parent directory for CLI-created run directories
    pub runs_dir: PathBuf,
    /// Shell used to interpret stage commands
    pub shell: Shell,
    /// Named values substituted for `{params.NAME}`
    pub params: BTreeMap<String, String>,
    /// Per-stage command template overrides
    pub stages: HashMap<StageKind, String>,
    /// Extra environment for every external process
    pub env: HashMap<String, String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: DEFAULT_MAX_CONCURRENT_PROCESSES,
            tools_dir: PathBuf::from("."),
            runs_dir: PathBuf::from("runs"),
            shell: Shell::Default,
            params: BTreeMap::new(),
            stages: HashMap::new(),
            env: HashMap::new(),
        }
    }
}

fn default_param(name: &str) -> Option<&'static str> {
    match name {
        "vcf_type" => Some("mutect"),
        "alpha" => Some("0.05"),
        "cluster_type" => Some("pyclone-vi"),
        _ => None,
    }
}

impl FlowConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ServiceResult<Self> {
        let config: FlowConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `~/.clonal/config.yaml` if it exists, else defaults
    pub fn load(path: Option<&Path>) -> ServiceResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Location of the per-user configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".clonal").join("config.yaml"))
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.max_concurrent_processes == 0 {
            return Err(ServiceError::Config(
                "max_concurrent_processes must be at least 1".to_string(),
            ));
        }
        if let Some(stage) = self.stages.keys().find(|stage| stage.is_builtin()) {
            return Err(ServiceError::Config(format!(
                "stage '{}' runs in-process and takes no command",
                stage
            )));
        }
        Ok(())
    }

    /// Command template for a stage, falling back to the built-in default
    pub fn command_for(&self, stage: StageKind) -> &str {
        self.stages
            .get(&stage)
            .map(String::as_str)
            .unwrap_or_else(|| stage.default_command())
    }

    /// Value of a template parameter, falling back to the built-in default
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .or_else(|| default_param(name))
    }

    pub fn with_max_concurrent_processes(mut self, max: usize) -> Self {
        self.max_concurrent_processes = max;
        self
    }

    pub fn with_tools_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = dir.into();
        self
    }

    pub fn with_stage_command(mut self, stage: StageKind, command: impl Into<String>) -> Self {
        self.stages.insert(stage, command.into());
        self
    }
}
