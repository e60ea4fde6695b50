// Stage Schemas
// Named input/output schemas for the six stages of the clonal evolution pipeline

use crate::error::{ServiceError, ServiceResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// VCF -> metadata + cluster-ready table
    Transform,
    /// Mutation clustering
    Cluster,
    /// Cluster assignment -> tree-builder input
    ClusterTransform,
    /// Tree enumeration, ranking and reports
    TreeBuild,
    /// Per-instance JSON aggregation
    Aggregate,
    /// Fan-in merge of every instance's aggregated JSON
    AggregateWorkflows,
}

/// A declared output artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    /// Name used by downstream stages and command templates
    pub name: &'static str,
    /// File name inside the task directory
    pub file_name: &'static str,
}

/// Where a stage writes its declared outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPlacement {
    /// Inside the stage's own task directory
    TaskDir,
    /// Directly inside the run directory
    RunDir,
}

/// How many inputs a stage takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly the named inputs, in order
    Fixed(&'static [&'static str]),
    /// One or more inputs sharing a single name
    Variadic(&'static str),
}

/// Input/output schema of one stage
#[derive(Debug, Clone, Copy)]
pub struct StageSchema {
    pub inputs: Arity,
    pub outputs: &'static [OutputSpec],
    /// Subdirectories created inside the task directory before launch
    pub scratch_dirs: &'static [OutputSpec],
    pub placement: OutputPlacement,
}

const fn out(name: &'static str, file_name: &'static str) -> OutputSpec {
    OutputSpec { name, file_name }
}

const TRANSFORM: StageSchema = StageSchema {
    inputs: Arity::Fixed(&["vcf"]),
    outputs: &[
        out("headers", "headers.json"),
        out("mutations", "mutations.json"),
        out("cluster_input", "pyclone_vi_formatted.tsv"),
    ],
    scratch_dirs: &[out("samples", "pyclone_samples")],
    placement: OutputPlacement::TaskDir,
};

const CLUSTER: StageSchema = StageSchema {
    inputs: Arity::Fixed(&["cluster_input"]),
    outputs: &[
        out("cluster_fit", "cluster_fit.hdf5"),
        out("cluster_assignment", "cluster_assignment.tsv"),
    ],
    scratch_dirs: &[],
    placement: OutputPlacement::TaskDir,
};

const CLUSTER_TRANSFORM: StageSchema = StageSchema {
    inputs: Arity::Fixed(&["cluster_input", "cluster_assignment"]),
    outputs: &[out("tree_input", "spruce_formatted.tsv")],
    scratch_dirs: &[],
    placement: OutputPlacement::TaskDir,
};

const TREE_BUILD: StageSchema = StageSchema {
    inputs: Arity::Fixed(&["tree_input"]),
    outputs: &[
        out("cliques", "spruce.cliques"),
        out("raw_trees", "spruce.res"),
        out("compressed_trees", "spruce.res.gz"),
        out("ranked_trees", "spruce.merged.res"),
        out("report_text", "spruce.res.txt"),
        out("report_json", "spruce.res.json"),
    ],
    scratch_dirs: &[],
    placement: OutputPlacement::TaskDir,
};

const AGGREGATE: StageSchema = StageSchema {
    inputs: Arity::Fixed(&[
        "vcf",
        "cluster_assignment",
        "tree_report_json",
        "compressed_trees",
    ]),
    outputs: &[out("aggregated", "aggregated.json")],
    scratch_dirs: &[],
    placement: OutputPlacement::TaskDir,
};

const AGGREGATE_WORKFLOWS: StageSchema = StageSchema {
    inputs: Arity::Variadic("workflow"),
    outputs: &[out("aggregated_workflows", "aggregated_workflows.json")],
    scratch_dirs: &[],
    placement: OutputPlacement::RunDir,
};

impl StageKind {
    /// Every stage, in pipeline order
    pub const ALL: [StageKind; 6] = [
        StageKind::Transform,
        StageKind::Cluster,
        StageKind::ClusterTransform,
        StageKind::TreeBuild,
        StageKind::Aggregate,
        StageKind::AggregateWorkflows,
    ];

    /// Directory and id name of the stage
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Transform => "transform",
            StageKind::Cluster => "cluster",
            StageKind::ClusterTransform => "cluster_transform",
            StageKind::TreeBuild => "tree_build",
            StageKind::Aggregate => "aggregate",
            StageKind::AggregateWorkflows => "aggregate_workflows",
        }
    }

    pub fn schema(&self) -> &'static StageSchema {
        match self {
            StageKind::Transform => &TRANSFORM,
            StageKind::Cluster => &CLUSTER,
            StageKind::ClusterTransform => &CLUSTER_TRANSFORM,
            StageKind::TreeBuild => &TREE_BUILD,
            StageKind::Aggregate => &AGGREGATE,
            StageKind::AggregateWorkflows => &AGGREGATE_WORKFLOWS,
        }
    }

    /// Whether the stage runs in-process rather than as an external program
    pub fn is_builtin(&self) -> bool {
        matches!(self, StageKind::AggregateWorkflows)
    }

    /// Whether an upstream failure is reported per fan-out instance
    pub fn is_fan_in(&self) -> bool {
        matches!(self.schema().inputs, Arity::Variadic(_))
    }

    /// Command template used when the configuration does not override it
    pub fn default_command(&self) -> &'static str {
        match self {
            StageKind::Transform => {
                "cd ./vcf_transform/code; \
                 conda run -n vcf-transform python -B -m py_code.main {params.vcf_type} \
                 {inputs.vcf} {outputs.headers} {outputs.mutations} {outputs.cluster_input} \
                 {dirs.samples}"
            }
            StageKind::Cluster => {
                "conda run -n pyclone-vi pyclone-vi fit \
                 --in-file {inputs.cluster_input} --out-file {outputs.cluster_fit} && \
                 conda run -n pyclone-vi pyclone-vi write-results-file \
                 --in-file {outputs.cluster_fit} --out-file {outputs.cluster_assignment}"
            }
            StageKind::ClusterTransform => {
                "cd ./cluster_transform/code; \
                 conda run -n cluster-transform python -B -m py_code.main \
                 -t {params.cluster_type} -c {inputs.cluster_assignment} -a {params.alpha} \
                 -o {outputs.tree_input} -v {inputs.cluster_input}"
            }
            StageKind::TreeBuild => {
                "./spruce/tool/cliques -s -1 {inputs.tree_input} > {outputs.cliques} && \
                 ./spruce/tool/enumerate -clique {outputs.cliques} -t 2 -v 3 {inputs.tree_input} \
                 > {outputs.raw_trees} && \
                 gzip -c {outputs.raw_trees} > {outputs.compressed_trees} && \
                 zcat {outputs.compressed_trees} | ./spruce/tool/rank - > {outputs.ranked_trees} && \
                 zcat {outputs.compressed_trees} | ./spruce/tool/visualize -i 0 -a - \
                 > {outputs.report_text} && \
                 zcat {outputs.compressed_trees} | ./spruce/tool/visualize -i 0 -j - \
                 > {outputs.report_json}"
            }
            StageKind::Aggregate => {
                "cd ./aggregate_json/code; \
                 conda run -n aggregate-json python aggregate_json.py \
                 -v {inputs.vcf} -c {inputs.cluster_assignment} -s {inputs.tree_report_json} \
                 -S {inputs.compressed_trees} -j {outputs.aggregated} --program {params.vcf_type}"
            }
            StageKind::AggregateWorkflows => "",
        }
    }

    /// Position of a named output in the declared order
    pub fn output_index(&self, name: &str) -> ServiceResult<usize> {
        self.schema()
            .outputs
            .iter()
            .position(|spec| spec.name == name)
            .ok_or_else(|| {
                ServiceError::SchemaMismatch(format!(
                    "stage '{}' declares no output named '{}' (declared: {})",
                    self.name(),
                    name,
                    self.output_names().join(", ")
                ))
            })
    }

    pub fn output_names(&self) -> Vec<&'static str> {
        self.schema().outputs.iter().map(|spec| spec.name).collect()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| ServiceError::UnknownOperation(format!("no stage named '{}'", s)))
    }
}
