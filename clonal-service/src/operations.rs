// Operations
// Closed set of named entry points an external caller may invoke by name

use crate::error::{ServiceError, ServiceResult};
use crate::futures::handle::HandleId;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// An invocation of one pipeline entry point.
///
/// Serialized as `{"name": ..., "arguments": {...}}`. Arguments ending in
/// `_id` name handles returned by earlier calls in the same session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum Operation {
    TransformFromFiles {
        vcf: PathBuf,
    },
    ClusterFromFiles {
        cluster_input: PathBuf,
    },
    ClusterFromFutures {
        transform_id: HandleId,
    },
    ClusterTransformFromFiles {
        cluster_input: PathBuf,
        cluster_assignment: PathBuf,
    },
    ClusterTransformFromFutures {
        transform_id: HandleId,
        cluster_id: HandleId,
    },
    TreeBuildFromFiles {
        tree_input: PathBuf,
    },
    TreeBuildFromFutures {
        cluster_transform_id: HandleId,
    },
    AggregateFromFiles {
        vcf: PathBuf,
        cluster_assignment: PathBuf,
        tree_report_json: PathBuf,
        compressed_trees: PathBuf,
    },
    AggregateFromFutures {
        vcf: PathBuf,
        cluster_id: HandleId,
        tree_build_id: HandleId,
    },
    FullWorkflow {
        vcf: PathBuf,
    },
    ParallelWorkflows {
        vcfs: Vec<PathBuf>,
    },
}

/// A call as it arrives from outside: a name plus loosely typed arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl OperationCall {
    pub fn into_operation(self) -> ServiceResult<Operation> {
        Operation::from_call(&self.name, self.arguments)
    }
}

impl Operation {
    /// Every operation name, in catalogue order
    pub const NAMES: [&'static str; 11] = [
        "transform_from_files",
        "cluster_from_files",
        "cluster_from_futures",
        "cluster_transform_from_files",
        "cluster_transform_from_futures",
        "tree_build_from_files",
        "tree_build_from_futures",
        "aggregate_from_files",
        "aggregate_from_futures",
        "full_workflow",
        "parallel_workflows",
    ];

    /// Build an operation from a name and a JSON object of arguments
    pub fn from_call(name: &str, arguments: Value) -> ServiceResult<Self> {
        if !Self::NAMES.contains(&name) {
            return Err(ServiceError::UnknownOperation(name.to_string()));
        }
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        serde_json::from_value(json!({ "name": name, "arguments": arguments })).map_err(|e| {
            ServiceError::InvalidArguments {
                operation: name.to_string(),
                message: e.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::TransformFromFiles { .. } => "transform_from_files",
            Operation::ClusterFromFiles { .. } => "cluster_from_files",
            Operation::ClusterFromFutures { .. } => "cluster_from_futures",
            Operation::ClusterTransformFromFiles { .. } => "cluster_transform_from_files",
            Operation::ClusterTransformFromFutures { .. } => "cluster_transform_from_futures",
            Operation::TreeBuildFromFiles { .. } => "tree_build_from_files",
            Operation::TreeBuildFromFutures { .. } => "tree_build_from_futures",
            Operation::AggregateFromFiles { .. } => "aggregate_from_files",
            Operation::AggregateFromFutures { .. } => "aggregate_from_futures",
            Operation::FullWorkflow { .. } => "full_workflow",
            Operation::ParallelWorkflows { .. } => "parallel_workflows",
        }
    }

    /// Function descriptions for a tool-calling agent
    pub fn catalogue() -> Vec<Value> {
        fn path(description: &str) -> Value {
            json!({ "type": "string", "description": description })
        }
        fn describe(name: &str, description: &str, properties: Value) -> Value {
            let required: Vec<String> = properties
                .as_object()
                .map(|props| props.keys().cloned().collect())
                .unwrap_or_default();
            json!({
                "name": name,
                "description": description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            })
        }

        vec![
            describe(
                "transform_from_files",
                "Transforms a VCF file into the input format of the mutation clustering step",
                json!({ "vcf": path("Path to the VCF file") }),
            ),
            describe(
                "cluster_from_files",
                "Computes mutation clusters from a transformed mutation table",
                json!({ "cluster_input": path("Path to the cluster-ready table written by the VCF transform") }),
            ),
            describe(
                "cluster_from_futures",
                "Computes mutation clusters from the result of an earlier VCF transform",
                json!({ "transform_id": path("Handle id returned by transform_from_files") }),
            ),
            describe(
                "cluster_transform_from_files",
                "Formats clustered mutations as input for tree enumeration",
                json!({
                    "cluster_input": path("Path to the cluster-ready table"),
                    "cluster_assignment": path("Path to the cluster assignment table"),
                }),
            ),
            describe(
                "cluster_transform_from_futures",
                "Formats clustered mutations for tree enumeration from earlier transform and clustering results",
                json!({
                    "transform_id": path("Handle id of the VCF transform"),
                    "cluster_id": path("Handle id of the clustering step"),
                }),
            ),
            describe(
                "tree_build_from_files",
                "Enumerates, ranks and reports phylogenetic trees",
                json!({ "tree_input": path("Path to the tree-enumeration input table") }),
            ),
            describe(
                "tree_build_from_futures",
                "Enumerates, ranks and reports phylogenetic trees from an earlier cluster transform",
                json!({ "cluster_transform_id": path("Handle id of the cluster transform") }),
            ),
            describe(
                "aggregate_from_files",
                "Aggregates the VCF, cluster assignment and tree reports into one JSON document",
                json!({
                    "vcf": path("Path to the original VCF file"),
                    "cluster_assignment": path("Path to the cluster assignment table"),
                    "tree_report_json": path("Path to the JSON tree report"),
                    "compressed_trees": path("Path to the compressed tree file"),
                }),
            ),
            describe(
                "aggregate_from_futures",
                "Aggregates results of earlier clustering and tree building into one JSON document",
                json!({
                    "vcf": path("Path to the original VCF file"),
                    "cluster_id": path("Handle id of the clustering step"),
                    "tree_build_id": path("Handle id of the tree building step"),
                }),
            ),
            describe(
                "full_workflow",
                "Runs every stage from VCF to aggregated JSON for one sample",
                json!({ "vcf": path("Path to the VCF file") }),
            ),
            describe(
                "parallel_workflows",
                "Runs the full workflow for several samples concurrently and merges their results",
                json!({
                    "vcfs": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Paths to the VCF files",
                    }
                }),
            ),
        ]
    }
}
