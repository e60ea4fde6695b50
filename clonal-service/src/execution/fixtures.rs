// Test Fixtures
// Stand-in stage commands built from plain shell utilities

use crate::config::FlowConfig;
use crate::stages::StageKind;

use std::fs;
use std::path::{Path, PathBuf};

/// Config whose stages copy their inputs around the way the real tools would.
///
/// `transform` exits 3 when its VCF contains the word `bad`. `aggregate`
/// checks that every upstream artifact exists and writes the VCF's first line
/// as a JSON string.
pub(crate) fn pipeline_config() -> FlowConfig {
    FlowConfig::default()
        .with_stage_command(
            StageKind::Transform,
            "grep -q bad {inputs.vcf} && exit 3; \
             echo '[]' > {outputs.headers}; \
             echo '[]' > {outputs.mutations}; \
             cp {inputs.vcf} {outputs.cluster_input}",
        )
        .with_stage_command(
            StageKind::Cluster,
            "cp {inputs.cluster_input} {outputs.cluster_fit}; \
             cp {inputs.cluster_input} {outputs.cluster_assignment}",
        )
        .with_stage_command(
            StageKind::ClusterTransform,
            "cat {inputs.cluster_input} {inputs.cluster_assignment} > {outputs.tree_input}",
        )
        .with_stage_command(
            StageKind::TreeBuild,
            "for f in {outputs.cliques} {outputs.raw_trees} {outputs.compressed_trees} \
             {outputs.ranked_trees} {outputs.report_text}; do cp {inputs.tree_input} \"$f\"; done; \
             echo '{{\"trees\": 1}}' > {outputs.report_json}",
        )
        .with_stage_command(
            StageKind::Aggregate,
            "test -f {inputs.cluster_assignment} && test -f {inputs.tree_report_json} && \
             test -f {inputs.compressed_trees} && \
             printf '\"%s\"' \"$(head -n 1 {inputs.vcf})\" > {outputs.aggregated}",
        )
}

/// Write a one-line VCF stand-in named `name` containing `sample`
pub(crate) fn write_vcf(dir: &Path, name: &str, sample: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("{}\n", sample)).unwrap();
    path
}
