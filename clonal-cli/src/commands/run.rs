use crate::commands;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use clonal_service::FlowConfig;

/// Run the full pipeline for one VCF
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the VCF file
    pub vcf: PathBuf,

    /// Run directory (defaults to <runs_dir>/run_<unix seconds>)
    #[arg(long, short = 'd', value_name = "DIR")]
    pub run_dir: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, config: FlowConfig) -> Result<()> {
    if !args.vcf.exists() {
        color_eyre::eyre::bail!("VCF file not found: {}", args.vcf.display());
    }

    let run_dir = match args.run_dir {
        Some(dir) => dir,
        None => commands::default_run_dir(&config)?,
    };
    output::header(&format!(
        "Pipeline for {} in {}",
        args.vcf.display(),
        run_dir.display()
    ));

    let (orchestrator, rx) = commands::orchestrator(config, run_dir.clone());
    let run = orchestrator.composer().run_pipeline(&args.vcf, &run_dir)?;
    let terminal = run.terminal().clone();

    let mut results = commands::follow(orchestrator, rx, vec![terminal]).await?;
    let outputs = match results.pop() {
        Some(Ok(outputs)) => outputs,
        Some(Err(e)) => return Err(commands::report_failure("Pipeline", e)),
        None => color_eyre::eyre::bail!("pipeline produced no result"),
    };

    println!();
    let aggregated = outputs.get("aggregated")?;
    output::success(&format!("Pipeline completed: {}", aggregated.display()));
    println!("{}", std::fs::read_to_string(aggregated)?);

    Ok(())
}
