use crate::commands;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use clonal_service::{FlowConfig, TaskStatus};

/// Run the pipeline for several VCFs concurrently and merge the results
#[derive(Args, Debug)]
pub struct RunManyArgs {
    /// Paths to the VCF files, one pipeline instance each
    #[arg(required = true, num_args = 1..)]
    pub vcfs: Vec<PathBuf>,

    /// Run directory (defaults to <runs_dir>/run_<unix seconds>)
    #[arg(long, short = 'd', value_name = "DIR")]
    pub run_dir: Option<PathBuf>,
}

pub async fn execute(args: RunManyArgs, config: FlowConfig) -> Result<()> {
    let run_dir = match args.run_dir {
        Some(dir) => dir,
        None => commands::default_run_dir(&config)?,
    };
    output::header(&format!(
        "{} pipeline instances in {}",
        args.vcfs.len(),
        run_dir.display()
    ));

    let (orchestrator, rx) = commands::orchestrator(config, run_dir.clone());
    let run = orchestrator.fan_out().run_many(&args.vcfs, &run_dir)?;
    let terminal = run.terminal().clone();

    let mut results = commands::follow(orchestrator, rx, vec![terminal]).await?;

    println!();
    for (index, instance) in run.instances.iter().enumerate() {
        let label = format!("instance_{} ({})", index, args.vcfs[index].display());
        if instance.terminal().status() == TaskStatus::Succeeded {
            output::success(&label);
        } else {
            output::failure(&label);
        }
    }

    let outputs = match results.pop() {
        Some(Ok(outputs)) => outputs,
        Some(Err(e)) => return Err(commands::report_failure("Fan-in", e)),
        None => color_eyre::eyre::bail!("fan-out produced no result"),
    };

    let merged = outputs.get("aggregated_workflows")?;
    output::success(&format!("Merged results: {}", merged.display()));
    println!("{}", std::fs::read_to_string(merged)?);

    Ok(())
}
