use crate::commands;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use clonal_service::{FlowConfig, StageKind};

/// Run a single stage from input files
#[derive(Args, Debug)]
pub struct StageArgs {
    /// Stage to run (transform, cluster, cluster_transform, tree_build, aggregate)
    pub stage: StageKind,

    /// Input files, in the stage's declared order
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Session directory (defaults to <runs_dir>/run_<unix seconds>)
    #[arg(long, short = 's', value_name = "DIR")]
    pub session_dir: Option<PathBuf>,
}

pub async fn execute(args: StageArgs, config: FlowConfig) -> Result<()> {
    let session_dir = match args.session_dir {
        Some(dir) => dir,
        None => commands::default_run_dir(&config)?,
    };

    let (orchestrator, rx) = commands::orchestrator(config, session_dir);
    let id = orchestrator.submit(args.stage, args.inputs)?;
    let handle = orchestrator.handle(&id)?;
    output::status("Submitted", &format!("{} [{}]", args.stage, id));

    let mut results = commands::follow(orchestrator, rx, vec![handle]).await?;
    let outputs = match results.pop() {
        Some(Ok(outputs)) => outputs,
        Some(Err(e)) => return Err(commands::report_failure(args.stage.name(), e)),
        None => color_eyre::eyre::bail!("stage produced no result"),
    };

    println!();
    for (name, path) in outputs.named() {
        println!("{:<20} {}", name, path.display());
    }

    Ok(())
}
