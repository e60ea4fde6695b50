use crate::commands;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use clonal_service::{FlowConfig, OperationCall};

/// Execute a JSON array of {name, arguments} calls in one session
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON file holding the calls
    pub calls: PathBuf,

    /// Session directory (defaults to <runs_dir>/run_<unix seconds>)
    #[arg(long, short = 's', value_name = "DIR")]
    pub session_dir: Option<PathBuf>,
}

pub async fn execute(args: ReplayArgs, config: FlowConfig) -> Result<()> {
    if !args.calls.exists() {
        color_eyre::eyre::bail!("Calls file not found: {}", args.calls.display());
    }
    let content = std::fs::read_to_string(&args.calls)?;
    let calls: Vec<OperationCall> = serde_json::from_str(&content)?;

    let session_dir = match args.session_dir {
        Some(dir) => dir,
        None => commands::default_run_dir(&config)?,
    };
    output::header(&format!(
        "Replaying {} calls in {}",
        calls.len(),
        session_dir.display()
    ));

    let (orchestrator, rx) = commands::orchestrator(config, session_dir);

    // Ids are deterministic, so later calls may name handles returned by earlier ones
    let mut launched = Vec::with_capacity(calls.len());
    for call in calls {
        let name = call.name.clone();
        let id = orchestrator.dispatch(call.into_operation()?)?;
        output::status("Called", &format!("{} -> {}", name, id));
        launched.push((name, orchestrator.handle(&id)?));
    }

    let handles = launched.iter().map(|(_, handle)| handle.clone()).collect();
    let results = commands::follow(orchestrator, rx, handles).await?;

    println!();
    let mut first_failure = None;
    for ((name, handle), result) in launched.iter().zip(results) {
        match result {
            Ok(outputs) => {
                output::success(&format!("{} [{}]", name, handle.id()));
                for path in outputs.paths() {
                    output::dim(&format!("    {}", path.display()));
                }
            }
            Err(e) => {
                output::failure(&format!("{} [{}]: {}", name, handle.id(), e));
                first_failure.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_failure {
        return Err(color_eyre::eyre::eyre!(e));
    }
    Ok(())
}
