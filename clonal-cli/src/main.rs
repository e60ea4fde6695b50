mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    replay::ReplayArgs, run::RunArgs, run_many::RunManyArgs, stage::StageArgs,
};

/// Run clonal-evolution pipelines over external analysis tools
#[derive(Parser, Debug)]
#[command(name = "clonal", version, about)]
struct Cli {
    /// Configuration file (defaults to ~/.clonal/config.yaml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of external processes running at once
    #[arg(long, global = true, value_name = "N")]
    max_procs: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one VCF
    Run(RunArgs),

    /// Run the pipeline for several VCFs concurrently and merge the results
    RunMany(RunManyArgs),

    /// Run a single stage from input files
    Stage(StageArgs),

    /// Execute a JSON array of {name, arguments} calls in one session
    Replay(ReplayArgs),

    /// Print the operation catalogue as JSON function descriptions
    Operations,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Respects RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Command::Operations = cli.command {
        return commands::operations::execute();
    }

    let config = commands::load_config(cli.config.as_deref(), cli.max_procs)?;

    match cli.command {
        Command::Run(args) => commands::run::execute(args, config).await,
        Command::RunMany(args) => commands::run_many::execute(args, config).await,
        Command::Stage(args) => commands::stage::execute(args, config).await,
        Command::Replay(args) => commands::replay::execute(args, config).await,
        Command::Operations => commands::operations::execute(),
    }
}
