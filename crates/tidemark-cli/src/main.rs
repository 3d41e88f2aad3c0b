mod commands;
mod logging;

use std::path::PathBuf;

use clap::Parser;

/// With no arguments every active job catches up through today. A leading
/// `YYYY-MM-DD` backfills that one effective date instead; a job name
/// restricts the invocation to that job.
#[derive(Parser)]
#[command(
    name = "tidemark",
    version,
    about = "Dependency-aware daily ETL job orchestrator"
)]
struct Cli {
    /// Effective date to backfill (YYYY-MM-DD), or a job name
    date_or_job: Option<String>,

    /// Job name, when the first argument is a date
    job: Option<String>,

    /// Path to the engine settings file
    #[arg(long, default_value = "tidemark.yaml")]
    config: PathBuf,

    /// Validate every active job definition without running anything
    #[arg(long)]
    check: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    if cli.check {
        return commands::check::execute(&cli.config);
    }
    let request = commands::run::parse_request(cli.date_or_job.as_deref(), cli.job.as_deref())?;
    commands::run::execute(&cli.config, &request)
}
