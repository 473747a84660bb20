use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use sat_retrieval_manager::app::{Orchestrator, ProgressSink, RetrievalOptions, RunReport};
use sat_retrieval_manager::config::{ConfigLoader, ResolvedConfig, ResolvedProject};
use sat_retrieval_manager::domain::{parse_date, timeslots};
use sat_retrieval_manager::error::RetrievalError;
use sat_retrieval_manager::fetch::HttpFetcher;
use sat_retrieval_manager::output::{JsonOutput, LogSink};

#[derive(Parser)]
#[command(name = "srm")]
#[command(about = "Idempotent satellite imagery retrieval with a completion ledger")]
#[command(version, author)]
struct Cli {
    /// Log progress events to stderr.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Retrieve every missing unit of the configured projects")]
    Fetch(FetchArgs),
    #[command(about = "Report the gap of the configured projects without fetching")]
    Gap(ProjectArgs),
    #[command(about = "Print the time slots generated for a date range")]
    Timeslots(TimeslotArgs),
}

#[derive(Args, Clone)]
struct ProjectArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    project: Option<String>,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    target: ProjectArgs,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct TimeslotArgs {
    #[arg(long)]
    start: String,

    #[arg(long)]
    end: String,

    #[arg(long)]
    chunks: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RetrievalError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RetrievalError) -> u8 {
    match error {
        RetrievalError::MissingConfig
        | RetrievalError::ConfigRead(_)
        | RetrievalError::ConfigParse(_)
        | RetrievalError::InvalidDate(_)
        | RetrievalError::InvalidProject(_)
        | RetrievalError::InvalidUnit(_) => 2,
        error if error.is_operational() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink: &dyn ProgressSink = if cli.verbose { &LogSink } else { &JsonOutput };

    match cli.command {
        Commands::Fetch(args) => run_fetch(&args.target, args.dry_run, sink),
        Commands::Gap(args) => run_fetch(&args, true, sink),
        Commands::Timeslots(args) => {
            let slots = timeslots(parse_date(&args.start)?, parse_date(&args.end)?, args.chunks)?;
            JsonOutput::print_timeslots(&slots).into_diagnostic()
        }
    }
}

fn run_fetch(args: &ProjectArgs, dry_run: bool, sink: &dyn ProgressSink) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?;
    let projects = select_projects(&resolved, args.project.as_deref())?;
    let options = RetrievalOptions {
        dry_run,
        plot_threshold: resolved.plot_threshold,
        ledger_ext: resolved.operation_ext.clone(),
    };

    let mut reports: Vec<RunReport> = Vec::with_capacity(projects.len());
    for project in projects {
        let fetcher = HttpFetcher::new(&resolved.client, project.request_name.clone())?;
        let orchestrator = Orchestrator::new(fetcher, resolved.client.clone());
        reports.push(orchestrator.run(&project.request, &options, sink)?);
    }
    JsonOutput::print_reports(&reports).into_diagnostic()?;

    if let Some(report) = reports.iter().find(|report| report.failed().next().is_some()) {
        return Err(RetrievalError::BatchIncomplete {
            project: report.project.clone(),
            failed: report.failed().count(),
        }
        .into());
    }
    Ok(())
}

fn select_projects<'a>(
    resolved: &'a ResolvedConfig,
    name: Option<&str>,
) -> Result<Vec<&'a ResolvedProject>, RetrievalError> {
    match name {
        Some(name) => resolved
            .project(name)
            .map(|project| vec![project])
            .ok_or_else(|| RetrievalError::InvalidProject(name.to_string())),
        None if resolved.projects.is_empty() => Err(RetrievalError::ConfigParse(
            "no projects configured".to_string(),
        )),
        None => Ok(resolved.projects.iter().collect()),
    }
}
