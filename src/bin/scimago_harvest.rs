use std::process::ExitCode;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use scimago_harvest::app::App;
use scimago_harvest::config::{ConfigLoader, HarvestConfig};
use scimago_harvest::error::HarvestError;
use scimago_harvest::output::JsonOutput;
use scimago_harvest::store::open_append;

#[derive(Parser)]
#[command(name = "scimago-harvest")]
#[command(about = "Look up every journal of a title catalog on SCImago and store its record")]
#[command(version, author)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Harvest all pending titles (default)")]
    Run,
    #[command(about = "Show how many titles are pending without fetching anything")]
    Status,
    #[command(about = "Delete the resume checkpoint")]
    Reset,
}

#[derive(Args)]
struct Overrides {
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    input: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    output: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    checkpoint: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    no_cache: bool,

    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[arg(long, global = true)]
    max_pages: Option<u32>,

    #[arg(long, global = true)]
    snapshot_every: Option<usize>,

    #[arg(long, global = true)]
    log_file: Option<Utf8PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut HarvestConfig) {
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(checkpoint) = self.checkpoint {
            config.checkpoint = checkpoint;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.cache_dir = cache_dir;
        }
        if self.no_cache {
            config.use_cache = false;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        if let Some(snapshot_every) = self.snapshot_every {
            config.snapshot_every = snapshot_every;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = Some(log_file);
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::InputUnavailable { .. }
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_) => 2,
        HarvestError::CheckpointWrite(_) => 3,
        _ => 1,
    }
}

fn init_tracing(log_file: Option<&Utf8Path>) -> Result<(), HarvestError> {
    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(open_append(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.overrides.config.as_deref())?;
    cli.overrides.apply(&mut config);
    init_tracing(config.log_file.as_deref())?;
    let app = App::new(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let summary = app.run()?;
            JsonOutput::print_run(&summary).into_diagnostic()
        }
        Command::Status => {
            let status = app.status()?;
            JsonOutput::print_status(&status).into_diagnostic()
        }
        Command::Reset => {
            let result = app.reset()?;
            JsonOutput::print_reset(&result).into_diagnostic()
        }
    }
}
