// lessonsync CLI - reconcile spreadsheet exports against the lesson backend

mod exit_codes;
mod import;
mod reconcile;
mod report;
mod store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lessonsync_config::{credentials, Settings};

use exit_codes::{EXIT_IO, EXIT_SUCCESS, EXIT_USAGE};
use import::ImportArgs;
use reconcile::{AuditArgs, RunArgs};

#[derive(Parser)]
#[command(name = "lsync")]
#[command(about = "Reconcile swimmer and lesson records against spreadsheet exports")]
#[command(version)]
struct Cli {
    /// Settings file (default: ./lessonsync.toml, then the user config dir)
    #[arg(long, global = true, env = "LSYNC_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only; no summary
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update eligible records from a source file
    #[command(after_help = "\
Examples:
  lsync run parent_names clients.csv --dry-run
  lsync run parent_names clients.xlsx --sheet Clients --sql fix.sql
  lsync run skill_levels levels.csv --json > report.json
  lsync run parent_names clients.csv --snapshot backend.json")]
    Run(RunArgs),

    /// Compare a source file with the backend without writing
    #[command(after_help = "\
Examples:
  lsync audit parent_names clients.csv
  lsync audit parent_names clients.csv --list 50 --output audit.json

Exits 65 when eligible records differ from the source.")]
    Audit(AuditArgs),

    /// Import skill progress from a CSV export or a folder of trackers
    #[command(after_help = "\
Examples:
  lsync import-skills progress.csv --dry-run
  lsync import-skills trackers/ --sample 5 --dry-run
  lsync import-skills trackers/ --skip-existing --batch-size 100")]
    ImportSkills(ImportArgs),

    /// Check settings, jobs and aliases without touching the backend
    Validate,
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .parse_default_env()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => reconcile::cmd_run(args, config, cli.quiet),
        Commands::Audit(args) => reconcile::cmd_audit(args, config, cli.quiet),
        Commands::ImportSkills(args) => import::cmd_import_skills(args, config, cli.quiet),
        Commands::Validate => cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ── validate ────────────────────────────────────────────────────────

fn cmd_validate(config: Option<&Path>) -> Result<(), CliError> {
    let settings = Settings::load(config)?;
    match &settings.source {
        Some(path) => eprintln!("settings: {}", path.display()),
        None => eprintln!("settings: defaults (no lessonsync.toml found)"),
    }

    for name in settings.job_names() {
        let job = settings.job(&name)?;
        let recon = settings.recon_for(&job);
        recon.validate()?;
        let reference = match &job.reference {
            Some(r) => format!(", resolves against {}.{}", r.table, r.label_column),
            None => String::new(),
        };
        eprintln!(
            "  job {name}: {}.{} where {} = '{}', label column '{}'{reference}",
            job.table, job.field, job.state_column, recon.mutable_state_value, job.label_header
        );
    }

    let aliases = settings.alias_table()?;
    eprintln!("aliases: {}", aliases.len());

    match credentials::resolve(&settings.backend, &settings.base_dir()) {
        Ok(creds) => eprintln!(
            "backend: {} (url from {}, key from {})",
            creds.url,
            creds.url_source.as_str(),
            creds.key_source.as_str()
        ),
        Err(e) => eprintln!("backend: not configured ({e})"),
    }
    Ok(())
}
