//! `lsync run` and `lsync audit` — reconcile a source file against a job's
//! target table.

use std::path::{Path, PathBuf};

use clap::Args;
use lessonsync_config::{JobSettings, Settings};
use lessonsync_recon::schema::{FieldSpec, RowSchema, CONTEXT_FIELD, LABEL_FIELD};
use lessonsync_recon::sql::SqlTarget;
use lessonsync_recon::{
    AliasTable, MemoryStore, ReconConfig, ReconReport, Reconciler, TargetStore,
};

use crate::exit_codes;
use crate::report::{self, AuditReport};
use crate::store::{self, RestTargetStore};
use crate::CliError;

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Job name (see `lsync validate` for the configured jobs)
    pub job: String,

    /// Source file (.csv, .tsv, .txt, .xlsx, .xls, .xlsb, .ods)
    pub input: PathBuf,

    /// Sheet name for workbooks (default: first sheet)
    #[arg(long)]
    pub sheet: Option<String>,

    /// Read and write a JSON snapshot instead of the backend
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Record planned changes without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the full report as JSON to stdout
    #[arg(long)]
    pub json: bool,

    /// Write the full report as JSON to a file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Write guarded UPDATE statements for the changes to a file
    #[arg(long, value_name = "FILE")]
    pub sql: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Number of mismatches to list
    #[arg(long, default_value = "20")]
    pub list: usize,

    /// Print the audit as JSON to stdout
    #[arg(long)]
    pub json: bool,

    /// Write the audit as JSON to a file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Header needles the job's source file must carry.
pub fn field_specs(job: &JobSettings) -> Vec<FieldSpec> {
    let mut specs = vec![FieldSpec::required(LABEL_FIELD, &job.label_header)];
    if let Some(context) = &job.context_header {
        if job.reference.is_some() {
            specs.push(FieldSpec::required(CONTEXT_FIELD, context));
        } else {
            specs.push(FieldSpec::optional(CONTEXT_FIELD, context));
        }
    }
    specs
}

pub fn sql_target(job: &JobSettings, config: &ReconConfig) -> SqlTarget {
    SqlTarget {
        table: job.table.clone(),
        id_column: job.id_column.clone(),
        state_column: job.state_column.clone(),
        field: job.field.clone(),
        eligible_state: config.mutable_state_value.clone(),
    }
}

/// Everything a run needs, loaded before the backend is touched.
struct Prepared {
    settings: Settings,
    job: JobSettings,
    config: ReconConfig,
    aliases: AliasTable,
}

fn prepare(config_path: Option<&Path>, job_name: &str, dry_run: bool) -> Result<Prepared, CliError> {
    let settings = Settings::load(config_path)?;
    let job = settings.job(job_name)?;
    let mut config = settings.recon_for(&job);
    config.dry_run = config.dry_run || dry_run;
    config.validate()?;
    let aliases = settings.alias_table()?;
    Ok(Prepared {
        settings,
        job,
        config,
        aliases,
    })
}

fn reconcile_with<S: TargetStore>(
    prepared: &Prepared,
    job_name: &str,
    source: &SourceArgs,
    store: &mut S,
) -> Result<ReconReport, CliError> {
    let rows = lessonsync_io::open(&source.input, source.sheet.as_deref()).map_err(|e| CliError {
        code: exit_codes::EXIT_IO,
        message: e,
        hint: None,
    })?;
    let schema = RowSchema::sniff(&rows.headers, &field_specs(&prepared.job))?;

    let mut reconciler = Reconciler::new(job_name, &prepared.config, &prepared.aliases, store)?
        .resolve_references(prepared.job.reference.is_some());
    Ok(reconciler.run(&schema, rows.rows)?)
}

/// Run against the snapshot when given, otherwise the backend.
fn execute(prepared: &Prepared, source: &SourceArgs) -> Result<ReconReport, CliError> {
    if !source.input.exists() {
        return Err(CliError {
            code: exit_codes::EXIT_IO,
            message: format!("input not found: {}", source.input.display()),
            hint: None,
        });
    }

    match &source.snapshot {
        Some(path) => snapshot_run(path, prepared.config.dry_run, |store| {
            reconcile_with(prepared, &source.job, source, store)
        }),
        None => {
            let client = store::connect(&prepared.settings, &prepared.job.table)?;
            let mut store = RestTargetStore::new(client, prepared.job.clone());
            reconcile_with(prepared, &source.job, source, &mut store)
        }
    }
}

/// Run against a snapshot file and write it back when anything changed.
/// A run that fails partway still saves the updates it already made.
fn snapshot_run(
    path: &Path,
    dry_run: bool,
    run: impl FnOnce(&mut MemoryStore) -> Result<ReconReport, CliError>,
) -> Result<ReconReport, CliError> {
    let mut store = store::load_snapshot(path)?;
    match run(&mut store) {
        Ok(report) => {
            if !dry_run && report.summary.applied > 0 {
                store::save_snapshot(path, &store)?;
            }
            Ok(report)
        }
        Err(err) if !dry_run && !store.updates().is_empty() => {
            store::save_snapshot(path, &store)?;
            Err(err.with_hint(format!(
                "updates made before the failure were saved to {}; a re-run skips them as unchanged",
                path.display()
            )))
        }
        Err(err) => Err(err),
    }
}

pub fn cmd_run(args: RunArgs, config_path: Option<&Path>, quiet: bool) -> Result<(), CliError> {
    let prepared = prepare(config_path, &args.source.job, args.dry_run)?;
    let report = execute(&prepared, &args.source)?;

    report::emit_json(&report, args.json, args.output.as_deref())?;
    if let Some(path) = &args.sql {
        report::write_sql(path, &sql_target(&prepared.job, &prepared.config), &report)?;
    }
    if !quiet {
        report::print_run_summary(&report);
    }

    if report.summary.errors > 0 {
        return Err(CliError {
            code: exit_codes::EXIT_ROW_ERRORS,
            message: format!("{} row(s) failed", report.summary.errors),
            hint: Some("re-run is safe: rows already updated are skipped as unchanged".into()),
        });
    }
    Ok(())
}

pub fn cmd_audit(args: AuditArgs, config_path: Option<&Path>, quiet: bool) -> Result<(), CliError> {
    let prepared = prepare(config_path, &args.source.job, true)?;
    let report = execute(&prepared, &args.source)?;
    let audit = AuditReport::from_report(&report, args.list);

    report::emit_json(&audit, args.json, args.output.as_deref())?;
    if !quiet {
        audit.print();
    }

    if audit.needs_update > 0 {
        return Err(CliError {
            code: exit_codes::EXIT_AUDIT_MISMATCH,
            message: format!("{} record(s) need updating", audit.needs_update),
            hint: Some(format!("lsync run {} <input>", audit.job)),
        });
    }
    Ok(())
}
