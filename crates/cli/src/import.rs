//! `lsync import-skills` — load skill progress from a CSV export or a
//! folder of skill-tracker workbooks into the progress table. Trackers
//! also feed the targets and strategies tables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use clap::Args;
use lessonsync_config::settings::ProgressColumns;
use lessonsync_config::Settings;
use lessonsync_io::dates::parse_date_cell;
use lessonsync_io::tracker;
use lessonsync_recon::normalize::clean_label;
use lessonsync_recon::progress::{
    ProgressPlanner, ProgressRow, ProgressSummary, SectionPlan, SectionSummary, StatusMap,
    StrategyRow, TargetRow,
};
use lessonsync_recon::schema::{FieldSpec, RowSchema};
use lessonsync_recon::store::{write_batched, ProgressStore, StoreError, WriteTally};
use lessonsync_recon::AliasTable;
use serde::Serialize;

use crate::exit_codes;
use crate::report;
use crate::store::{self, RestProgressStore};
use crate::CliError;

const SWIMMER_ID: &str = "swimmer_id";
const SWIMMER_NAME: &str = "swimmer_name";
const LEVEL: &str = "level";
const SKILL: &str = "skill";
const STATUS: &str = "status";
const DATE_STARTED: &str = "date_started";
const DATE_MET: &str = "date_met";
const NOTES: &str = "notes";
const SAFETY: &str = "safety";

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Progress CSV/workbook, or a directory of skill-tracker workbooks
    pub path: PathBuf,

    /// Resolve and report without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Only read the first N tracker workbooks
    #[arg(long, value_name = "N")]
    pub sample: Option<usize>,

    /// Skip (swimmer, skill) pairs already stored
    #[arg(long)]
    pub skip_existing: bool,

    /// Records per upsert request (default from settings)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Read and write a JSON snapshot instead of the backend
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Print the import report as JSON to stdout
    #[arg(long)]
    pub json: bool,

    /// Write the import report as JSON to a file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub dry_run: bool,
    pub files: usize,
    pub failed_files: Vec<String>,
    pub summary: ProgressSummary,
    pub written: usize,
    pub failed: usize,
    pub batches: usize,
    pub fallbacks: usize,
    pub targets: SectionReport,
    pub strategies: SectionReport,
    pub variations: BTreeMap<String, String>,
    pub unresolved_swimmers: BTreeSet<String>,
    pub unresolved_skills: BTreeSet<String>,
    pub errors: Vec<String>,
}

impl ImportReport {
    /// Failed records across all three tables.
    pub fn failed_records(&self) -> usize {
        self.failed + self.targets.failed + self.strategies.failed
    }
}

/// Outcome of the targets or strategies upsert.
#[derive(Debug, Default, Serialize)]
pub struct SectionReport {
    #[serde(flatten)]
    pub summary: SectionSummary,
    pub written: usize,
    pub failed: usize,
    pub batches: usize,
    pub fallbacks: usize,
}

impl SectionReport {
    fn record(&mut self, tally: WriteTally, errors: &mut Vec<String>) {
        self.written = tally.written;
        self.failed = tally.failed;
        self.batches = tally.batches;
        self.fallbacks = tally.fallbacks;
        errors.extend(tally.errors);
    }
}

// ── Reading ─────────────────────────────────────────────────────────

/// Rows parsed from the input plus the number of files read and the
/// files that could not be read. Targets and strategies only come from
/// tracker workbooks.
#[derive(Default)]
struct Loaded {
    rows: Vec<ProgressRow>,
    targets: Vec<TargetRow>,
    strategies: Vec<StrategyRow>,
    files: usize,
    failed_files: Vec<String>,
}

fn load_trackers(dir: &Path, sample: Option<usize>) -> Result<Loaded, CliError> {
    let mut paths = tracker::find_workbooks(dir).map_err(report::io_err)?;
    if let Some(n) = sample {
        paths.truncate(n);
    }
    if paths.is_empty() {
        return Err(CliError::args(format!("no .xlsx workbooks under {}", dir.display())));
    }

    let mut loaded = Loaded::default();
    for path in &paths {
        match tracker::read_tracker(path) {
            Ok(t) => {
                loaded.files += 1;
                loaded.rows.extend(t.progress_rows());
                loaded.targets.extend(t.target_rows());
                loaded.strategies.extend(t.strategy_rows());
            }
            Err(e) => {
                log::warn!("{}: {e}", path.display());
                loaded.failed_files.push(path.display().to_string());
            }
        }
    }
    log::info!(
        "read {} skill, {} target and {} strategy rows from {} workbook(s)",
        loaded.rows.len(),
        loaded.targets.len(),
        loaded.strategies.len(),
        loaded.files
    );
    Ok(loaded)
}

fn progress_specs(columns: &ProgressColumns) -> Vec<FieldSpec> {
    vec![
        FieldSpec::optional(SWIMMER_ID, &columns.swimmer_id),
        FieldSpec::optional(SWIMMER_NAME, &columns.swimmer_name),
        FieldSpec::required(LEVEL, &columns.level),
        FieldSpec::required(SKILL, &columns.skill),
        FieldSpec::optional(STATUS, &columns.status),
        FieldSpec::optional(DATE_STARTED, &columns.date_started),
        FieldSpec::optional(DATE_MET, &columns.date_met),
        FieldSpec::optional(NOTES, &columns.notes),
        FieldSpec::optional(SAFETY, &columns.safety),
    ]
}

pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1" | "x"
    )
}

fn load_table(path: &Path, columns: &ProgressColumns) -> Result<Loaded, CliError> {
    let source = lessonsync_io::open(path, None).map_err(report::io_err)?;
    let schema = RowSchema::sniff(&source.headers, &progress_specs(columns))?;
    if !schema.has(SWIMMER_ID) && !schema.has(SWIMMER_NAME) {
        return Err(CliError::args(format!(
            "no swimmer column (looked for '{}' and '{}')",
            columns.swimmer_id, columns.swimmer_name
        ))
        .with_hint("set [skills.columns] swimmer_id or swimmer_name in lessonsync.toml"));
    }

    let text = |row: &lessonsync_recon::InputRow, field: &str| -> Option<String> {
        schema
            .get(row, field)
            .map(clean_label)
            .filter(|v| !v.is_empty())
    };

    let mut rows = Vec::new();
    let mut last = 1;
    for row in source.rows {
        let row = row.map_err(|e| CliError {
            code: exit_codes::EXIT_SOURCE,
            message: format!("cannot read {} after row {last}: {e}", path.display()),
            hint: None,
        })?;
        last = row.number;
        rows.push(ProgressRow {
            row: row.number,
            swimmer_id: text(&row, SWIMMER_ID),
            swimmer_name: text(&row, SWIMMER_NAME),
            level: text(&row, LEVEL).unwrap_or_default(),
            skill: text(&row, SKILL).unwrap_or_default(),
            status: text(&row, STATUS).unwrap_or_default(),
            date_started: text(&row, DATE_STARTED).and_then(|d| parse_date_cell(&d)),
            date_met: text(&row, DATE_MET).and_then(|d| parse_date_cell(&d)),
            notes: text(&row, NOTES),
            is_safety_skill: text(&row, SAFETY).is_some_and(|v| parse_flag(&v)),
        });
    }

    Ok(Loaded {
        rows,
        files: 1,
        ..Loaded::default()
    })
}

// ── Import ──────────────────────────────────────────────────────────

struct ImportOptions<'a> {
    aliases: &'a AliasTable,
    statuses: &'a StatusMap,
    skip_existing: bool,
    batch_size: usize,
    dry_run: bool,
}

fn import_with<S: ProgressStore>(
    store: &mut S,
    loaded: Loaded,
    options: &ImportOptions<'_>,
) -> Result<ImportReport, CliError> {
    let backend = |e: StoreError| CliError {
        code: exit_codes::EXIT_BACKEND,
        message: e.to_string(),
        hint: None,
    };

    let swimmers = store.swimmers().map_err(backend)?;
    let skills = store.skills().map_err(backend)?;
    log::info!("{} swimmers, {} skills", swimmers.len(), skills.len());

    let mut planner = ProgressPlanner::new(options.aliases, swimmers, skills, options.statuses);
    if options.skip_existing {
        planner = planner.skip_existing(store.existing_progress().map_err(backend)?);
    }
    let plan = planner.plan(loaded.rows);
    let targets = planner.plan_targets(loaded.targets);
    let strategies = planner.plan_strategies(loaded.strategies);

    let mut unresolved_swimmers = plan.unresolved_swimmers;
    unresolved_swimmers.extend(targets.unresolved_swimmers.iter().cloned());
    unresolved_swimmers.extend(strategies.unresolved_swimmers.iter().cloned());

    let mut report = ImportReport {
        dry_run: options.dry_run,
        files: loaded.files,
        failed_files: loaded.failed_files,
        summary: plan.summary.clone(),
        targets: section(&targets),
        strategies: section(&strategies),
        variations: plan.variations,
        unresolved_swimmers,
        unresolved_skills: plan.unresolved_skills,
        ..ImportReport::default()
    };

    if options.dry_run {
        log::info!(
            "dry run: {} progress, {} target and {} strategy record(s) prepared, nothing written",
            plan.records.len(),
            targets.records.len(),
            strategies.records.len()
        );
        return Ok(report);
    }

    let tally = write_batched(&plan.records, options.batch_size, |chunk| {
        store.upsert_progress(chunk)
    });
    report.written = tally.written;
    report.failed = tally.failed;
    report.batches = tally.batches;
    report.fallbacks = tally.fallbacks;
    report.errors = tally.errors;

    let tally = write_batched(&targets.records, options.batch_size, |chunk| {
        store.upsert_targets(chunk)
    });
    report.targets.record(tally, &mut report.errors);
    let tally = write_batched(&strategies.records, options.batch_size, |chunk| {
        store.upsert_strategies(chunk)
    });
    report.strategies.record(tally, &mut report.errors);
    Ok(report)
}

fn section<T>(plan: &SectionPlan<T>) -> SectionReport {
    SectionReport {
        summary: plan.summary.clone(),
        ..SectionReport::default()
    }
}

/// Records written, across all three tables.
fn written_records(report: &ImportReport) -> usize {
    report.written + report.targets.written + report.strategies.written
}

fn print_import_summary(report: &ImportReport) {
    let s = &report.summary;
    eprintln!(
        "{} rows from {} file(s): {} prepared, {} no swimmer, {} no skill, {} duplicate, {} already stored",
        s.rows, report.files, s.prepared, s.no_swimmer, s.no_skill, s.duplicates, s.existing
    );
    if s.ambiguous > 0 {
        eprintln!("  {} ambiguous match(es) resolved to the first candidate", s.ambiguous);
    }
    if report.dry_run {
        eprintln!("  dry run: nothing written");
    } else {
        eprintln!(
            "  written: {} in {} batch(es), {} failed ({} batch fallback(s))",
            report.written, report.batches, report.failed, report.fallbacks
        );
    }
    for (name, section) in [("targets", &report.targets), ("strategies", &report.strategies)] {
        let s = &section.summary;
        if s.rows == 0 {
            continue;
        }
        eprintln!(
            "{name}: {} rows, {} prepared, {} no swimmer, {} unnamed, {} duplicate",
            s.rows, s.prepared, s.no_swimmer, s.no_name, s.duplicates
        );
        if !report.dry_run {
            eprintln!(
                "  written: {} in {} batch(es), {} failed ({} batch fallback(s))",
                section.written, section.batches, section.failed, section.fallbacks
            );
        }
    }
    if !report.variations.is_empty() {
        eprintln!("skill label variations:");
        for (from, to) in &report.variations {
            eprintln!("  '{from}' -> '{to}'");
        }
    }
    for name in report.unresolved_swimmers.iter().take(20) {
        eprintln!("  unknown swimmer: {name}");
    }
    for skill in report.unresolved_skills.iter().take(20) {
        eprintln!("  unknown skill: {skill}");
    }
    for file in &report.failed_files {
        eprintln!("  unreadable: {file}");
    }
}

pub fn cmd_import_skills(args: ImportArgs, config_path: Option<&Path>, quiet: bool) -> Result<(), CliError> {
    let settings = Settings::load(config_path)?;
    let aliases = settings.alias_table()?;
    let statuses = StatusMap::with_overrides(&settings.skills.statuses);

    if !args.path.exists() {
        return Err(report::io_err(format!("not found: {}", args.path.display())));
    }
    let loaded = if args.path.is_dir() {
        load_trackers(&args.path, args.sample)?
    } else {
        load_table(&args.path, &settings.skills.columns)?
    };

    let options = ImportOptions {
        aliases: &aliases,
        statuses: &statuses,
        skip_existing: args.skip_existing || settings.skills.skip_existing,
        batch_size: args.batch_size.unwrap_or_else(|| settings.progress_batch_size()).max(1),
        dry_run: args.dry_run,
    };

    let result = match &args.snapshot {
        Some(path) => {
            let mut store = store::load_snapshot(path)?;
            let result = import_with(&mut store, loaded, &options)?;
            if written_records(&result) > 0 {
                store::save_snapshot(path, &store)?;
            }
            result
        }
        None => {
            let client = store::connect(&settings, &settings.skills.progress_table)?;
            let mut store = RestProgressStore::new(client, settings.skills.clone());
            import_with(&mut store, loaded, &options)?
        }
    };

    report::emit_json(&result, args.json, args.output.as_deref())?;
    if !quiet {
        print_import_summary(&result);
    }

    if result.failed_records() > 0 || !result.failed_files.is_empty() {
        return Err(CliError {
            code: exit_codes::EXIT_ROW_ERRORS,
            message: format!(
                "{} record(s) failed, {} file(s) unreadable",
                result.failed_records(),
                result.failed_files.len()
            ),
            hint: None,
        });
    }
    Ok(())
}
