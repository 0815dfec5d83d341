// Skill-tracker workbooks: one swimmer per file, skills grouped in sections

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use lessonsync_recon::progress::{ProgressRow, StrategyRow, TargetRow};
use walkdir::WalkDir;

use crate::dates::parse_date_cell;
use crate::xlsx;

/// Level words that trackers append to the swimmer's name in the filename.
const LEVEL_TOKENS: &[&str] = &["Red", "White", "Yellow", "Green", "Blue", "Master"];
const FILENAME_SUFFIX: &str = "_Skill_Tracker";
const HEADER_CELLS: &[&str] = &["Level", "Target", "Strategy", "Date"];
const DEFAULT_STATUS: &str = "Not Started";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerSection {
    Safety,
    Swim,
    Targets,
    Strategies,
    Notes,
}

impl TrackerSection {
    /// Section that starts at a row whose first cell is `cell`.
    fn detect(cell: &str) -> Option<Self> {
        if cell.contains("Safety Skills") {
            Some(Self::Safety)
        } else if cell.contains("Swim Skills") {
            Some(Self::Swim)
        } else if cell.contains("I Can Swim Targets") {
            Some(Self::Targets)
        } else if cell.contains("Strategies Used") {
            Some(Self::Strategies)
        } else if cell.contains("Additional Notes") {
            Some(Self::Notes)
        } else {
            None
        }
    }

}

/// One skill line: `[level, skill, status, date started, date met, notes]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEntry {
    pub row: usize,
    pub level: String,
    pub skill: String,
    pub status: String,
    pub date_started: Option<NaiveDate>,
    pub date_met: Option<NaiveDate>,
    pub notes: Option<String>,
    pub is_safety_skill: bool,
}

/// One target line: `[target, status, date started, date met, notes]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    pub row: usize,
    pub target: String,
    pub status: String,
    pub date_started: Option<NaiveDate>,
    pub date_met: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// One strategy line: `[strategy, used, notes]`. The used cell is a tick,
/// a yes/true word, or the date the strategy was first used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyEntry {
    pub row: usize,
    pub strategy: String,
    pub is_used: bool,
    pub notes: Option<String>,
}

/// Everything a tracker sheet holds, by section kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerRows {
    pub entries: Vec<TrackerEntry>,
    pub targets: Vec<TargetEntry>,
    pub strategies: Vec<StrategyEntry>,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    pub path: PathBuf,
    pub swimmer_name: String,
    pub entries: Vec<TrackerEntry>,
    pub targets: Vec<TargetEntry>,
    pub strategies: Vec<StrategyEntry>,
}

impl Tracker {
    pub fn progress_rows(&self) -> Vec<ProgressRow> {
        self.entries
            .iter()
            .map(|entry| ProgressRow {
                row: entry.row,
                swimmer_id: None,
                swimmer_name: Some(self.swimmer_name.clone()),
                level: entry.level.clone(),
                skill: entry.skill.clone(),
                status: entry.status.clone(),
                date_started: entry.date_started,
                date_met: entry.date_met,
                notes: entry.notes.clone(),
                is_safety_skill: entry.is_safety_skill,
            })
            .collect()
    }

    pub fn target_rows(&self) -> Vec<TargetRow> {
        self.targets
            .iter()
            .map(|entry| TargetRow {
                row: entry.row,
                swimmer_id: None,
                swimmer_name: Some(self.swimmer_name.clone()),
                target: entry.target.clone(),
                status: entry.status.clone(),
                date_started: entry.date_started,
                date_met: entry.date_met,
                notes: entry.notes.clone(),
            })
            .collect()
    }

    pub fn strategy_rows(&self) -> Vec<StrategyRow> {
        self.strategies
            .iter()
            .map(|entry| StrategyRow {
                row: entry.row,
                swimmer_id: None,
                swimmer_name: Some(self.swimmer_name.clone()),
                strategy: entry.strategy.clone(),
                is_used: entry.is_used,
                notes: entry.notes.clone(),
            })
            .collect()
    }
}

/// Read a tracker workbook (first sheet).
pub fn read_tracker(path: &Path) -> Result<Tracker, String> {
    let sheet = xlsx::read_rows(path, None)?;
    let TrackerRows {
        entries,
        targets,
        strategies,
    } = parse_tracker_rows(&sheet.rows, sheet.first_row);
    log::debug!(
        "{}: {} skill, {} target, {} strategy rows",
        path.display(),
        entries.len(),
        targets.len(),
        strategies.len()
    );
    Ok(Tracker {
        path: path.to_path_buf(),
        swimmer_name: swimmer_name_from_filename(path),
        entries,
        targets,
        strategies,
    })
}

/// Walk sections top to bottom. Skill rows need both a level and a skill;
/// target and strategy rows need a name in the first cell.
pub fn parse_tracker_rows(rows: &[Vec<String>], first_row: usize) -> TrackerRows {
    let mut section = None;
    let mut parsed = TrackerRows::default();

    for (i, row) in rows.iter().enumerate() {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let first = cell(row, 0);
        if let Some(found) = TrackerSection::detect(first) {
            section = Some(found);
            continue;
        }
        if HEADER_CELLS.contains(&first) {
            continue;
        }

        let number = first_row + i;
        match section {
            Some(current @ (TrackerSection::Safety | TrackerSection::Swim)) => {
                let (level, skill) = (first, cell(row, 1));
                if level.is_empty() || skill.is_empty() {
                    continue;
                }
                parsed.entries.push(TrackerEntry {
                    row: number,
                    level: level.to_string(),
                    skill: skill.to_string(),
                    status: status_cell(cell(row, 2)),
                    date_started: parse_date_cell(cell(row, 3)),
                    date_met: parse_date_cell(cell(row, 4)),
                    notes: notes_cell(cell(row, 5)),
                    is_safety_skill: current == TrackerSection::Safety,
                });
            }
            Some(TrackerSection::Targets) if !first.is_empty() => {
                parsed.targets.push(TargetEntry {
                    row: number,
                    target: first.to_string(),
                    status: status_cell(cell(row, 1)),
                    date_started: parse_date_cell(cell(row, 2)),
                    date_met: parse_date_cell(cell(row, 3)),
                    notes: notes_cell(cell(row, 4)),
                });
            }
            Some(TrackerSection::Strategies) if !first.is_empty() => {
                parsed.strategies.push(StrategyEntry {
                    row: number,
                    strategy: first.to_string(),
                    is_used: used_cell(cell(row, 1)),
                    notes: notes_cell(cell(row, 2)),
                });
            }
            _ => {}
        }
    }

    parsed
}

fn status_cell(value: &str) -> String {
    match value {
        "" => DEFAULT_STATUS.to_string(),
        s => s.to_string(),
    }
}

fn notes_cell(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn used_cell(value: &str) -> bool {
    let word = value.to_lowercase();
    matches!(word.as_str(), "true" | "yes" | "y" | "x" | "used" | "\u{2713}" | "\u{2714}")
        || parse_date_cell(value).is_some()
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|c| c.trim()).unwrap_or("")
}

/// `Ava_Lee_Yellow_Skill_Tracker.xlsx` → `Ava Lee`. Level tokens are only
/// dropped after the first name.
pub fn swimmer_name_from_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.replace(FILENAME_SUFFIX, "");

    let mut tokens = stem.split('_').filter(|t| !t.trim().is_empty());
    let Some(first) = tokens.next() else {
        return String::new();
    };
    let mut parts = vec![first.trim()];
    parts.extend(
        tokens
            .map(str::trim)
            .filter(|t| !LEVEL_TOKENS.contains(t)),
    );
    parts.join(" ")
}

/// Every `.xlsx` under `dir`, sorted, skipping Office lock files (`~$…`).
pub fn find_workbooks(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| format!("cannot scan {}: {e}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("~$") {
            continue;
        }
        let is_xlsx = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
        if is_xlsx {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}
