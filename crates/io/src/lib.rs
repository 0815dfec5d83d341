// Row sources: CSV exports, Excel workbooks, skill-tracker workbooks

use std::path::Path;

use lessonsync_recon::InputRow;

pub mod csv;
pub mod dates;
pub mod tracker;
pub mod xlsx;

/// Lazy, one-pass stream of data rows plus the header row used for column
/// discovery. Row numbers are 1-based source lines (the header is line 1).
pub struct RowSource {
    pub headers: Vec<String>,
    pub rows: Box<dyn Iterator<Item = Result<InputRow, String>>>,
}

impl RowSource {
    pub fn new(
        headers: Vec<String>,
        rows: Box<dyn Iterator<Item = Result<InputRow, String>>>,
    ) -> Self {
        Self { headers, rows }
    }
}

pub fn is_workbook(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("xlsx" | "xlsm" | "xls" | "xlsb" | "ods")
    )
}

/// Open a row source, picking the reader from the file extension.
/// `sheet` only applies to workbooks; the first sheet is used when absent.
pub fn open(path: &Path, sheet: Option<&str>) -> Result<RowSource, String> {
    if is_workbook(path) {
        xlsx::open_rows(path, sheet)
    } else {
        csv::open_rows(path)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
