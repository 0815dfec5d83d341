// Excel row source (xlsx, xls, xlsb, ods)

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use lessonsync_recon::InputRow;

use crate::RowSource;

/// A sheet read into text cells. `rows[i]` is worksheet row `first_row + i`
/// (1-based), with leading columns padded so cell `j` is column `j`.
pub struct SheetRows {
    pub name: String,
    pub first_row: usize,
    pub rows: Vec<Vec<String>>,
}

/// Read one sheet (by name, or the first sheet) as text cells.
pub fn read_rows(path: &Path, sheet: Option<&str>) -> Result<SheetRows, String> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open Excel file {}: {}", path.display(), e))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(wanted) => sheet_names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| {
                format!(
                    "sheet '{wanted}' not found (available: {})",
                    sheet_names.join(", ")
                )
            })?,
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| "Excel file contains no sheets".to_string())?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| format!("Failed to read sheet '{}': {}", name, e))?;

    // Range start offset (data may not begin at A1)
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let rows = range
        .rows()
        .map(|row| {
            let mut cells = vec![String::new(); start_col as usize];
            cells.extend(row.iter().map(cell_to_string));
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            cells
        })
        .collect();

    Ok(SheetRows {
        name,
        first_row: start_row as usize + 1,
        rows,
    })
}

/// Open a sheet as a row source. The first non-blank row is the header.
pub fn open_rows(path: &Path, sheet: Option<&str>) -> Result<RowSource, String> {
    let sheet = read_rows(path, sheet)?;
    log::debug!("reading sheet '{}' of {}", sheet.name, path.display());

    let first_row = sheet.first_row;
    let mut numbered = sheet
        .rows
        .into_iter()
        .enumerate()
        .map(move |(i, cells)| InputRow::new(first_row + i, cells))
        .filter(|row| row.cells.iter().any(|c| !c.trim().is_empty()));

    let headers = numbered
        .next()
        .map(|row| row.cells.iter().map(|h| h.trim().to_string()).collect())
        .unwrap_or_default();
    let rows: Vec<Result<InputRow, String>> = numbered.map(Ok).collect();

    Ok(RowSource::new(headers, Box::new(rows.into_iter())))
}

/// Text form of a cell. Whole floats print without decimals so ids and
/// serial dates survive; dates print as their serial day number.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::Error(e) => format!("#{:?}", e),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}
