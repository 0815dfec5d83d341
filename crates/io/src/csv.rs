// CSV/TSV row source

use std::fs;
use std::io::Cursor;
use std::path::Path;

use lessonsync_recon::InputRow;

use crate::RowSource;

/// Open a delimited export. The first record is the header row.
pub fn open_rows(path: &Path) -> Result<RowSource, String> {
    let content = read_file_as_utf8(path)?;
    Ok(rows_from_string(content))
}

pub fn rows_from_string(content: String) -> RowSource {
    let content = match content.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => content,
    };
    let delimiter = sniff_delimiter(&content);

    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(Cursor::new(content.into_bytes()));

    let mut records = reader.into_records().enumerate();
    let headers = match records.next() {
        Some((_, Ok(record))) => record.iter().map(|h| h.trim().to_string()).collect(),
        Some((_, Err(e))) => {
            let message = format!("cannot read header row: {e}");
            return RowSource::new(Vec::new(), Box::new(std::iter::once(Err(message))));
        }
        None => Vec::new(),
    };

    let rows = records.map(|(index, result)| -> Result<InputRow, String> {
        let record = result.map_err(|e| e.to_string())?;
        let number = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 1);
        Ok(InputRow::new(
            number,
            record.iter().map(str::to_string).collect(),
        ))
    });

    RowSource::new(headers, Box::new(rows))
}

const DELIMITERS: [u8; 4] = [b'\t', b';', b',', b'|'];
const SNIFF_LINES: usize = 10;

/// Fields in one line when split on `delimiter`, honouring quotes.
fn field_count(line: &str, delimiter: u8) -> usize {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes())
        .records()
        .next()
        .and_then(Result::ok)
        .map_or(1, |record| record.len())
}

/// Pick the delimiter that splits the header into the most columns and
/// keeps that count across the leading lines. Comma when nothing splits.
fn sniff_delimiter(content: &str) -> u8 {
    let lines: Vec<&str> = content.lines().take(SNIFF_LINES).collect();
    let Some(header) = lines.first() else {
        return b',';
    };

    let mut chosen = (b',', 0usize);
    for delimiter in DELIMITERS {
        let width = field_count(header, delimiter);
        if width <= 1 {
            continue;
        }
        let steady = lines
            .iter()
            .filter(|line| field_count(line, delimiter) == width)
            .count();
        let score = steady * width;
        if score > chosen.1 {
            chosen = (delimiter, score);
        }
    }
    chosen.0
}

/// File contents as UTF-8. Spreadsheet exports that are not valid UTF-8
/// are decoded as Windows-1252.
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    String::from_utf8(bytes).or_else(|e| {
        log::debug!("{} is not UTF-8, decoding as Windows-1252", path.display());
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(e.as_bytes());
        Ok(decoded.into_owned())
    })
}
