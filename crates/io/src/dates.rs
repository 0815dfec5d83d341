// Date cells as they appear in exports and tracker workbooks

use chrono::{Days, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Serial 2958465 is 9999-12-31, the last date Excel can show.
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Parse a cell into a calendar date. Text formats are tried first
/// (month-first before day-first), then an Excel serial day number.
pub fn parse_date_cell(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Some(datetime.date());
        }
    }

    value.parse::<f64>().ok().and_then(excel_serial_to_date)
}

/// Excel 1900 date system, counted from 1899-12-30 so that the phantom
/// 1900-02-29 lines up. The time-of-day fraction is dropped.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_EXCEL_SERIAL {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.floor() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn iso_and_us_formats() {
        assert_eq!(parse_date_cell("2024-03-15"), ymd(2024, 3, 15));
        assert_eq!(parse_date_cell(" 03/15/2024 "), ymd(2024, 3, 15));
    }

    #[test]
    fn month_first_wins_when_ambiguous() {
        assert_eq!(parse_date_cell("03/04/2024"), ymd(2024, 3, 4));
        assert_eq!(parse_date_cell("25/12/2024"), ymd(2024, 12, 25));
    }

    #[test]
    fn datetime_keeps_date_part() {
        assert_eq!(parse_date_cell("2024-03-15 14:30:00"), ymd(2024, 3, 15));
        assert_eq!(parse_date_cell("03/15/2024 08:00:00"), ymd(2024, 3, 15));
        assert_eq!(parse_date_cell("2024-03-15T14:30:00"), ymd(2024, 3, 15));
    }

    #[test]
    fn excel_serials() {
        assert_eq!(parse_date_cell("45366"), ymd(2024, 3, 15));
        assert_eq!(parse_date_cell("45366.75"), ymd(2024, 3, 15));
        assert_eq!(excel_serial_to_date(1.0), ymd(1899, 12, 31));
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(excel_serial_to_date(-3.0), None);
        assert_eq!(excel_serial_to_date(f64::NAN), None);
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_date_cell(""), None);
        assert_eq!(parse_date_cell("soon"), None);
        assert_eq!(parse_date_cell("13/13/2024"), None);
    }
}
