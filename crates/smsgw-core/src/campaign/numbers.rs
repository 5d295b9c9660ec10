//! Destination lists: inline comma separated numbers, CSV/TXT files and
//! XLSX sheets with per-row template parameters.

use calamine::{Data, Reader, Xlsx};
use smsgw_storage::NumFileType;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use thiserror::Error;

/// Largest accepted destination file
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;
pub const MIN_NUMBER_LEN: usize = 5;
pub const MAX_NUMBER_LEN: usize = 15;
/// Required first header of an XLSX sheet
pub const DESTINATION_HEADER: &str = "Destination";

const TRIM: &[char] = &['\t', '\n', '\u{0B}', '\u{0C}', '\r', ' ', '\u{85}', '\u{A0}'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumbersError {
    #[error("entry number {0} is invalid; number must be 5 to 15 characters long")]
    InvalidEntry(usize),

    #[error("no numbers given")]
    Empty,

    #[error("xlsx file should contain exactly one sheet")]
    SheetCount,

    #[error("first cell of excel sheet must be Destination header")]
    MissingHeader,

    #[error("row number {row} contains no value at cell number {cell}")]
    BlankParam { row: usize, cell: usize },

    #[error("couldn't read xlsx file: {0}")]
    Xlsx(String),
}

/// One destination with its template parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub destination: String,
    pub params: BTreeMap<String, String>,
}

impl Row {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            params: BTreeMap::new(),
        }
    }

    /// Replace every `{{Name}}` in `template` with this row's values
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (name, value) in &self.params {
            out = out.replace(&format!("{{{{{}}}}}", name), value);
        }
        out
    }
}

pub fn trim_number(s: &str) -> &str {
    s.trim_matches(TRIM)
}

pub fn valid_number(s: &str) -> bool {
    (MIN_NUMBER_LEN..=MAX_NUMBER_LEN).contains(&s.chars().count())
}

/// Keep the first occurrence of every destination
fn dedup(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|r| seen.insert(r.destination.clone()))
        .collect()
}

/// Parse comma and newline separated numbers
pub fn parse_list(text: &str) -> Result<Vec<Row>, NumbersError> {
    let mut rows = Vec::new();
    for (i, entry) in text.split([',', '\n']).enumerate() {
        let num = trim_number(entry);
        if num.is_empty() {
            continue;
        }
        if !valid_number(num) {
            return Err(NumbersError::InvalidEntry(i + 1));
        }
        rows.push(Row::new(num));
    }
    let rows = dedup(rows);
    if rows.is_empty() {
        return Err(NumbersError::Empty);
    }
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    trim_number(&cell.to_string()).to_string()
}

/// Parse the single sheet of an XLSX workbook
pub fn parse_xlsx(data: &[u8]) -> Result<Vec<Row>, NumbersError> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(data)).map_err(|e| NumbersError::Xlsx(e.to_string()))?;
    if workbook.sheet_names().len() != 1 {
        return Err(NumbersError::SheetCount);
    }
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(NumbersError::SheetCount)?
        .map_err(|e| NumbersError::Xlsx(e.to_string()))?;

    let mut lines = range.rows();
    let headers: Vec<String> = match lines.next() {
        Some(header) => header.iter().map(cell_text).collect(),
        None => return Err(NumbersError::Empty),
    };
    if headers.first().map(String::as_str) != Some(DESTINATION_HEADER) {
        return Err(NumbersError::MissingHeader);
    }

    let mut rows = Vec::new();
    for (i, cells) in lines.enumerate() {
        let line = i + 2;
        let num = cells.first().map(cell_text).unwrap_or_default();
        if !valid_number(&num) {
            return Err(NumbersError::InvalidEntry(line));
        }
        let mut row = Row::new(num);
        for (j, name) in headers.iter().enumerate().skip(1) {
            let value = cells.get(j).map(cell_text).unwrap_or_default();
            if value.is_empty() {
                return Err(NumbersError::BlankParam { row: line, cell: j + 1 });
            }
            row.params.insert(name.clone(), value);
        }
        rows.push(row);
    }
    let rows = dedup(rows);
    if rows.is_empty() {
        return Err(NumbersError::Empty);
    }
    Ok(rows)
}

/// Parse a stored destination file by type
pub fn parse_file(file_type: NumFileType, data: &[u8]) -> Result<Vec<Row>, NumbersError> {
    match file_type {
        NumFileType::Csv | NumFileType::Txt => parse_list(&String::from_utf8_lossy(data)),
        NumFileType::Xlsx => parse_xlsx(data),
    }
}
