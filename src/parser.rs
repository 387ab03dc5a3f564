// Tabular parsers - CSV and spreadsheet files into ImportRows
//
// Every parser yields one ImportRow per data line with the header row
// providing column names. Fully blank lines are dropped.

use crate::error::{ImportError, Result};
use crate::row::{CellValue, ImportRow};
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Csv,
    /// xlsx, xlsm, xls, xlsb, ods
    Spreadsheet,
}

impl SourceFormat {
    pub fn name(&self) -> &str {
        match self {
            SourceFormat::Csv => "CSV",
            SourceFormat::Spreadsheet => "Spreadsheet",
        }
    }
}

/// TabularParser - turns a file into rows
pub trait TabularParser: Send + Sync {
    fn parse(&self, file_path: &Path) -> Result<Vec<ImportRow>>;

    fn format(&self) -> SourceFormat;
}

/// Detect input format from the file extension
pub fn detect_format(file_path: &Path) -> Option<SourceFormat> {
    let ext = file_path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "csv" | "tsv" | "txt" => Some(SourceFormat::Csv),
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Some(SourceFormat::Spreadsheet),
        _ => None,
    }
}

/// Get the parser for a format
pub fn get_parser(format: SourceFormat) -> Box<dyn TabularParser> {
    match format {
        SourceFormat::Csv => Box::new(CsvParser::new()),
        SourceFormat::Spreadsheet => Box::new(SpreadsheetParser::new()),
    }
}

/// Detect the format of `file_path` and parse it
pub fn load_rows(file_path: &Path) -> Result<Vec<ImportRow>> {
    let format = detect_format(file_path)
        .ok_or_else(|| ImportError::UnsupportedFormat(file_path.display().to_string()))?;

    let rows = get_parser(format).parse(file_path)?;
    debug!(format = format.name(), rows = rows.len(), path = %file_path.display(), "loaded rows");
    Ok(rows)
}

// ============================================================================
// CSV PARSER
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvParser {
    delimiter: Option<u8>,
}

impl CsvParser {
    pub fn new() -> Self {
        CsvParser::default()
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        CsvParser {
            delimiter: Some(delimiter),
        }
    }

    /// Parse CSV text from any reader (header row required)
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Vec<ImportRow>> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(self.delimiter.unwrap_or(b','))
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let mut rows = Vec::new();

        for (idx, result) in rdr.records().enumerate() {
            let record = result?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2);

            // Short records simply lack the trailing columns
            let row = ImportRow::from_pairs(
                line,
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| (header, CellValue::from(value))),
            );

            if row.is_blank() {
                continue;
            }
            rows.push(row);
        }

        Ok(rows)
    }
}

impl TabularParser for CsvParser {
    fn parse(&self, file_path: &Path) -> Result<Vec<ImportRow>> {
        let delimiter = match self.delimiter {
            Some(d) => d,
            None if has_extension(file_path, "tsv") => b'\t',
            None => b',',
        };

        let file = std::fs::File::open(file_path)?;
        CsvParser::with_delimiter(delimiter).parse_reader(file)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Csv
    }
}

fn has_extension(file_path: &Path, ext: &str) -> bool {
    file_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

// ============================================================================
// SPREADSHEET PARSER
// ============================================================================

/// Reads the first worksheet; the first row is the header
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetParser;

impl SpreadsheetParser {
    pub fn new() -> Self {
        SpreadsheetParser
    }
}

impl TabularParser for SpreadsheetParser {
    fn parse(&self, file_path: &Path) -> Result<Vec<ImportRow>> {
        let mut workbook = open_workbook_auto(file_path)
            .map_err(|e| ImportError::Spreadsheet(format!("failed to open workbook: {}", e)))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::Spreadsheet("workbook contains no sheets".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ImportError::Spreadsheet(format!("failed to read sheet '{}': {}", sheet_name, e)))?;

        // Range may not start at A1; line numbers follow the sheet
        let first_line = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);
        let mut sheet_rows = range.rows();

        let Some(header_cells) = sheet_rows.next() else {
            return Ok(Vec::new());
        };
        let headers: Vec<String> = header_cells.iter().map(|cell| cell_to_value(cell).to_trimmed()).collect();

        let mut rows = Vec::new();
        for (idx, cells) in sheet_rows.enumerate() {
            let line = first_line + idx + 1;
            let row = ImportRow::from_pairs(
                line,
                headers
                    .iter()
                    .zip(cells.iter())
                    .filter(|(header, _)| !header.is_empty())
                    .map(|(header, cell)| (header.as_str(), cell_to_value(cell))),
            );

            if row.is_blank() {
                continue;
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Spreadsheet
    }
}

/// Convert a calamine cell into a CellValue
fn cell_to_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(n) => {
            // Integers without decimals ("1" not "1.0", phone numbers intact)
            if n.fract() == 0.0 && n.abs() < 1e15 {
                CellValue::Text(format!("{}", *n as i64))
            } else {
                CellValue::Text(format!("{}", n))
            }
        }
        Data::Int(n) => CellValue::Text(n.to_string()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Text(format!("{}", dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => {
            warn!(error = ?e, "spreadsheet error cell treated as empty");
            CellValue::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const USERS_CSV: &str = "\
username,email,first_name,last_name,password,is_active,is_staff,is_superuser
importuser,import@example.com,Import,User,secretpass,1,0,0
,,,,,,,
shortrow,short@example.com
";

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("users.csv")), Some(SourceFormat::Csv));
        assert_eq!(detect_format(Path::new("users.TSV")), Some(SourceFormat::Csv));
        assert_eq!(detect_format(Path::new("users.xlsx")), Some(SourceFormat::Spreadsheet));
        assert_eq!(detect_format(Path::new("users.ods")), Some(SourceFormat::Spreadsheet));
        assert_eq!(detect_format(Path::new("users.pdf")), None);
        assert_eq!(detect_format(Path::new("users")), None);
    }

    #[test]
    fn test_csv_rows() {
        let rows = CsvParser::new().parse_reader(USERS_CSV.as_bytes()).unwrap();

        // blank line dropped
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.line, 2);
        assert_eq!(first.len(), 8);
        assert_eq!(first.get("password").unwrap().to_text(), "secretpass");

        let short = &rows[1];
        assert_eq!(short.line, 4);
        assert!(short.contains("email"));
        assert!(!short.contains("password"));
    }

    #[test]
    fn test_tsv_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.tsv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "username\tDealer ID").unwrap();
        writeln!(file, "tabby\tD42").unwrap();

        let rows = load_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("dealer_id").unwrap().to_text(), "D42");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_rows(Path::new("users.pdf")).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_spreadsheet_matches_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["username", "email", "password", "is_staff", "champion_mobile"]
            .iter()
            .enumerate()
        {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "importuser").unwrap();
        sheet.write_string(1, 1, "import@example.com").unwrap();
        sheet.write_number(1, 2, 1234.0).unwrap();
        sheet.write_boolean(1, 3, true).unwrap();
        sheet.write_number(1, 4, 9876543210.0).unwrap();
        workbook.save(&path).unwrap();

        let rows = load_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.line, 2);
        assert_eq!(row.get("username").unwrap().to_text(), "importuser");
        assert_eq!(row.get("password").unwrap().to_text(), "1234");
        assert_eq!(row.get("is_staff"), Some(&CellValue::Bool(true)));
        assert_eq!(row.get("champion_mobile").unwrap().to_text(), "9876543210");

        let csv_rows = CsvParser::new()
            .parse_reader(
                "username,email,password,is_staff,champion_mobile\n\
                 importuser,import@example.com,1234,true,9876543210\n"
                    .as_bytes(),
            )
            .unwrap();
        assert_eq!(csv_rows.len(), 1);

        let csv_row = &csv_rows[0];
        assert_eq!(csv_row.line, row.line);
        assert_eq!(csv_row.columns().collect::<Vec<_>>(), row.columns().collect::<Vec<_>>());
        for column in row.columns() {
            let (sheet_cell, csv_cell) = (row.get(column).unwrap(), csv_row.get(column).unwrap());
            if column == "is_staff" {
                // native boolean vs its text form
                assert_eq!(sheet_cell, &CellValue::Bool(true));
                assert_eq!(csv_cell, &CellValue::from("true"));
            } else {
                assert_eq!(sheet_cell, csv_cell, "column {column}");
            }
        }
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(cell_to_value(&Data::Float(2.5)), CellValue::from("2.5"));
        assert_eq!(cell_to_value(&Data::Int(7)), CellValue::from("7"));
        assert_eq!(cell_to_value(&Data::Empty), CellValue::Empty);
    }
}
