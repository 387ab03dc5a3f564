// Import row model - one line of the uploaded table
//
// Column names are normalized on the way in so that "Dealer ID",
// "dealer-id" and "dealer_id" all address the same cell.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// CELL VALUE
// ============================================================================

/// A single cell as delivered by a tabular parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    /// Native boolean (spreadsheets only; CSV always yields Text)
    Bool(bool),
    Empty,
}

impl CellValue {
    /// True for `Empty` and for text that is only whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Bool(_) => false,
            CellValue::Empty => true,
        }
    }

    /// Cell rendered as text, exactly as supplied
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Empty => String::new(),
        }
    }

    /// Cell rendered as text with surrounding whitespace removed
    pub fn to_trimmed(&self) -> String {
        match self {
            CellValue::Text(s) => s.trim().to_string(),
            other => other.to_text(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

// ============================================================================
// IMPORT ROW
// ============================================================================

/// Column name → cell mapping for one data line.
///
/// Any column may be missing; callers must distinguish "absent" from "blank".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportRow {
    /// Line in the source file (1-based, header is line 1)
    pub line: usize,
    cells: BTreeMap<String, CellValue>,
}

impl ImportRow {
    pub fn new(line: usize) -> Self {
        ImportRow {
            line,
            cells: BTreeMap::new(),
        }
    }

    /// Build a row from (column, value) pairs
    pub fn from_pairs<K, V, I>(line: usize, pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<CellValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut row = ImportRow::new(line);
        for (column, value) in pairs {
            row.insert(column.as_ref(), value);
        }
        row
    }

    /// Insert a cell. When the normalized column already exists the first
    /// value is kept.
    pub fn insert(&mut self, column: &str, value: impl Into<CellValue>) {
        let key = normalize_column(column);
        if key.is_empty() {
            return;
        }
        self.cells.entry(key).or_insert_with(|| value.into());
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(&normalize_column(column))
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(&normalize_column(column))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True when every cell is blank (trailing spreadsheet rows, "a,,," lines)
    pub fn is_blank(&self) -> bool {
        self.cells.values().all(CellValue::is_blank)
    }
}

/// Canonical column key: trimmed, lowercased, whitespace and '-' become '_'
pub fn normalize_column(column: &str) -> String {
    column
        .trim()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}
