// Row Reconciler - resolve one imported row against the stored record
//
// Pure phase of the import: no store access, no hashing. The importer looks
// up the existing record by identity, calls `reconcile`, then commits the
// result.

use crate::db::UserRecord;
use crate::error::{ImportError, Result};
use crate::metadata::{MetadataColumns, MetadataPatch};
use crate::password::PlaintextPassword;
use crate::row::{CellValue, ImportRow};

/// Identity column
pub const USERNAME: &str = "username";

const TRUE_VALUES: &[&str] = &["1", "true", "yes", "y", "t"];
const FALSE_VALUES: &[&str] = &["0", "false", "no", "n", "f"];

pub const DEFAULT_IS_ACTIVE: bool = true;
pub const DEFAULT_IS_STAFF: bool = false;
pub const DEFAULT_IS_SUPERUSER: bool = false;

// ============================================================================
// RECONCILIATION OUTPUT
// ============================================================================

/// Field values to write. `None` means the column was absent: leave the
/// stored value (or the store default on create) alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFields {
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Debug)]
pub enum PasswordDirective {
    /// Hash this plaintext and store the result
    Set(PlaintextPassword),
    /// Leave the stored hash as it is
    Keep,
}

impl PasswordDirective {
    pub fn is_set(&self) -> bool {
        matches!(self, PasswordDirective::Set(_))
    }
}

#[derive(Debug)]
pub struct Reconciliation {
    pub fields: ResolvedFields,
    pub password: PasswordDirective,
    pub metadata: MetadataPatch,
}

impl Reconciliation {
    pub fn username(&self) -> &str {
        &self.fields.username
    }
}

// ============================================================================
// BOOLEAN COERCION
// ============================================================================

/// Parse a boolean-like cell. `None` means blank or unrecognized.
pub fn parse_boolean(cell: Option<&CellValue>) -> Option<bool> {
    let text = match cell? {
        CellValue::Bool(b) => return Some(*b),
        CellValue::Empty => return None,
        CellValue::Text(s) => s.trim().to_lowercase(),
    };

    if TRUE_VALUES.contains(&text.as_str()) {
        Some(true)
    } else if FALSE_VALUES.contains(&text.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Trimmed identity value of a row
pub fn identity_key(row: &ImportRow) -> Result<String> {
    match row.get(USERNAME) {
        Some(cell) if !cell.is_blank() => Ok(cell.to_trimmed()),
        _ => Err(ImportError::MissingIdentity(USERNAME)),
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RowReconciler {
    metadata_columns: MetadataColumns,
}

impl RowReconciler {
    pub fn new() -> Self {
        RowReconciler::default()
    }

    pub fn with_columns(metadata_columns: MetadataColumns) -> Self {
        RowReconciler { metadata_columns }
    }

    pub fn metadata_columns(&self) -> &MetadataColumns {
        &self.metadata_columns
    }

    /// Resolve `row` against `existing` (None = create).
    pub fn reconcile(&self, existing: Option<&UserRecord>, row: &ImportRow) -> Result<Reconciliation> {
        let username = identity_key(row)?;

        let fields = ResolvedFields {
            username,
            // email is trimmed; names are kept verbatim
            email: resolve_text(row, "email", true, existing.map(|u| u.email.as_str())),
            first_name: resolve_text(row, "first_name", false, existing.map(|u| u.first_name.as_str())),
            last_name: resolve_text(row, "last_name", false, existing.map(|u| u.last_name.as_str())),
            is_active: resolve_flag(row, "is_active", existing.map(|u| u.is_active), DEFAULT_IS_ACTIVE),
            is_staff: resolve_flag(row, "is_staff", existing.map(|u| u.is_staff), DEFAULT_IS_STAFF),
            is_superuser: resolve_flag(
                row,
                "is_superuser",
                existing.map(|u| u.is_superuser),
                DEFAULT_IS_SUPERUSER,
            ),
        };

        // Borrow the trimmed text so no extra copy of the plaintext is made
        let password = match row.get("password") {
            Some(CellValue::Text(s)) if !s.trim().is_empty() => {
                PasswordDirective::Set(PlaintextPassword::new(s.trim()))
            }
            Some(CellValue::Bool(b)) => {
                PasswordDirective::Set(PlaintextPassword::new(if *b { "true" } else { "false" }))
            }
            _ => PasswordDirective::Keep,
        };

        Ok(Reconciliation {
            fields,
            password,
            metadata: self.metadata_columns.extract(row),
        })
    }
}

/// Blank-preserving text resolution
fn resolve_text(row: &ImportRow, column: &str, trim: bool, existing: Option<&str>) -> Option<String> {
    let cell = row.get(column)?;
    if cell.is_blank() {
        if let Some(stored) = existing {
            return Some(stored.to_string());
        }
    }
    Some(if trim { cell.to_trimmed() } else { cell.to_text() })
}

fn resolve_flag(row: &ImportRow, column: &str, existing: Option<bool>, default: bool) -> Option<bool> {
    let cell = row.get(column)?;
    Some(parse_boolean(Some(cell)).unwrap_or(existing.unwrap_or(default)))
}
