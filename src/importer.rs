// Importer - runs reconciled rows against the record store
//
// One batch transaction per import, one savepoint per row. A row that fails
// rolls back only its own savepoint; dry runs roll back the whole batch.

use crate::db::{
    get_profile, get_user_by_username, insert_event, insert_user, save_profile, update_user,
    Event, UserRecord,
};
use crate::error::Result;
use crate::metadata::apply_metadata_patch;
use crate::parser::load_rows;
use crate::password::{unusable_password, PasswordHasher};
use crate::reconciler::{identity_key, PasswordDirective, Reconciliation, ResolvedFields, RowReconciler};
use crate::row::ImportRow;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Actor recorded on audit events
pub const IMPORT_ACTOR: &str = "bulk_user_import";

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    Created,
    Updated,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowResult {
    pub line: usize,
    pub username: Option<String>,
    pub action: RowAction,
    /// Field names that changed ("password" appears, its value never does)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub rows: Vec<RowResult>,
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
    pub dry_run: bool,
}

impl ImportResult {
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    pub fn error_rows(&self) -> impl Iterator<Item = &RowResult> {
        self.rows.iter().filter(|r| r.action == RowAction::Error)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}{} rows: {} created, {} updated, {} errors",
            if self.dry_run { "[dry run] " } else { "" },
            self.total(),
            self.created,
            self.updated,
            self.errors
        )
    }

    fn record(&mut self, row: RowResult) {
        match row.action {
            RowAction::Created => self.created += 1,
            RowAction::Updated => self.updated += 1,
            RowAction::Error => self.errors += 1,
        }
        self.rows.push(row);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Process every row, report, then roll everything back
    pub dry_run: bool,
}

// ============================================================================
// COMMIT PHASE
// ============================================================================

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub user: UserRecord,
    pub action: RowAction,
    pub changed: Vec<String>,
}

/// Write a reconciled row: user record, password hash, profile, audit event.
///
/// Consumes the reconciliation so the plaintext password is dropped here.
pub fn commit(
    conn: &Connection,
    existing: Option<UserRecord>,
    reconciliation: Reconciliation,
    hasher: &dyn PasswordHasher,
) -> Result<CommitOutcome> {
    let Reconciliation {
        fields,
        password,
        metadata,
    } = reconciliation;

    let before = existing.clone();
    let mut user = existing.unwrap_or_else(|| UserRecord::new(&fields.username));
    apply_fields(&mut user, &fields);

    match password {
        PasswordDirective::Set(plaintext) => {
            user.password_hash = hasher.hash(plaintext.as_bytes())?;
        }
        PasswordDirective::Keep if !user.is_persisted() => {
            user.password_hash = unusable_password();
        }
        PasswordDirective::Keep => {}
    }

    let changed = changed_fields(before.as_ref(), &user);
    let action = if user.is_persisted() {
        user.updated_at = Utc::now();
        update_user(conn, &user)?;
        RowAction::Updated
    } else {
        insert_user(conn, &mut user)?;
        RowAction::Created
    };

    // Profile always exists after an import, even with nothing to merge
    let profile = get_profile(conn, user.id)?;
    let had_profile = profile.is_some();
    let merged = apply_metadata_patch(profile, &metadata);
    if !had_profile || !metadata.is_empty() {
        save_profile(conn, user.id, &merged)?;
    }

    let event_type = match action {
        RowAction::Created => "user_created",
        _ => "user_updated",
    };
    let metadata_keys: Vec<&str> = metadata.iter().map(|(k, _)| k).collect();
    insert_event(
        conn,
        &Event::new(
            event_type,
            "user",
            &user.username,
            serde_json::json!({
                "changed": changed,
                "metadata_keys": metadata_keys,
            }),
            IMPORT_ACTOR,
        ),
    )?;

    Ok(CommitOutcome {
        user,
        action,
        changed,
    })
}

fn apply_fields(user: &mut UserRecord, fields: &ResolvedFields) {
    if let Some(email) = &fields.email {
        user.email = email.clone();
    }
    if let Some(first_name) = &fields.first_name {
        user.first_name = first_name.clone();
    }
    if let Some(last_name) = &fields.last_name {
        user.last_name = last_name.clone();
    }
    if let Some(is_active) = fields.is_active {
        user.is_active = is_active;
    }
    if let Some(is_staff) = fields.is_staff {
        user.is_staff = is_staff;
    }
    if let Some(is_superuser) = fields.is_superuser {
        user.is_superuser = is_superuser;
    }
}

/// Names of fields that differ between the stored and the new record.
/// A new record reports every populated field.
fn changed_fields(before: Option<&UserRecord>, after: &UserRecord) -> Vec<String> {
    let blank = UserRecord::new(&after.username);
    let before = before.unwrap_or(&blank);

    let mut changed = Vec::new();
    let mut check = |name: &str, differs: bool| {
        if differs {
            changed.push(name.to_string());
        }
    };
    check("email", before.email != after.email);
    check("first_name", before.first_name != after.first_name);
    check("last_name", before.last_name != after.last_name);
    check("password", before.password_hash != after.password_hash);
    check("is_active", before.is_active != after.is_active);
    check("is_staff", before.is_staff != after.is_staff);
    check("is_superuser", before.is_superuser != after.is_superuser);
    changed
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct UserImporter {
    reconciler: RowReconciler,
    hasher: Box<dyn PasswordHasher>,
}

impl UserImporter {
    pub fn new(reconciler: RowReconciler, hasher: Box<dyn PasswordHasher>) -> Self {
        UserImporter { reconciler, hasher }
    }

    pub fn hasher(&self) -> &dyn PasswordHasher {
        self.hasher.as_ref()
    }

    /// Load `path` (format detected by extension) and import its rows
    pub fn import_file(&self, conn: &mut Connection, path: &Path, options: ImportOptions) -> Result<ImportResult> {
        let rows = load_rows(path)?;
        info!(path = %path.display(), rows = rows.len(), "importing users");
        self.import_rows(conn, &rows, options)
    }

    /// Import rows in order. Later rows for the same username see the
    /// result of earlier ones (last write wins).
    pub fn import_rows(&self, conn: &mut Connection, rows: &[ImportRow], options: ImportOptions) -> Result<ImportResult> {
        let mut result = ImportResult {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let mut batch = conn.transaction()?;

        for row in rows {
            let savepoint = batch.savepoint()?;
            let username = identity_key(row).ok();

            match self.import_row(&savepoint, row) {
                Ok(outcome) => {
                    savepoint.commit()?;
                    debug!(line = row.line, username = %outcome.user.username, action = ?outcome.action, "row imported");
                    result.record(RowResult {
                        line: row.line,
                        username: Some(outcome.user.username),
                        action: outcome.action,
                        changed: outcome.changed,
                        message: None,
                    });
                }
                Err(e) => {
                    // dropping the savepoint rolls the row back
                    drop(savepoint);
                    warn!(line = row.line, error = %e, "row rejected");
                    result.record(RowResult {
                        line: row.line,
                        username,
                        action: RowAction::Error,
                        changed: Vec::new(),
                        message: Some(e.to_string()),
                    });
                }
            }
        }

        if options.dry_run {
            batch.rollback()?;
        } else {
            batch.commit()?;
        }

        info!("{}", result.summary());
        Ok(result)
    }

    fn import_row(&self, conn: &Connection, row: &ImportRow) -> Result<CommitOutcome> {
        let username = identity_key(row)?;
        let existing = get_user_by_username(conn, &username)?;
        let reconciliation = self.reconciler.reconcile(existing.as_ref(), row)?;
        commit(conn, existing, reconciliation, self.hasher.as_ref())
    }
}
