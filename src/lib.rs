// Bulk User Import - Core Library
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod db;
pub mod error;
pub mod importer;
pub mod metadata;
pub mod parser;
pub mod password;
pub mod reconciler;
pub mod row;

// Re-export commonly used types
pub use config::{ImportConfig, MetadataConfig};
pub use db::{
    UserRecord, Event,
    setup_database, get_user_by_username, insert_user, update_user,
    get_all_users, count_users, get_profile, save_profile,
    insert_event, get_events_for_entity,
};
pub use error::{ImportError, Result};
pub use importer::{
    UserImporter, ImportOptions, ImportResult, RowResult, RowAction,
    CommitOutcome, commit,
};
pub use metadata::{
    MetadataPatch, MetadataColumns, ProfileMetadata,
    apply_metadata_patch, ORG_KEYS, ORG_NAMESPACE,
};
pub use parser::{
    TabularParser, SourceFormat, CsvParser, SpreadsheetParser,
    detect_format, get_parser, load_rows,
};
pub use password::{PasswordHasher, Pbkdf2Hasher, PlaintextPassword};
pub use reconciler::{
    RowReconciler, Reconciliation, ResolvedFields, PasswordDirective,
    parse_boolean, identity_key,
};
pub use row::{CellValue, ImportRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
