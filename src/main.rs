use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bulk_user_import::{
    count_users, get_events_for_entity, get_profile, get_user_by_username, setup_database,
    ImportConfig, ImportOptions, Pbkdf2Hasher, UserImporter, VERSION,
};

#[derive(Parser)]
#[command(name = "bulk-user-import", version, about = "Create or update user accounts from CSV/XLSX files")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, global = true, env = "BULK_USER_IMPORT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import users from a CSV or spreadsheet file
    Import {
        file: PathBuf,

        /// Process every row and report, but roll back all changes
        #[arg(long)]
        dry_run: bool,

        /// Print the full result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show a user, their profile metadata, and import history
    Show { username: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ImportConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    info!("bulk-user-import v{} using {}", VERSION, config.database_path.display());

    match cli.command {
        Command::Import { file, dry_run, json } => {
            let code = run_import(&config, &file, dry_run || config.dry_run, json)?;
            std::process::exit(code);
        }
        Command::Show { username } => run_show(&config, &username),
    }
}

/// RUST_LOG when set and valid, `info` otherwise
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn open_database(config: &ImportConfig) -> Result<Connection> {
    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    setup_database(&conn).context("Failed to initialize database")?;
    Ok(conn)
}

fn run_import(config: &ImportConfig, file: &Path, dry_run: bool, json: bool) -> Result<i32> {
    let mut conn = open_database(config)?;

    let importer = UserImporter::new(
        config.reconciler()?,
        Box::new(Pbkdf2Hasher::with_iterations(config.hash_iterations)),
    );

    let result = importer
        .import_file(&mut conn, file, ImportOptions { dry_run })
        .with_context(|| format!("Failed to import {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("📂 {}", file.display());
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("✓ {}", result.summary());
        for row in result.error_rows() {
            println!(
                "✗ line {} ({}): {}",
                row.line,
                row.username.as_deref().unwrap_or("-"),
                row.message.as_deref().unwrap_or("unknown error")
            );
        }
        println!("✓ Database contains {} users", count_users(&conn)?);
    }

    Ok(if result.has_errors() { 1 } else { 0 })
}

fn run_show(config: &ImportConfig, username: &str) -> Result<()> {
    let conn = open_database(config)?;

    let Some(user) = get_user_by_username(&conn, username.trim())? else {
        anyhow::bail!("No user named '{}'", username.trim());
    };

    println!("👤 {} (id {})", user.username, user.id);
    println!("   name:       {}", user.full_name());
    println!("   email:      {}", user.email);
    println!(
        "   flags:      active={} staff={} superuser={}",
        user.is_active, user.is_staff, user.is_superuser
    );
    println!("   joined:     {}", user.date_joined.to_rfc3339());
    println!("   updated:    {}", user.updated_at.to_rfc3339());

    if let Some(profile) = get_profile(&conn, user.id)? {
        println!("   org:        {}", serde_json::Value::Object(profile.org()));
    }

    let events = get_events_for_entity(&conn, "user", &user.username)?;
    println!("\n📜 History ({} events)", events.len());
    for event in events {
        println!(
            "   {} {} by {} {}",
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.actor,
            event.data
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(log_filter(Some("  ".to_string())).to_string(), "info");
    }

    #[test]
    fn test_log_filter_keeps_rust_log_level() {
        assert_eq!(log_filter(Some("debug".to_string())).to_string(), "debug");
        assert_eq!(
            log_filter(Some("bulk_user_import=trace".to_string())).to_string(),
            "bulk_user_import=trace"
        );
    }
}
