use crate::error::Result;
use crate::metadata::ProfileMetadata;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Stored user account, keyed by `username`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Store row id (0 until inserted)
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Encoded one-way hash, never plaintext
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Fresh record with the store defaults
    pub fn new(username: &str) -> Self {
        let now = Utc::now();
        UserRecord {
            id: 0,
            username: username.to_string(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: String::new(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            date_joined: now,
            updated_at: now,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Event for audit trail (every create/update is recorded)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for file databases; in-memory connections report "memory" and that's fine
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Users
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            password TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_staff INTEGER NOT NULL DEFAULT 0,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            date_joined TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Profiles (one-to-one, free-form metadata blob)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            meta TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, password,
                            is_active, is_staff, is_superuser, date_joined, updated_at";

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        password_hash: row.get(5)?,
        is_active: row.get(6)?,
        is_staff: row.get(7)?,
        is_superuser: row.get(8)?,
        date_joined: parse_timestamp(row, 9)?,
        updated_at: parse_timestamp(row, 10)?,
    })
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRecord>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            [username],
            user_from_row,
        )
        .optional()?;

    Ok(user)
}

/// Insert a new user and set its store id
pub fn insert_user(conn: &Connection, user: &mut UserRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (
            username, email, first_name, last_name, password,
            is_active, is_staff, is_superuser, date_joined, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            user.username,
            user.email,
            user.first_name,
            user.last_name,
            user.password_hash,
            user.is_active,
            user.is_staff,
            user.is_superuser,
            user.date_joined.to_rfc3339(),
            user.updated_at.to_rfc3339(),
        ],
    )?;

    user.id = conn.last_insert_rowid();
    Ok(user.id)
}

/// Overwrite every mutable column of an existing user
pub fn update_user(conn: &Connection, user: &UserRecord) -> Result<()> {
    conn.execute(
        "UPDATE users
         SET email = ?1, first_name = ?2, last_name = ?3, password = ?4,
             is_active = ?5, is_staff = ?6, is_superuser = ?7, updated_at = ?8
         WHERE id = ?9",
        params![
            user.email,
            user.first_name,
            user.last_name,
            user.password_hash,
            user.is_active,
            user.is_staff,
            user.is_superuser,
            user.updated_at.to_rfc3339(),
            user.id,
        ],
    )?;

    Ok(())
}

pub fn get_all_users(conn: &Connection) -> Result<Vec<UserRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY username",
        USER_COLUMNS
    ))?;

    let users = stmt
        .query_map([], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(users)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

    Ok(count)
}

pub fn get_profile(conn: &Connection, user_id: i64) -> Result<Option<ProfileMetadata>> {
    let profile = conn
        .query_row(
            "SELECT meta FROM user_profiles WHERE user_id = ?1",
            [user_id],
            |row| Ok(ProfileMetadata::new(row.get::<_, String>(0)?)),
        )
        .optional()?;

    Ok(profile)
}

/// Create or replace the profile of `user_id`
pub fn save_profile(conn: &Connection, user_id: i64, profile: &ProfileMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO user_profiles (user_id, meta) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET meta = excluded.meta",
        params![user_id, profile.meta],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_fetch_user() {
        let conn = test_db();

        let mut user = UserRecord::new("alice");
        user.email = "alice@example.com".to_string();
        user.password_hash = "!unusable".to_string();
        let id = insert_user(&conn, &mut user).unwrap();

        assert!(id > 0);
        assert!(user.is_persisted());

        let stored = get_user_by_username(&conn, "alice").unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.email, "alice@example.com");
        assert!(stored.is_active);
        assert!(!stored.is_staff);
        assert_eq!(stored.date_joined.timestamp(), user.date_joined.timestamp());

        assert!(get_user_by_username(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn test_username_is_unique() {
        let conn = test_db();

        let mut first = UserRecord::new("dupe");
        first.password_hash = "!a".to_string();
        insert_user(&conn, &mut first).unwrap();

        let mut second = UserRecord::new("dupe");
        second.password_hash = "!b".to_string();
        assert!(insert_user(&conn, &mut second).is_err());
        assert_eq!(count_users(&conn).unwrap(), 1);
    }

    #[test]
    fn test_update_user() {
        let conn = test_db();

        let mut user = UserRecord::new("carol");
        user.password_hash = "!x".to_string();
        insert_user(&conn, &mut user).unwrap();

        user.first_name = "Carol".to_string();
        user.is_staff = true;
        update_user(&conn, &user).unwrap();

        let stored = get_user_by_username(&conn, "carol").unwrap().unwrap();
        assert_eq!(stored.first_name, "Carol");
        assert!(stored.is_staff);
        assert_eq!(stored.full_name(), "Carol");
    }

    #[test]
    fn test_profile_upsert() {
        let conn = test_db();

        let mut user = UserRecord::new("dave");
        user.password_hash = "!x".to_string();
        let id = insert_user(&conn, &mut user).unwrap();

        assert!(get_profile(&conn, id).unwrap().is_none());

        save_profile(&conn, id, &ProfileMetadata::new(r#"{"org":{"city":"Pune"}}"#)).unwrap();
        save_profile(&conn, id, &ProfileMetadata::new(r#"{"org":{"city":"Goa"}}"#)).unwrap();

        let profile = get_profile(&conn, id).unwrap().unwrap();
        assert_eq!(profile.org()["city"], serde_json::json!("Goa"));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM user_profiles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_get_all_users_sorted() {
        let conn = test_db();
        for name in ["zed", "amy", "mo"] {
            let mut user = UserRecord::new(name);
            user.password_hash = "!x".to_string();
            insert_user(&conn, &mut user).unwrap();
        }

        let names: Vec<String> = get_all_users(&conn)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["amy", "mo", "zed"]);
    }

    #[test]
    fn test_event_log() {
        let conn = test_db();

        let event = Event::new(
            "user_created",
            "user",
            "alice",
            serde_json::json!({"changed": ["email"]}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "user", "alice").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "user_created");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["changed"][0], "email");
    }
}
