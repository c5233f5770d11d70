//! Schema migrations for the application database
//!
//! Applied migrations are recorded in `__migrations`, which is never part
//! of a backup. Restores target a database already migrated to the current
//! schema.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::BackupResult;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
CREATE TABLE users (
    id TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL,
    normalized_email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    security_stamp TEXT NOT NULL,
    permission_level INTEGER NOT NULL DEFAULT 0,
    invited_by TEXT REFERENCES users(id),
    is_active INTEGER NOT NULL DEFAULT 1,
    totp_secret TEXT,
    totp_enabled INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    modified_at INTEGER,
    last_login_at INTEGER
);

CREATE TABLE invites (
    token TEXT PRIMARY KEY NOT NULL,
    created_by TEXT NOT NULL REFERENCES users(id),
    used_by TEXT REFERENCES users(id),
    permission_level INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE verification_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_type TEXT NOT NULL,
    token TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    used_at INTEGER
);

CREATE TABLE telegram_users (
    telegram_user_id INTEGER PRIMARY KEY NOT NULL,
    username TEXT,
    first_name TEXT,
    last_name TEXT,
    is_trusted INTEGER NOT NULL DEFAULT 0,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL
);

CREATE TABLE managed_chats (
    chat_id INTEGER PRIMARY KEY NOT NULL,
    chat_name TEXT,
    chat_type TEXT NOT NULL,
    bot_status TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    added_at INTEGER NOT NULL
);

CREATE TABLE messages (
    message_id INTEGER PRIMARY KEY NOT NULL,
    chat_id INTEGER NOT NULL REFERENCES managed_chats(chat_id),
    user_id INTEGER NOT NULL REFERENCES telegram_users(telegram_user_id),
    message_text TEXT,
    photo_file_id TEXT,
    content_hash TEXT,
    timestamp INTEGER NOT NULL,
    edit_date INTEGER
);

CREATE TABLE detection_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(message_id),
    detected_at INTEGER NOT NULL,
    detection_source TEXT NOT NULL,
    detection_method TEXT NOT NULL,
    is_spam INTEGER NOT NULL,
    confidence INTEGER NOT NULL,
    reason TEXT,
    added_by TEXT REFERENCES users(id)
);

CREATE TABLE user_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES telegram_users(telegram_user_id),
    chat_id INTEGER REFERENCES managed_chats(chat_id),
    action_type TEXT NOT NULL,
    message_id INTEGER,
    issued_by TEXT,
    issued_at INTEGER NOT NULL,
    expires_at INTEGER,
    reason TEXT
);

CREATE TABLE stop_words (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 1,
    added_by TEXT,
    added_date INTEGER NOT NULL,
    notes TEXT
);

CREATE TABLE audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    actor_web_user_id TEXT,
    target_web_user_id TEXT,
    value TEXT
);

CREATE TABLE configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER UNIQUE REFERENCES managed_chats(chat_id),
    spam_detection_config TEXT,
    welcome_config TEXT,
    bot_token_encrypted TEXT,
    openai_api_key_encrypted TEXT,
    backup_encryption_config TEXT,
    passphrase_encrypted TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

CREATE INDEX idx_messages_chat ON messages(chat_id, timestamp);
CREATE INDEX idx_detection_results_message ON detection_results(message_id);
CREATE INDEX idx_user_actions_user ON user_actions(user_id);
"#,
    },
    Migration {
        version: 2,
        name: "url_lookup_cache",
        sql: r#"
CREATE TABLE url_lookup_cache (
    url TEXT PRIMARY KEY NOT NULL,
    verdict TEXT NOT NULL,
    checked_at INTEGER NOT NULL
);
"#,
    },
];

/// Latest schema version known to this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Apply all pending migrations, returning how many ran
pub fn apply_migrations(conn: &mut Connection) -> BackupResult<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS __migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM __migrations",
        [],
        |row| row.get(0),
    )?;

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO __migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, Utc::now().timestamp()],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}
