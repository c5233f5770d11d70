//! Shared fixtures for unit tests

use std::sync::Arc;

use rusqlite::params;

use crate::backup::FieldProtectionBridge;
use crate::crypto::{purposes, DataProtector, HostKeyProtector};
use crate::error::BackupResult;
use crate::storage::Database;

pub const USER_COUNT: usize = 8;
pub const INVITER: &str = "user-01";
pub const INVITEE: &str = "user-05";
pub const BOT_TOKEN: &str = "7012345678:AAE-test-bot-token";
pub const API_KEY: &str = "sk-test-openai-key";
pub const TOTP_SECRET: &str = "JBSWY3DPEHPK3PXP";

const T0: i64 = 1_767_225_600; // 2026-01-01T00:00:00Z

/// Protector for the "source" host
pub fn protector() -> Arc<dyn DataProtector> {
    Arc::new(HostKeyProtector::from_key([7u8; 32]))
}

/// Protector for a different host
pub fn other_host_protector() -> Arc<dyn DataProtector> {
    Arc::new(HostKeyProtector::from_key([9u8; 32]))
}

pub fn bridge() -> FieldProtectionBridge {
    FieldProtectionBridge::new(protector())
}

/// Fill every managed table with a small, consistent data set
pub fn seed(db: &Database, protector: &dyn DataProtector) -> BackupResult<()> {
    let totp = protector.protect(purposes::TOTP_SECRETS, TOTP_SECRET)?;
    let bot_token = protector.protect(purposes::BOT_TOKEN, BOT_TOKEN)?;
    let api_key = protector.protect(purposes::API_KEYS, API_KEY)?;

    db.with_connection(|conn| {
        let tx = conn.transaction()?;

        for n in 1..=USER_COUNT {
            let id = format!("user-{:02}", n);
            let invited_by = (id == INVITEE).then_some(INVITER);
            let totp_secret = (n == 2).then(|| totp.clone());
            tx.execute(
                "INSERT INTO users (id, email, normalized_email, password_hash, security_stamp, \
                 permission_level, invited_by, is_active, totp_secret, totp_enabled, created_at) \
                 VALUES (?1, ?2, ?3, 'hash', 'stamp', ?4, ?5, 1, ?6, ?7, ?8)",
                params![
                    id,
                    format!("User{}@example.com", n),
                    format!("USER{}@EXAMPLE.COM", n),
                    (n % 3) as i64,
                    invited_by,
                    totp_secret,
                    n == 2,
                    T0 + n as i64 * 60,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO invites (token, created_by, used_by, permission_level, status, created_at, expires_at) \
             VALUES ('inv-1', ?1, ?2, 1, 1, ?3, ?4)",
            params![INVITER, INVITEE, T0, T0 + 86_400],
        )?;

        tx.execute_batch(&format!(
            "INSERT INTO verification_tokens (user_id, token_type, token, created_at, expires_at) VALUES
                ('user-03', 'email_verify', 'tok-a', {t0}, {t1}),
                ('user-03', 'password_reset', 'tok-b', {t0}, {t1});

             INSERT INTO telegram_users (telegram_user_id, username, first_name, is_trusted, first_seen_at, last_seen_at) VALUES
                (1001, 'alice', 'Alice', 1, {t0}, {t0}),
                (1002, 'bob', 'Bob', 0, {t0}, {t0}),
                (1003, NULL, 'Spammer', 0, {t0}, {t0});

             INSERT INTO managed_chats (chat_id, chat_name, chat_type, bot_status, is_admin, is_active, added_at) VALUES
                (-1001, 'Main Group', 'supergroup', 'administrator', 1, 1, {t0}),
                (-1002, 'Off Topic', 'group', 'member', 0, 1, {t0});

             INSERT INTO messages (message_id, chat_id, user_id, message_text, timestamp) VALUES
                (1, -1001, 1001, 'hello', {t0}),
                (2, -1001, 1002, 'hi there', {t0}),
                (3, -1001, 1003, 'free crypto airdrop', {t0}),
                (4, -1002, 1001, 'off topic', {t0}),
                (5, -1002, 1003, 'click this link', {t0});

             INSERT INTO detection_results (message_id, detected_at, detection_source, detection_method, is_spam, confidence, reason, added_by) VALUES
                (3, {t0}, 'auto', 'StopWords', 1, 95, 'stop word', NULL),
                (5, {t0}, 'auto', 'Bayes', 1, 88, NULL, NULL),
                (2, {t0}, 'manual', 'Manual', 0, 100, 'false positive', 'user-01');

             INSERT INTO user_actions (user_id, chat_id, action_type, message_id, issued_by, issued_at, reason) VALUES
                (1003, -1001, 'ban', 3, 'user-01', {t0}, 'spam'),
                (1003, -1002, 'ban', 5, 'user-01', {t0}, 'spam');

             INSERT INTO stop_words (word, enabled, added_by, added_date) VALUES
                ('airdrop', 1, 'user-01', {t0}),
                ('crypto', 1, 'user-01', {t0}),
                ('giveaway', 0, NULL, {t0});

             INSERT INTO audit_log (event_type, timestamp, actor_web_user_id, target_web_user_id, value) VALUES
                (1, {t0}, 'user-01', 'user-05', 'invite accepted'),
                (7, {t0}, 'user-01', NULL, 'stop word added');

             INSERT INTO url_lookup_cache (url, verdict, checked_at) VALUES ('https://example.com', 'clean', {t0});",
            t0 = T0,
            t1 = T0 + 3_600,
        ))?;

        tx.execute(
            "INSERT INTO configs (chat_id, bot_token_encrypted, openai_api_key_encrypted, created_at) \
             VALUES (NULL, ?1, ?2, ?3)",
            params![bot_token, api_key, T0],
        )?;
        tx.execute(
            "INSERT INTO configs (chat_id, spam_detection_config, created_at) VALUES (-1001, ?1, ?2)",
            params![r#"{"threshold":80}"#, T0],
        )?;

        tx.commit()?;
        Ok(())
    })
}

pub fn count(db: &Database, table: &str) -> i64 {
    db.with_connection(|conn| {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |r| {
            r.get(0)
        })?)
    })
    .unwrap_or(-1)
}

/// Row count of every managed table, by name
pub fn row_counts(db: &Database) -> Vec<(String, i64)> {
    crate::schema::SchemaCatalog::application()
        .list_exportable_tables()
        .into_iter()
        .map(|t| (t.table_name.to_string(), count(db, t.table_name)))
        .collect()
}

/// `invited_by` of a user
pub fn invited_by(db: &Database, user: &str) -> Option<String> {
    db.with_connection(|conn| {
        Ok(conn.query_row("SELECT invited_by FROM users WHERE id = ?1", [user], |r| {
            r.get(0)
        })?)
    })
    .ok()
    .flatten()
}
