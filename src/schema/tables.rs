//! Table descriptors for the application schema
//!
//! One descriptor per durable table. Keep these in sync with
//! `storage::migrations`; `SchemaCatalog::discover` rejects a descriptor
//! whose columns are missing from the live database.

use crate::crypto::purposes;

use super::catalog::{ColumnDescriptor as Col, TableDescriptor};
use super::value::ColumnKind::{Boolean, Integer, Text, Timestamp};

static USERS: &[Col] = &[
    Col::new("id", "id", Text),
    Col::new("email", "email", Text),
    Col::new("normalized_email", "normalized_email", Text),
    Col::new("password_hash", "password_hash", Text),
    Col::new("security_stamp", "security_stamp", Text),
    Col::new("permission_level", "permission_level", Integer),
    Col::new("invited_by", "invited_by", Text).nullable(),
    Col::new("is_active", "is_active", Boolean),
    Col::new("totp_secret", "totp_secret", Text)
        .nullable()
        .protected(purposes::TOTP_SECRETS),
    Col::new("totp_enabled", "totp_enabled", Boolean),
    Col::new("created_at", "created_at", Timestamp),
    Col::new("modified_at", "modified_at", Timestamp).nullable(),
    Col::new("last_login_at", "last_login_at", Timestamp).nullable(),
    Col::derived("invited_by_user"),
    Col::derived("display_name"),
];

static INVITES: &[Col] = &[
    Col::new("token", "token", Text),
    Col::new("created_by", "created_by", Text),
    Col::new("used_by", "used_by", Text).nullable(),
    Col::new("permission_level", "permission_level", Integer),
    Col::new("status", "status", Integer),
    Col::new("created_at", "created_at", Timestamp),
    Col::new("expires_at", "expires_at", Timestamp),
];

static VERIFICATION_TOKENS: &[Col] = &[
    Col::new("id", "id", Integer),
    Col::new("user_id", "user_id", Text),
    Col::new("token_type", "token_type", Text),
    Col::new("token", "token", Text),
    Col::new("created_at", "created_at", Timestamp),
    Col::new("expires_at", "expires_at", Timestamp),
    Col::new("used_at", "used_at", Timestamp).nullable(),
    Col::derived("is_expired"),
];

static TELEGRAM_USERS: &[Col] = &[
    Col::new("telegram_user_id", "telegram_user_id", Integer),
    Col::new("username", "username", Text).nullable(),
    Col::new("first_name", "first_name", Text).nullable(),
    Col::new("last_name", "last_name", Text).nullable(),
    Col::new("is_trusted", "is_trusted", Boolean),
    Col::new("first_seen_at", "first_seen_at", Timestamp),
    Col::new("last_seen_at", "last_seen_at", Timestamp),
];

static MANAGED_CHATS: &[Col] = &[
    Col::new("chat_id", "chat_id", Integer),
    Col::new("chat_name", "chat_name", Text).nullable(),
    Col::new("chat_type", "chat_type", Text),
    Col::new("bot_status", "bot_status", Text),
    Col::new("is_admin", "is_admin", Boolean),
    Col::new("is_active", "is_active", Boolean),
    Col::new("added_at", "added_at", Timestamp),
];

static MESSAGES: &[Col] = &[
    Col::new("message_id", "message_id", Integer),
    Col::new("chat_id", "chat_id", Integer),
    Col::new("user_id", "user_id", Integer),
    Col::new("message_text", "message_text", Text).nullable(),
    Col::new("photo_file_id", "photo_file_id", Text).nullable(),
    Col::new("content_hash", "content_hash", Text).nullable(),
    Col::new("timestamp", "timestamp", Timestamp),
    Col::new("edit_date", "edit_date", Timestamp).nullable(),
    Col::derived("detection_results"),
];

static DETECTION_RESULTS: &[Col] = &[
    Col::new("id", "id", Integer),
    Col::new("message_id", "message_id", Integer),
    Col::new("detected_at", "detected_at", Timestamp),
    Col::new("detection_source", "detection_source", Text),
    Col::new("detection_method", "detection_method", Text),
    Col::new("is_spam", "is_spam", Boolean),
    Col::new("confidence", "confidence", Integer),
    Col::new("reason", "reason", Text).nullable(),
    Col::new("added_by", "added_by", Text).nullable(),
];

static USER_ACTIONS: &[Col] = &[
    Col::new("id", "id", Integer),
    Col::new("user_id", "user_id", Integer),
    Col::new("chat_id", "chat_id", Integer).nullable(),
    Col::new("action_type", "action_type", Text),
    Col::new("message_id", "message_id", Integer).nullable(),
    Col::new("issued_by", "issued_by", Text).nullable(),
    Col::new("issued_at", "issued_at", Timestamp),
    Col::new("expires_at", "expires_at", Timestamp).nullable(),
    Col::new("reason", "reason", Text).nullable(),
];

static STOP_WORDS: &[Col] = &[
    Col::new("id", "id", Integer),
    Col::new("word", "word", Text),
    Col::new("enabled", "enabled", Boolean),
    Col::new("added_by", "added_by", Text).nullable(),
    Col::new("added_date", "added_date", Timestamp),
    Col::new("notes", "notes", Text).nullable(),
];

static AUDIT_LOG: &[Col] = &[
    Col::new("id", "id", Integer),
    Col::new("event_type", "event_type", Integer),
    Col::new("timestamp", "timestamp", Timestamp),
    Col::new("actor_web_user_id", "actor_web_user_id", Text).nullable(),
    Col::new("target_web_user_id", "target_web_user_id", Text).nullable(),
    Col::new("value", "value", Text).nullable(),
];

static CONFIGS: &[Col] = &[
    Col::new("id", "id", Integer),
    Col::new("chat_id", "chat_id", Integer).nullable(),
    Col::new("spam_detection_config", "spam_detection_config", Text).nullable(),
    Col::new("welcome_config", "welcome_config", Text).nullable(),
    Col::new("bot_token_encrypted", "bot_token", Text)
        .nullable()
        .protected(purposes::BOT_TOKEN),
    Col::new("openai_api_key_encrypted", "openai_api_key", Text)
        .nullable()
        .protected(purposes::API_KEYS),
    Col::new("backup_encryption_config", "backup_encryption_config", Text).nullable(),
    Col::new("passphrase_encrypted", "backup_passphrase", Text)
        .nullable()
        .protected(purposes::BACKUP_PASSPHRASE),
    Col::new("created_at", "created_at", Timestamp),
    Col::new("updated_at", "updated_at", Timestamp).nullable(),
];

/// Every durable table of the application
pub static APPLICATION_TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        name: "users",
        record: "UserRecord",
        primary_key: Some("id"),
        sequence: false,
        columns: USERS,
    },
    TableDescriptor {
        name: "invites",
        record: "InviteRecord",
        primary_key: Some("token"),
        sequence: false,
        columns: INVITES,
    },
    TableDescriptor {
        name: "verification_tokens",
        record: "VerificationTokenRecord",
        primary_key: Some("id"),
        sequence: true,
        columns: VERIFICATION_TOKENS,
    },
    TableDescriptor {
        name: "telegram_users",
        record: "TelegramUserRecord",
        primary_key: Some("telegram_user_id"),
        sequence: false,
        columns: TELEGRAM_USERS,
    },
    TableDescriptor {
        name: "managed_chats",
        record: "ManagedChatRecord",
        primary_key: Some("chat_id"),
        sequence: false,
        columns: MANAGED_CHATS,
    },
    TableDescriptor {
        name: "messages",
        record: "MessageRecord",
        primary_key: Some("message_id"),
        sequence: false,
        columns: MESSAGES,
    },
    TableDescriptor {
        name: "detection_results",
        record: "DetectionResultRecord",
        primary_key: Some("id"),
        sequence: true,
        columns: DETECTION_RESULTS,
    },
    TableDescriptor {
        name: "user_actions",
        record: "UserActionRecord",
        primary_key: Some("id"),
        sequence: true,
        columns: USER_ACTIONS,
    },
    TableDescriptor {
        name: "stop_words",
        record: "StopWordRecord",
        primary_key: Some("id"),
        sequence: true,
        columns: STOP_WORDS,
    },
    TableDescriptor {
        name: "audit_log",
        record: "AuditLogRecord",
        primary_key: Some("id"),
        sequence: true,
        columns: AUDIT_LOG,
    },
    TableDescriptor {
        name: "configs",
        record: "ConfigRecord",
        primary_key: Some("id"),
        sequence: true,
        columns: CONFIGS,
    },
];
