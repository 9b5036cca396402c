//! SQL migration definitions for the durable key-value backend.
//!
//! Migrations are applied in order on open. Each migration has a version
//! number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: kv values with expiry, insertion-ordered sets",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Plain values; expires_at is unix millis, NULL = never
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    expires_at INTEGER
);

-- Ordered sets; seq records first insertion
CREATE TABLE IF NOT EXISTS zset (
    seq    INTEGER PRIMARY KEY AUTOINCREMENT,
    key    TEXT NOT NULL,
    member TEXT NOT NULL,
    UNIQUE(key, member)
);

CREATE INDEX IF NOT EXISTS idx_zset_key_seq ON zset(key, seq);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index kv expiry for sweeps",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at) WHERE expires_at IS NOT NULL;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
