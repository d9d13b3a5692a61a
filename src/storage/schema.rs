//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current on-disk layout version.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS baselines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,

            key_str TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            metric TEXT NOT NULL,
            hour_of_day INTEGER,

            median REAL NOT NULL,
            mad REAL NOT NULL,
            sample_count INTEGER NOT NULL,

            training_start TEXT NOT NULL,
            training_end TEXT NOT NULL,

            created_at TEXT NOT NULL,
            version INTEGER NOT NULL,

            UNIQUE(key_str, version, created_at)
        );

        CREATE INDEX IF NOT EXISTS idx_baselines_key_str ON baselines(key_str);
        CREATE INDEX IF NOT EXISTS idx_baselines_entity_metric ON baselines(entity_id, metric);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
