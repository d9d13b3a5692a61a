//! SQLite storage layer -- baseline artifact history, schema, pooling.

pub mod baselines;
pub mod schema;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::baseline::BaselineStats;

pub use self::baselines::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: impl AsRef<Path>) -> Result<Pool> {
    let path = path.as_ref();
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open baseline database: {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Append-only history of baseline artifacts, keyed by canonical key string.
///
/// Artifacts are never overwritten. "Latest" means greatest `created_at`;
/// ties go to the higher schema version, then to the later insert.
pub trait BaselineStore {
    /// Append artifacts in one atomic batch. An artifact whose
    /// `(key, version, created_at)` is already stored is skipped. Returns the
    /// number of rows actually inserted.
    fn put_many(&self, baselines: &[BaselineStats]) -> Result<usize>;

    /// Most recent artifact for an exact key string.
    fn get_latest(&self, key: &str) -> Result<Option<BaselineStats>>;

    fn list_keys(&self) -> Result<BTreeSet<String>>;

    /// Stored version count per key.
    fn list_with_counts(&self) -> Result<BTreeMap<String, usize>>;

    /// Full history, oldest first, optionally restricted to one key.
    fn list_baselines(&self, key: Option<&str>) -> Result<Vec<BaselineStats>>;
}
