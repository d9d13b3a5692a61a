//! SQLite-backed [`BaselineStore`].
//!
//! Timestamps are stored as fixed-width text so lexical order in SQL matches
//! chronological order: training bounds as naive ISO-8601 with nanoseconds,
//! `created_at` as RFC 3339 UTC with nanoseconds.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use super::{open_pool, BaselineStore, Pool};
use crate::baseline::model::SCHEMA_V1;
use crate::baseline::{BaselineKey, BaselineStats, BaselineStatsV1};

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

const SELECT_COLUMNS: &str = "SELECT entity_id, metric, hour_of_day, median, mad, sample_count,
        training_start, training_end, created_at, version
    FROM baselines";

fn naive_to_text(dt: NaiveDateTime) -> String {
    dt.format(NAIVE_FORMAT).to_string()
}

fn text_to_naive(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .with_context(|| format!("corrupt stored timestamp '{}'", s))
}

fn utc_to_text(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn text_to_utc(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("corrupt stored created_at '{}'", s))
}

/// One row of the `baselines` table before timestamp decoding.
struct BaselineRow {
    entity_id: String,
    metric: String,
    hour_of_day: Option<u8>,
    median: f64,
    mad: f64,
    sample_count: i64,
    training_start: String,
    training_end: String,
    created_at: String,
    version: u32,
}

impl BaselineRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get(0)?,
            metric: row.get(1)?,
            hour_of_day: row.get(2)?,
            median: row.get(3)?,
            mad: row.get(4)?,
            sample_count: row.get(5)?,
            training_start: row.get(6)?,
            training_end: row.get(7)?,
            created_at: row.get(8)?,
            version: row.get(9)?,
        })
    }

    fn into_baseline(self) -> Result<BaselineStats> {
        match self.version {
            SCHEMA_V1 => Ok(BaselineStats::V1(BaselineStatsV1 {
                key: BaselineKey::new(self.entity_id, self.metric, self.hour_of_day),
                median: self.median,
                mad: self.mad,
                sample_count: usize::try_from(self.sample_count)
                    .context("negative sample_count in stored baseline")?,
                training_start: text_to_naive(&self.training_start)?,
                training_end: text_to_naive(&self.training_end)?,
                created_at: text_to_utc(&self.created_at)?,
            })),
            other => bail!("unsupported baseline schema version {}", other),
        }
    }
}

/// Baseline history kept in a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open (or create) a store at `path`, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    /// Open a store that must already exist. Read-only callers use this so a
    /// mistyped path fails instead of silently creating an empty database.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("baseline database not found: {}", path.display());
        }
        Self::open(path)
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }

    fn query_baselines(&self, sql: &str, key: Option<&str>) -> Result<Vec<BaselineStats>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;

        let rows = match key {
            Some(k) => stmt
                .query_map(params![k], BaselineRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], BaselineRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };

        rows.into_iter().map(BaselineRow::into_baseline).collect()
    }
}

impl BaselineStore for SqliteStore {
    fn put_many(&self, baselines: &[BaselineStats]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO baselines (
                    key_str, entity_id, metric, hour_of_day,
                    median, mad, sample_count,
                    training_start, training_end,
                    created_at, version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(key_str, version, created_at) DO NOTHING",
            )?;

            for b in baselines {
                let key = b.key();
                ensure!(
                    b.median().is_finite() && b.mad().is_finite() && b.mad() > 0.0,
                    "refusing to store baseline {} with median={} mad={}",
                    key,
                    b.median(),
                    b.mad()
                );
                let sample_count =
                    i64::try_from(b.sample_count()).context("sample_count overflows i64")?;
                inserted += stmt
                    .execute(params![
                        key.as_key_string(),
                        key.entity_id,
                        key.metric,
                        key.hour_of_day,
                        b.median(),
                        b.mad(),
                        sample_count,
                        naive_to_text(b.training_start()),
                        naive_to_text(b.training_end()),
                        utc_to_text(b.created_at()),
                        b.version(),
                    ])
                    .with_context(|| format!("failed to insert baseline {}", key))?;
            }
        }

        tx.commit().context("failed to commit baseline batch")?;

        let skipped = baselines.len() - inserted;
        if skipped > 0 {
            debug!(skipped, "baselines already stored, left untouched");
        }
        info!(inserted, "stored baselines");
        Ok(inserted)
    }

    fn get_latest(&self, key: &str) -> Result<Option<BaselineStats>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "{} WHERE key_str = ?1 ORDER BY created_at DESC, version DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![key], BaselineRow::from_row)
            .optional()?;

        row.map(BaselineRow::into_baseline).transpose()
    }

    fn list_keys(&self) -> Result<BTreeSet<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT DISTINCT key_str FROM baselines")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(keys)
    }

    fn list_with_counts(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT key_str, COUNT(*) FROM baselines GROUP BY key_str")?;

        let mut counts = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for r in rows {
            let (key, count) = r?;
            counts.insert(key, usize::try_from(count)?);
        }
        Ok(counts)
    }

    fn list_baselines(&self, key: Option<&str>) -> Result<Vec<BaselineStats>> {
        let sql = match key {
            Some(_) => format!("{} WHERE key_str = ?1 ORDER BY created_at ASC, id ASC", SELECT_COLUMNS),
            None => format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS),
        };
        self.query_baselines(&sql, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test_baselines.db")).unwrap();
        (dir, store)
    }

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    fn artifact(median: f64, mad: f64, samples: usize, created_days: i64) -> BaselineStats {
        BaselineStats::V1(BaselineStatsV1 {
            key: BaselineKey::new("/login", "latency_p95_ms", Some(14)),
            median,
            mad,
            sample_count: samples,
            training_start: base(),
            training_end: base() + Duration::hours(1),
            created_at: Utc.from_utc_datetime(&(base() + Duration::days(created_days))),
        })
    }

    #[test]
    fn test_roundtrip_is_exact() {
        let (_dir, store) = open_temp();
        let mut b = artifact(100.0, 5.0, 50, 1);
        // Sub-second precision must survive storage.
        let BaselineStats::V1(v1) = &mut b;
        v1.created_at = v1.created_at + Duration::nanoseconds(123_456_789);
        v1.training_end = v1.training_end + Duration::microseconds(250);

        assert_eq!(store.put_many(std::slice::from_ref(&b)).unwrap(), 1);

        let rows = store.list_baselines(None).unwrap();
        assert_eq!(rows.len(), 1);
        let loaded = &rows[0];
        assert_eq!(loaded.key_string(), b.key_string());
        assert_eq!(loaded, &b);
    }

    #[test]
    fn test_latest_wins_regardless_of_insert_order() {
        let (_dir, store) = open_temp();
        let older = artifact(100.0, 5.0, 50, 1);
        let newer = artifact(110.0, 6.0, 60, 2);

        store.put_many(&[newer.clone(), older]).unwrap();

        let latest = store.get_latest(&newer.key_string()).unwrap().unwrap();
        assert_eq!(latest.median(), 110.0);
        assert_eq!(latest.mad(), 6.0);
        assert_eq!(latest.sample_count(), 60);
    }

    #[test]
    fn test_duplicate_put_is_ignored() {
        let (_dir, store) = open_temp();
        let b = artifact(100.0, 5.0, 50, 1);

        assert_eq!(store.put_many(std::slice::from_ref(&b)).unwrap(), 1);
        assert_eq!(store.put_many(std::slice::from_ref(&b)).unwrap(), 0);

        // Same identity with different stats is not an overwrite either.
        let imposter = artifact(999.0, 1.0, 5, 1);
        assert_eq!(store.put_many(&[imposter]).unwrap(), 0);

        let latest = store.get_latest(&b.key_string()).unwrap().unwrap();
        assert_eq!(latest.median(), 100.0);
        assert_eq!(store.list_baselines(None).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_artifact_fails_the_whole_batch() {
        let (_dir, store) = open_temp();
        let good = artifact(100.0, 5.0, 50, 1);

        let err = store
            .put_many(&[good.clone(), artifact(f64::NAN, 5.0, 50, 2)])
            .unwrap_err();
        assert!(err.to_string().contains("refusing to store"));
        assert!(store
            .put_many(&[artifact(100.0, f64::INFINITY, 50, 3)])
            .is_err());

        // Nothing from the failed batches was committed.
        assert!(store.list_keys().unwrap().is_empty());
        assert_eq!(store.put_many(&[good]).unwrap(), 1);
    }

    #[test]
    fn test_constraint_violations_other_than_duplicates_surface() {
        let (_dir, store) = open_temp();
        // Same table plus a CHECK constraint that only a real failure can trip.
        let conn = store.get_pool().get().unwrap();
        conn.execute_batch(
            "DROP TABLE baselines;
             CREATE TABLE baselines (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 key_str TEXT NOT NULL,
                 entity_id TEXT NOT NULL,
                 metric TEXT NOT NULL,
                 hour_of_day INTEGER,
                 median REAL NOT NULL CHECK (median < 1000),
                 mad REAL NOT NULL,
                 sample_count INTEGER NOT NULL,
                 training_start TEXT NOT NULL,
                 training_end TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 version INTEGER NOT NULL,
                 UNIQUE(key_str, version, created_at)
             );",
        )
        .unwrap();
        drop(conn);

        assert_eq!(store.put_many(&[artifact(100.0, 5.0, 50, 1)]).unwrap(), 1);
        assert_eq!(store.put_many(&[artifact(100.0, 5.0, 50, 1)]).unwrap(), 0);

        let err = store.put_many(&[artifact(5000.0, 5.0, 50, 2)]).unwrap_err();
        assert!(format!("{:#}", err).contains("CHECK"));
        assert_eq!(store.list_baselines(None).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_key_is_absent() {
        let (_dir, store) = open_temp();
        store.put_many(&[artifact(1.0, 1.0, 1, 1)]).unwrap();
        assert!(store.get_latest("/login:latency_p95_ms:hour=15").unwrap().is_none());
        assert!(store.get_latest("/login:latency_p95_ms").unwrap().is_none());
    }

    #[test]
    fn test_keys_and_counts() {
        let (_dir, store) = open_temp();
        let mut other = artifact(1.0, 1.0, 10, 1);
        let BaselineStats::V1(v1) = &mut other;
        v1.key = BaselineKey::new("/search", "latency_p95_ms", None);

        store
            .put_many(&[artifact(1.0, 1.0, 10, 1), artifact(2.0, 1.0, 10, 2), other])
            .unwrap();

        let keys: Vec<String> = store.list_keys().unwrap().into_iter().collect();
        assert_eq!(
            keys,
            vec!["/login:latency_p95_ms:hour=14", "/search:latency_p95_ms"]
        );

        let counts = store.list_with_counts().unwrap();
        assert_eq!(counts["/login:latency_p95_ms:hour=14"], 2);
        assert_eq!(counts["/search:latency_p95_ms"], 1);

        let history = store
            .list_baselines(Some("/login:latency_p95_ms:hour=14"))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].created_at() < history[1].created_at());
    }

    #[test]
    fn test_open_existing_requires_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        let err = SqliteStore::open_existing(&path).err().unwrap();
        assert!(err.to_string().contains("baseline database not found"));
        assert!(!path.exists());

        SqliteStore::open(&path).unwrap();
        assert!(SqliteStore::open_existing(&path).is_ok());
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_many(&[artifact(100.0, 5.0, 50, 1)]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_created_at_ties_go_to_later_insert() {
        let (_dir, store) = open_temp();
        let b = artifact(100.0, 5.0, 50, 1);
        store.put_many(std::slice::from_ref(&b)).unwrap();

        // A second row with the same created_at can only come from outside
        // put_many; relax the unique index to simulate it.
        let conn = store.get_pool().get().unwrap();
        conn.execute_batch(
            "CREATE TABLE baselines_copy AS SELECT * FROM baselines;
             DROP TABLE baselines;
             CREATE TABLE baselines AS SELECT * FROM baselines_copy WHERE 0;
             INSERT INTO baselines SELECT * FROM baselines_copy;
             INSERT INTO baselines SELECT 2, key_str, entity_id, metric, hour_of_day, 200.0,
                 mad, sample_count, training_start, training_end, created_at, version
             FROM baselines_copy;",
        )
        .unwrap();
        drop(conn);

        let latest = store.get_latest(&b.key_string()).unwrap().unwrap();
        assert_eq!(latest.median(), 200.0);
    }
}
