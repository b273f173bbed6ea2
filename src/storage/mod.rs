//! SQLite persistence for observations, baselines and cycle reports.
//!
//! Every row keeps the full JSON of the stored value; the scalar columns are
//! only there for ordering and quick queries.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::analysis::{BaselineModel, CycleReport};
use crate::observation::Observation;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Label of the baseline the monitor reads and writes.
pub const CURRENT_BASELINE: &str = "current";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory database, for tests and dry runs.
pub fn open_memory_pool() -> Result<Pool> {
    let pool = R2D2Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

fn to_sql_id(sequence_id: u64) -> Result<i64> {
    i64::try_from(sequence_id).context("sequence id does not fit in SQLite INTEGER")
}

pub fn append_observation(pool: &Pool, obs: &Observation) -> Result<()> {
    insert_observation(&*pool.get()?, obs)
}

fn insert_observation(conn: &Connection, obs: &Observation) -> Result<()> {
    conn.execute(
        "INSERT INTO observations (sequence_id, timestamp, observation_json)
         VALUES (?1, ?2, ?3)",
        params![
            to_sql_id(obs.sequence_id)?,
            obs.timestamp.to_rfc3339(),
            serde_json::to_string(obs)?
        ],
    )
    .with_context(|| format!("failed to store observation {}", obs.sequence_id))?;
    Ok(())
}

/// One past the highest stored sequence id, or 1 for an empty database.
pub fn next_sequence_id(pool: &Pool) -> Result<u64> {
    let conn = pool.get()?;
    let max: Option<i64> =
        conn.query_row("SELECT MAX(sequence_id) FROM observations", [], |row| {
            row.get(0)
        })?;
    Ok(max.map_or(1, |m| m.max(0) as u64 + 1))
}

pub fn observation_count(pool: &Pool) -> Result<u64> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// The newest `limit` observations, oldest first.
pub fn load_recent(pool: &Pool, limit: usize) -> Result<Vec<Observation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT observation_json FROM observations
         ORDER BY sequence_id DESC LIMIT ?1",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;

    let mut observations = rows
        .map(|json| Ok(serde_json::from_str::<Observation>(&json?)?))
        .collect::<Result<Vec<_>>>()?;
    observations.reverse();
    Ok(observations)
}

/// Observations with a sequence id above `after`, in sequence order.
pub fn load_after(pool: &Pool, after: u64) -> Result<Vec<Observation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT observation_json FROM observations
         WHERE sequence_id > ?1 ORDER BY sequence_id ASC",
    )?;
    let rows = stmt.query_map([to_sql_id(after)?], |row| row.get::<_, String>(0))?;
    rows.map(|json| Ok(serde_json::from_str::<Observation>(&json?)?))
        .collect()
}

/// Every stored observation in sequence order.
pub fn load_all(pool: &Pool) -> Result<Vec<Observation>> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT observation_json FROM observations ORDER BY sequence_id ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.map(|json| Ok(serde_json::from_str::<Observation>(&json?)?))
        .collect()
}

pub fn save_baseline(pool: &Pool, label: &str, model: &BaselineModel) -> Result<()> {
    upsert_baseline(&*pool.get()?, label, model)
}

fn upsert_baseline(conn: &Connection, label: &str, model: &BaselineModel) -> Result<()> {
    let status = model.status();
    conn.execute(
        "INSERT INTO baselines (label, sample_count, version, model_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(label) DO UPDATE SET
            sample_count = excluded.sample_count,
            version = excluded.version,
            model_json = excluded.model_json,
            updated_at = excluded.updated_at",
        params![
            label,
            to_sql_id(status.sample_count)?,
            to_sql_id(status.version)?,
            serde_json::to_string(model)?
        ],
    )
    .with_context(|| format!("failed to store baseline '{}'", label))?;
    Ok(())
}

/// Load a stored baseline. The caller is expected to `reconfigure` it, since
/// configuration is not persisted with the model.
pub fn load_baseline(pool: &Pool, label: &str) -> Result<Option<BaselineModel>> {
    let conn = pool.get()?;
    let json: Option<String> = conn
        .query_row(
            "SELECT model_json FROM baselines WHERE label = ?1",
            [label],
            |row| row.get(0),
        )
        .optional()?;
    json.map(|j| {
        serde_json::from_str(&j).with_context(|| format!("corrupt baseline '{}'", label))
    })
    .transpose()
}

pub fn save_report(pool: &Pool, report: &CycleReport) -> Result<()> {
    insert_report(&*pool.get()?, report)
}

fn insert_report(conn: &Connection, report: &CycleReport) -> Result<()> {
    conn.execute(
        "INSERT INTO reports (id, sequence_id, status, confidence, report_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            report.id.to_string(),
            to_sql_id(report.sequence_id)?,
            report.status.to_string(),
            report.confidence,
            serde_json::to_string(report)?
        ],
    )?;
    Ok(())
}

/// Store one analysis cycle atomically: the observation, its report and the
/// baseline (pending queue included) it left behind.
pub fn record_cycle(
    pool: &Pool,
    obs: &Observation,
    report: &CycleReport,
    model: &BaselineModel,
) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    insert_observation(&tx, obs)?;
    insert_report(&tx, report)?;
    upsert_baseline(&tx, CURRENT_BASELINE, model)?;
    tx.commit()
        .with_context(|| format!("failed to commit cycle {}", obs.sequence_id))?;
    Ok(())
}

pub fn latest_report(pool: &Pool) -> Result<Option<CycleReport>> {
    Ok(recent_reports(pool, 1)?.pop())
}

/// The newest `limit` reports, newest first.
pub fn recent_reports(pool: &Pool, limit: usize) -> Result<Vec<CycleReport>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT report_json FROM reports ORDER BY sequence_id DESC LIMIT ?1",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;
    rows.map(|json| Ok(serde_json::from_str::<CycleReport>(&json?)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::config::Config;
    use crate::observation::fixtures::{history, observation};

    #[test]
    fn test_observations_roundtrip_in_order() {
        let pool = open_memory_pool().unwrap();
        assert_eq!(next_sequence_id(&pool).unwrap(), 1);

        for obs in history(&[18.0, 19.0, 20.0, 21.0]) {
            append_observation(&pool, &obs).unwrap();
        }
        assert_eq!(next_sequence_id(&pool).unwrap(), 5);
        assert_eq!(observation_count(&pool).unwrap(), 4);

        let recent = load_recent(&pool, 2).unwrap();
        let ids: Vec<u64> = recent.iter().map(|o| o.sequence_id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(recent[1], observation(4, 21.0));

        assert_eq!(load_all(&pool).unwrap().len(), 4);
    }

    #[test]
    fn test_duplicate_sequence_id_is_rejected() {
        let pool = open_memory_pool().unwrap();
        append_observation(&pool, &observation(1, 18.0)).unwrap();
        assert!(append_observation(&pool, &observation(1, 18.0)).is_err());
    }

    #[test]
    fn test_baseline_upsert_and_load() {
        let pool = open_memory_pool().unwrap();
        let cfg = Config::default();
        assert!(load_baseline(&pool, CURRENT_BASELINE).unwrap().is_none());

        let model = BaselineModel::build(&cfg.baseline, &history(&vec![18.0; 20]));
        save_baseline(&pool, CURRENT_BASELINE, &model).unwrap();
        let model = BaselineModel::build(&cfg.baseline, &history(&vec![18.0; 30]));
        save_baseline(&pool, CURRENT_BASELINE, &model).unwrap();

        let mut loaded = load_baseline(&pool, CURRENT_BASELINE).unwrap().unwrap();
        loaded.reconfigure(cfg.baseline.clone());
        assert_eq!(loaded.sample_count(), 30);
        assert_eq!(loaded.status(), model.status());
    }

    #[test]
    fn test_reports_latest_first() {
        let pool = open_memory_pool().unwrap();
        assert!(latest_report(&pool).unwrap().is_none());

        let mut analyzer = Analyzer::new(&Config::default());
        for obs in history(&[18.0, 18.0, 30.0]) {
            let report = analyzer.process(obs).unwrap();
            save_report(&pool, &report).unwrap();
        }
        let latest = latest_report(&pool).unwrap().unwrap();
        assert_eq!(latest.sequence_id, 3);
        assert_eq!(recent_reports(&pool, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_record_cycle_is_all_or_nothing() {
        let pool = open_memory_pool().unwrap();
        let mut analyzer = Analyzer::new(&Config::default());

        let first = observation(1, 18.0);
        let report = analyzer.process(first.clone()).unwrap();
        record_cycle(&pool, &first, &report, analyzer.baseline()).unwrap();
        let saved = load_baseline(&pool, CURRENT_BASELINE).unwrap().unwrap();
        assert_eq!(saved.pending(), 1);

        // Reusing the report id fails after the observation insert.
        let second = observation(2, 18.0);
        analyzer.process(second.clone()).unwrap();
        assert!(record_cycle(&pool, &second, &report, analyzer.baseline()).is_err());

        assert_eq!(observation_count(&pool).unwrap(), 1);
        assert_eq!(recent_reports(&pool, 10).unwrap().len(), 1);
        let saved = load_baseline(&pool, CURRENT_BASELINE).unwrap().unwrap();
        assert_eq!(saved.pending(), 1);
    }

    #[test]
    fn test_load_after() {
        let pool = open_memory_pool().unwrap();
        for obs in history(&[18.0, 19.0, 20.0, 21.0]) {
            append_observation(&pool, &obs).unwrap();
        }
        let ids: Vec<u64> = load_after(&pool, 2)
            .unwrap()
            .iter()
            .map(|o| o.sequence_id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(load_after(&pool, 4).unwrap().is_empty());
        assert_eq!(load_after(&pool, 0).unwrap().len(), 4);
    }

    #[test]
    fn test_open_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aw.db");
        let pool = open_pool(&path).unwrap();
        append_observation(&pool, &observation(1, 18.0)).unwrap();
        drop(pool);

        let reopened = open_pool(&path).unwrap();
        assert_eq!(next_sequence_id(&reopened).unwrap(), 2);
    }
}
