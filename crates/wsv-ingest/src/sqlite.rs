// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite reading store
//!
//! File-backed durable storage for drained batches.

use crate::reading::{Reading, SourceId, SourceStatus};
use crate::store::{ReadingStore, SourceSummary, TimeRange};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

/// SQLite reading store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
/// Each batch is written in a single transaction.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE readings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     source_id INTEGER NOT NULL,
///     timestamp_us INTEGER NOT NULL,
///     status TEXT NOT NULL,
///     rpm INTEGER NOT NULL,
///     power INTEGER NOT NULL,
///     temperature REAL NOT NULL
/// );
/// CREATE INDEX idx_source_time ON readings(source_id, timestamp_us);
/// ```
///
/// Timestamps are Unix microseconds.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store with a file-based database
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                timestamp_us INTEGER NOT NULL,
                status TEXT NOT NULL,
                rpm INTEGER NOT NULL,
                power INTEGER NOT NULL,
                temperature REAL NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_source_time ON readings(source_id, timestamp_us)",
            [],
        )?;

        Ok(())
    }

    fn row_to_reading(row: &rusqlite::Row) -> rusqlite::Result<Reading> {
        let timestamp_us: i64 = row.get(1)?;
        let status: String = row.get(2)?;

        Ok(Reading {
            source_id: row.get(0)?,
            timestamp: micros_to_datetime(1, timestamp_us)?,
            status: SourceStatus::from_label(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown status label {:?}", status).into(),
                )
            })?,
            rpm: row.get(3)?,
            power: row.get(4)?,
            temperature: row.get(5)?,
        })
    }
}

fn micros_to_datetime(column: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, micros))
}

impl ReadingStore for SqliteStore {
    fn write_batch(&self, readings: &[Reading]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO readings (source_id, timestamp_us, status, rpm, power, temperature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for reading in readings {
                insert.execute(params![
                    reading.source_id,
                    reading.timestamp.timestamp_micros(),
                    reading.status.as_str(),
                    reading.rpm,
                    reading.power,
                    reading.temperature,
                ])?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to commit batch of {} readings", readings.len()))?;

        Ok(())
    }

    fn max_timestamp(&self, source_id: SourceId) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(timestamp_us) FROM readings WHERE source_id = ?1",
            [source_id],
            |row| row.get(0),
        )?;

        max.map(|us| micros_to_datetime(0, us).map_err(Into::into))
            .transpose()
    }

    fn query_range(
        &self,
        source_id: SourceId,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let conn = self.conn.lock();

        let from_us = range.from.map_or(i64::MIN, |t| t.timestamp_micros());
        let to_us = range.to.map_or(i64::MAX, |t| t.timestamp_micros());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare_cached(
            "SELECT source_id, timestamp_us, status, rpm, power, temperature
             FROM readings
             WHERE source_id = ?1 AND timestamp_us >= ?2 AND timestamp_us < ?3
             ORDER BY timestamp_us DESC
             LIMIT ?4",
        )?;

        let readings = stmt
            .query_map(
                params![source_id, from_us, to_us, limit],
                Self::row_to_reading,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    fn source_summaries(&self) -> Result<Vec<SourceSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id, COUNT(*), MAX(timestamp_us)
             FROM readings
             GROUP BY source_id
             ORDER BY source_id ASC",
        )?;

        let summaries = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok(SourceSummary {
                    source_id: row.get(0)?,
                    readings: count as usize,
                    newest: micros_to_datetime(2, row.get(2)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn reading(source_id: SourceId, secs: i64, rpm: i32) -> Reading {
        Reading {
            source_id,
            timestamp: at(secs),
            status: SourceStatus::Running,
            rpm,
            power: 61,
            temperature: 84.5,
        }
    }

    #[test]
    fn test_sqlite_store_write_batch_and_query() {
        let store = SqliteStore::new_in_memory().unwrap();

        let batch: Vec<Reading> = (0..10).map(|i| reading(1, i, 1500 + i as i32)).collect();
        store.write_batch(&batch).unwrap();

        assert_eq!(store.count().unwrap(), 10);

        let rows = store
            .query_range(1, TimeRange::new(Some(at(2)), Some(at(6))), 100)
            .unwrap();
        assert_eq!(rows.len(), 4); // 2, 3, 4, 5; `to` is exclusive
        assert_eq!(rows[0].timestamp, at(5));
        assert_eq!(rows[3].timestamp, at(2));
        assert_eq!(rows[0], batch[5]);
    }

    #[test]
    fn test_sqlite_store_query_limit_and_source_filter() {
        let store = SqliteStore::new_in_memory().unwrap();

        store
            .write_batch(&[
                reading(1, 1, 1),
                reading(2, 2, 2),
                reading(1, 3, 3),
                reading(1, 4, 4),
            ])
            .unwrap();

        let rows = store.query_range(1, TimeRange::all(), 2).unwrap();
        let rpms: Vec<i32> = rows.iter().map(|r| r.rpm).collect();
        assert_eq!(rpms, vec![4, 3]);
    }

    #[test]
    fn test_sqlite_store_max_timestamp() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.max_timestamp(1).unwrap(), None);

        store
            .write_batch(&[reading(1, 10, 0), reading(1, 30, 0), reading(2, 50, 0)])
            .unwrap();

        assert_eq!(store.max_timestamp(1).unwrap(), Some(at(30)));
        assert_eq!(store.max_timestamp(2).unwrap(), Some(at(50)));
    }

    #[test]
    fn test_sqlite_store_preserves_subsecond_timestamps() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut r = reading(1, 0, 0);
        r.timestamp = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        r.status = SourceStatus::Stopped;

        store.write_batch(std::slice::from_ref(&r)).unwrap();

        let rows = store.query_range(1, TimeRange::all(), 1).unwrap();
        assert_eq!(rows, vec![r]);
    }

    #[test]
    fn test_sqlite_store_source_summaries() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .write_batch(&[reading(3, 1, 0), reading(1, 2, 0), reading(3, 9, 0)])
            .unwrap();

        let summaries = store.source_summaries().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].source_id, 1);
        assert_eq!(summaries[1].readings, 2);
        assert_eq!(summaries[1].newest, at(9));
    }

    #[test]
    fn test_sqlite_store_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::new(path).unwrap();
            store.write_batch(&[reading(1, 1, 0), reading(1, 2, 0)]).unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.max_timestamp(1).unwrap(), Some(at(2)));
    }
}
