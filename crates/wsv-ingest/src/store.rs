// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Durable reading store abstraction
//!
//! Defines the trait for storage backends the batch writer drains into.

use crate::reading::{Reading, SourceId};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Half-open time range: `from` inclusive, `to` exclusive. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    /// Unbounded range
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp < to)
    }
}

/// Per-source totals reported by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source_id: SourceId,
    pub readings: usize,
    pub newest: DateTime<Utc>,
}

/// Reading store trait
///
/// Backend-agnostic interface for durably storing readings.
///
/// # Implementations
///
/// - `SqliteStore` -- Default, file-backed
/// - `MemoryStore` -- In-process, with failure injection
pub trait ReadingStore: Send + Sync {
    /// Store a non-empty batch atomically: either every reading is stored or none is.
    fn write_batch(&self, readings: &[Reading]) -> Result<()>;

    /// Newest stored timestamp for a source, if it has any rows.
    fn max_timestamp(&self, source_id: SourceId) -> Result<Option<DateTime<Utc>>>;

    /// Readings of one source within `range`, newest first, at most `limit`.
    fn query_range(&self, source_id: SourceId, range: TimeRange, limit: usize)
        -> Result<Vec<Reading>>;

    /// Total number of stored readings
    fn count(&self) -> Result<usize>;

    /// Row count and newest timestamp per stored source, ordered by source id.
    fn source_summaries(&self) -> Result<Vec<SourceSummary>>;
}

#[derive(Default)]
struct MemoryState {
    readings: Vec<Reading>,
    write_calls: usize,
    fail_remaining: usize,
}

/// In-memory store
///
/// Holds readings in insertion order. Writes can be made to fail on demand,
/// which is how storage outages are simulated in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `write_batch` fail without storing anything.
    pub fn fail_next_writes(&self, n: usize) {
        self.state.lock().fail_remaining = n;
    }

    /// Number of `write_batch` calls, failed ones included.
    pub fn write_calls(&self) -> usize {
        self.state.lock().write_calls
    }

    /// Snapshot of every stored reading, in insertion order.
    pub fn readings(&self) -> Vec<Reading> {
        self.state.lock().readings.clone()
    }
}

impl ReadingStore for MemoryStore {
    fn write_batch(&self, readings: &[Reading]) -> Result<()> {
        let mut state = self.state.lock();
        state.write_calls += 1;

        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            bail!("injected write failure ({} readings rejected)", readings.len());
        }

        state.readings.extend_from_slice(readings);
        Ok(())
    }

    fn max_timestamp(&self, source_id: SourceId) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock();
        Ok(state
            .readings
            .iter()
            .filter(|r| r.source_id == source_id)
            .map(|r| r.timestamp)
            .max())
    }

    fn query_range(
        &self,
        source_id: SourceId,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let state = self.state.lock();
        let mut matching: Vec<Reading> = state
            .readings
            .iter()
            .filter(|r| r.source_id == source_id && range.contains(r.timestamp))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.state.lock().readings.len())
    }

    fn source_summaries(&self) -> Result<Vec<SourceSummary>> {
        let state = self.state.lock();
        let mut summaries: Vec<SourceSummary> = Vec::new();

        for reading in &state.readings {
            match summaries
                .iter_mut()
                .find(|s| s.source_id == reading.source_id)
            {
                Some(summary) => {
                    summary.readings += 1;
                    summary.newest = summary.newest.max(reading.timestamp);
                }
                None => summaries.push(SourceSummary {
                    source_id: reading.source_id,
                    readings: 1,
                    newest: reading.timestamp,
                }),
            }
        }

        summaries.sort_by_key(|s| s.source_id);
        Ok(summaries)
    }
}
