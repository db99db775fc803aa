// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read path over the cache and the durable store
//!
//! The store lags behind production by whatever is still buffered. History
//! queries merge both so the gap between the last flush and now is covered.

use crate::cache::RetentionCache;
use crate::reading::{Reading, SourceId};
use crate::store::{ReadingStore, TimeRange};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// History limit when the caller does not pass one
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Upper bound on any history request
pub const MAX_HISTORY_LIMIT: usize = 5000;

/// Outcome of a lag computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LagState {
    Ok,
    /// No reading has been produced for the source yet
    NoLiveData,
    /// Readings exist live but nothing has reached the store
    DbEmpty,
}

/// How far the durable store trails live production for one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LagReport {
    pub source_id: SourceId,
    pub state: LagState,
    pub latest_generated: Option<DateTime<Utc>>,
    pub latest_stored: Option<DateTime<Utc>>,
    /// Seconds, never negative
    pub lag_secs: Option<f64>,
}

/// Read-side facade over the retention cache and a reading store.
pub struct ReadingQuery<S: ReadingStore> {
    cache: Arc<RetentionCache>,
    store: Arc<S>,
}

impl<S: ReadingStore> Clone for ReadingQuery<S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ReadingStore> ReadingQuery<S> {
    pub fn new(cache: Arc<RetentionCache>, store: Arc<S>) -> Self {
        Self { cache, store }
    }

    /// Latest live reading for a source.
    pub fn latest(&self, source_id: SourceId) -> Option<Reading> {
        self.cache.latest_reading(source_id)
    }

    /// Latest live reading of every source.
    pub fn latest_all(&self) -> Vec<Reading> {
        self.cache.latest_all()
    }

    /// Readings of a source in `range`, newest first.
    ///
    /// Stored rows and cached readings are merged by timestamp at microsecond
    /// resolution, the precision of the SQLite store; when both hold the same
    /// timestamp the stored row wins. `limit` defaults to
    /// [`DEFAULT_HISTORY_LIMIT`] and is clamped to `1..=MAX_HISTORY_LIMIT`.
    pub fn history(
        &self,
        source_id: SourceId,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        let stored = self.store.query_range(source_id, range, limit)?;

        let mut merged: BTreeMap<i64, Reading> = self
            .cache
            .recent_readings(source_id)
            .into_iter()
            .filter(|r| range.contains(r.timestamp))
            .map(|r| (r.timestamp.timestamp_micros(), r))
            .collect();
        for reading in stored {
            merged.insert(reading.timestamp.timestamp_micros(), reading);
        }

        Ok(merged.into_values().rev().take(limit).collect())
    }

    /// Compare the latest live reading with the newest stored one.
    pub fn lag(&self, source_id: SourceId) -> Result<LagReport> {
        let Some(latest) = self.cache.latest_reading(source_id) else {
            return Ok(LagReport {
                source_id,
                state: LagState::NoLiveData,
                latest_generated: None,
                latest_stored: None,
                lag_secs: None,
            });
        };

        let Some(stored) = self.store.max_timestamp(source_id)? else {
            return Ok(LagReport {
                source_id,
                state: LagState::DbEmpty,
                latest_generated: Some(latest.timestamp),
                latest_stored: None,
                lag_secs: None,
            });
        };

        let lag = latest.timestamp.signed_duration_since(stored);
        let lag_secs = (lag.num_milliseconds() as f64 / 1000.0).max(0.0);

        Ok(LagReport {
            source_id,
            state: LagState::Ok,
            latest_generated: Some(latest.timestamp),
            latest_stored: Some(stored),
            lag_secs: Some(lag_secs),
        })
    }
}
