// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retention cache
//!
//! Answers "what has this source reported recently" and "what is its latest
//! value" without touching the durable store.
//!
//! # Expiry
//!
//! Each source keeps its readings in arrival order. Readings older than
//! `now - retention` are popped from the front lazily, whenever that source
//! is written or read. There is no background sweep, so idle sources cost
//! nothing.
//!
//! The latest reading per source is tracked separately and never expires.

use crate::config::CacheConfig;
use crate::reading::{Reading, SourceId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Per-source window of recent readings
#[derive(Default)]
struct SourceWindow {
    readings: VecDeque<Reading>,
    /// Set while the window is above the depth warning threshold
    over_threshold: bool,
}

impl SourceWindow {
    fn expire(&mut self, cutoff: Option<DateTime<Utc>>) {
        let Some(cutoff) = cutoff else {
            return;
        };
        while let Some(oldest) = self.readings.front() {
            if oldest.timestamp >= cutoff {
                break;
            }
            self.readings.pop_front();
        }
    }
}

struct CacheState {
    windows: HashMap<SourceId, SourceWindow>,
    latest: HashMap<SourceId, Reading>,
}

/// Retention-windowed in-memory cache of recent readings.
///
/// All state sits behind one lock. Operations never fail and never block
/// beyond the lock itself.
pub struct RetentionCache {
    retention: chrono::Duration,
    warning_threshold: usize,
    state: Mutex<CacheState>,
}

impl RetentionCache {
    /// Create a cache with the given retention window and depth warning threshold.
    pub fn new(retention: Duration, warning_threshold: usize) -> Self {
        // Windows too large for chrono never expire anything.
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));

        tracing::info!(
            "RetentionCache initialized with {} second retention",
            retention.num_seconds()
        );

        Self {
            retention,
            warning_threshold,
            state: Mutex::new(CacheState {
                windows: HashMap::new(),
                latest: HashMap::new(),
            }),
        }
    }

    /// Create a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.retention(), config.warning_threshold)
    }

    /// Record a reading, using the current wall clock for expiry.
    pub fn record_reading(&self, reading: Reading) {
        self.record_reading_at(reading, Utc::now());
    }

    /// Record a reading, expiring against an explicit `now`.
    pub fn record_reading_at(&self, reading: Reading, now: DateTime<Utc>) {
        let cutoff = self.cutoff(now);
        let source_id = reading.source_id;

        let mut state = self.state.lock();
        state.latest.insert(source_id, reading.clone());

        let window = state.windows.entry(source_id).or_default();
        window.readings.push_back(reading);

        if window.readings.len() == 1 {
            tracing::info!("Started caching data for source {}", source_id);
        }

        let depth = window.readings.len();
        if depth > self.warning_threshold {
            if !window.over_threshold {
                window.over_threshold = true;
                tracing::warn!(
                    "Cache for source {} holds {} readings (threshold {}), retention may be too high",
                    source_id,
                    depth,
                    self.warning_threshold
                );
            }
        } else {
            window.over_threshold = false;
        }

        window.expire(cutoff);
    }

    /// Non-expired readings for a source, oldest first.
    pub fn recent_readings(&self, source_id: SourceId) -> Vec<Reading> {
        self.recent_readings_at(source_id, Utc::now())
    }

    /// Non-expired readings for a source relative to an explicit `now`.
    pub fn recent_readings_at(&self, source_id: SourceId, now: DateTime<Utc>) -> Vec<Reading> {
        let cutoff = self.cutoff(now);
        let mut state = self.state.lock();

        let Some(window) = state.windows.get_mut(&source_id) else {
            return Vec::new();
        };
        window.expire(cutoff);

        if window.readings.is_empty() {
            state.windows.remove(&source_id);
            return Vec::new();
        }

        window.readings.iter().cloned().collect()
    }

    /// Most recently recorded reading for a source, regardless of expiry.
    pub fn latest_reading(&self, source_id: SourceId) -> Option<Reading> {
        self.state.lock().latest.get(&source_id).cloned()
    }

    /// Latest reading of every source that has reported, ordered by source id.
    pub fn latest_all(&self) -> Vec<Reading> {
        let state = self.state.lock();
        let mut latest: Vec<Reading> = state.latest.values().cloned().collect();
        latest.sort_by_key(|r| r.source_id);
        latest
    }

    /// Number of sources with a non-empty window (as of their last access).
    pub fn cached_sources(&self) -> usize {
        self.state.lock().windows.len()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SourceStatus;
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
            power: 60,
            temperature: 85.0,
        }
    }

    #[test]
    fn test_recent_readings_in_arrival_order() {
        let cache = RetentionCache::new(Duration::from_secs(60), 150);

        for i in 0..5 {
            cache.record_reading_at(reading(1, i, i as i32), at(i));
        }

        let recent = cache.recent_readings_at(1, at(5));
        let rpms: Vec<i32> = recent.iter().map(|r| r.rpm).collect();
        assert_eq!(rpms, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_unknown_source_is_empty() {
        let cache = RetentionCache::new(Duration::from_secs(60), 150);
        assert!(cache.recent_readings_at(42, at(0)).is_empty());
        assert!(cache.latest_reading(42).is_none());
    }

    #[test]
    fn test_expiry_on_write() {
        let cache = RetentionCache::new(Duration::from_secs(10), 150);

        cache.record_reading_at(reading(1, 0, 0), at(0));
        cache.record_reading_at(reading(1, 5, 5), at(5));
        // cutoff = 20 - 10 = 10: both older readings are gone
        cache.record_reading_at(reading(1, 20, 20), at(20));

        let recent = cache.recent_readings_at(1, at(20));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].rpm, 20);
    }

    #[test]
    fn test_expiry_on_read_never_returns_stale() {
        let cache = RetentionCache::new(Duration::from_secs(10), 150);

        for i in 0..30 {
            cache.record_reading_at(reading(1, i, i as i32), at(i));
        }

        let now = at(35);
        let cutoff = at(25);
        let recent = cache.recent_readings_at(1, now);
        assert!(!recent.is_empty());
        assert!(recent.iter().all(|r| r.timestamp >= cutoff));
        // boundary reading exactly at the cutoff is kept
        assert_eq!(recent[0].timestamp, cutoff);
    }

    #[test]
    fn test_latest_survives_expiry() {
        let cache = RetentionCache::new(Duration::from_secs(10), 150);

        cache.record_reading_at(reading(3, 0, 1), at(0));
        cache.record_reading_at(reading(3, 1, 2), at(1));

        assert!(cache.recent_readings_at(3, at(100)).is_empty());
        assert_eq!(cache.cached_sources(), 0);

        let latest = cache.latest_reading(3).unwrap();
        assert_eq!(latest.rpm, 2);
        assert_eq!(latest.timestamp, at(1));
    }

    #[test]
    fn test_sources_are_isolated() {
        let cache = RetentionCache::new(Duration::from_secs(10), 150);

        cache.record_reading_at(reading(1, 0, 10), at(0));
        cache.record_reading_at(reading(2, 8, 20), at(8));

        // Source 1 is stale at t=15, source 2 is not.
        assert!(cache.recent_readings_at(1, at(15)).is_empty());
        assert_eq!(cache.recent_readings_at(2, at(15)).len(), 1);
    }

    #[test]
    fn test_latest_all_sorted_by_source() {
        let cache = RetentionCache::new(Duration::from_secs(60), 150);

        cache.record_reading_at(reading(9, 0, 90), at(0));
        cache.record_reading_at(reading(2, 0, 20), at(0));
        cache.record_reading_at(reading(2, 1, 21), at(1));
        cache.record_reading_at(reading(5, 0, 50), at(0));

        let latest = cache.latest_all();
        let pairs: Vec<(SourceId, i32)> = latest.iter().map(|r| (r.source_id, r.rpm)).collect();
        assert_eq!(pairs, vec![(2, 21), (5, 50), (9, 90)]);
    }

    #[test]
    fn test_depth_above_warning_threshold_is_kept() {
        // The warning threshold never evicts; only age does.
        let cache = RetentionCache::new(Duration::from_secs(3600), 3);

        for i in 0..10 {
            cache.record_reading_at(reading(1, i, i as i32), at(i));
        }

        assert_eq!(cache.recent_readings_at(1, at(10)).len(), 10);
    }

    #[test]
    fn test_huge_retention_never_expires() {
        let cache = RetentionCache::new(Duration::from_secs(u64::MAX), 150);
        cache.record_reading_at(reading(1, 0, 1), at(0));
        assert_eq!(cache.recent_readings_at(1, at(1_000_000)).len(), 1);
    }
}
