// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Production loop
//!
//! Asks the producer for one reading per configured source per tick, then
//! hands each reading to the retention cache (live reads) and the elastic
//! buffer (durability). Neither hand-off can block or fail.

use crate::buffer::{ElasticBuffer, Enqueued};
use crate::cache::RetentionCache;
use crate::reading::{Reading, Source, SourceStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Source of readings.
///
/// How values are generated is up to the implementation; the loop only needs
/// one reading per source on demand.
pub trait ReadingProducer: Send + Sync {
    fn produce(&self, source: &Source, now: DateTime<Utc>) -> Reading;
}

/// Producer reporting fixed nominal values for enabled sources and a
/// `Stopped` reading for disabled ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NominalProducer {
    pub rpm: i32,
    pub power: i32,
    pub temperature: f64,
}

impl Default for NominalProducer {
    fn default() -> Self {
        Self {
            rpm: 1500,
            power: 60,
            temperature: 85.0,
        }
    }
}

impl ReadingProducer for NominalProducer {
    fn produce(&self, source: &Source, now: DateTime<Utc>) -> Reading {
        if !source.enabled {
            return Reading::stopped(source.id, now);
        }

        Reading {
            source_id: source.id,
            timestamp: now,
            status: SourceStatus::Running,
            rpm: self.rpm,
            power: self.power,
            temperature: self.temperature,
        }
    }
}

/// Production statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProducerStats {
    /// Production ticks executed
    pub ticks: u64,
    /// Readings produced
    pub produced: u64,
    /// Readings the buffer refused (they still reached the cache)
    pub dropped: u64,
}

/// Periodic reading production
pub struct ProductionLoop<P: ReadingProducer> {
    sources: Vec<Source>,
    producer: P,
    cache: Arc<RetentionCache>,
    buffer: Arc<ElasticBuffer>,
    interval: Duration,
    stats: ProducerStats,
}

impl<P: ReadingProducer> ProductionLoop<P> {
    pub fn new(
        sources: Vec<Source>,
        producer: P,
        cache: Arc<RetentionCache>,
        buffer: Arc<ElasticBuffer>,
        interval: Duration,
    ) -> Self {
        Self {
            sources,
            producer,
            cache,
            buffer,
            interval,
            stats: ProducerStats::default(),
        }
    }

    /// Get production statistics
    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    /// Produce one reading for every source, stamped `now`.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> usize {
        self.stats.ticks += 1;

        for source in &self.sources {
            let reading = self.producer.produce(source, now);
            self.cache.record_reading_at(reading.clone(), now);
            if self.buffer.enqueue(reading) == Enqueued::Dropped {
                self.stats.dropped += 1;
            }
        }

        self.stats.produced += self.sources.len() as u64;
        tracing::trace!("Produced {} readings", self.sources.len());
        self.sources.len()
    }

    /// Produce on every interval until `shutdown` turns true or its sender
    /// is dropped. The first tick fires immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<ProducerStats> {
        tracing::info!(
            "ProductionLoop started for {} sources every {:?}",
            self.sources.len(),
            self.interval
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_at(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            "ProductionLoop stopped: {} readings produced, {} refused by buffer",
            self.stats.produced,
            self.stats.dropped
        );

        Ok(self.stats)
    }
}
