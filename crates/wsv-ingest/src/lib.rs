// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WSV Ingest Service
//!
//! Sensor reading ingestion with write-behind persistence.
//!
//! # Features
//!
//! - **Retention Cache** -- Per-source sliding window for live reads
//! - **Elastic Buffer** -- Segmented FIFO that grows under pressure and shrinks back
//! - **Duty-Cycle Policy** -- Alternating slow/normal drain rate
//! - **Batch Writer** -- Periodic atomic batches into SQLite
//!
//! # Architecture
//!
//! ```text
//! IngestService
//! +-- ProductionLoop  (one reading per source per tick)
//! |   +-- RetentionCache  (live window, latest per source)
//! |   +-- ElasticBuffer   (primary + overflow segments)
//! +-- BatchWriter     (duty-cycled drain into ReadingStore)
//! +-- ReadingQuery    (history merge, lag)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use wsv_ingest::{Config, IngestService, NominalProducer, SqliteStore};
//!
//! let config = Config::builder()
//!     .database("wsv_readings.db")
//!     .producer_interval_ms(10_000)
//!     .build();
//!
//! let store = SqliteStore::new(&config.database)?;
//! let service = IngestService::new(config, store, NominalProducer::default());
//! let (_tx, rx) = tokio::sync::watch::channel(false);
//! service.run(rx).await?;
//! ```

pub mod buffer;
pub mod cache;
pub mod config;
pub mod duty_cycle;
pub mod producer;
pub mod query;
pub mod reading;
pub mod sqlite;
pub mod store;
pub mod writer;

pub use buffer::{BufferStats, ElasticBuffer, Enqueued};
pub use cache::RetentionCache;
pub use config::{Config, ConfigError};
pub use duty_cycle::{DrainMode, DutyCycle};
pub use producer::{NominalProducer, ProducerStats, ProductionLoop, ReadingProducer};
pub use query::{LagReport, LagState, ReadingQuery};
pub use reading::{Reading, Source, SourceId, SourceStatus};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, ReadingStore, SourceSummary, TimeRange};
pub use writer::{BatchWriter, TickOutcome, WriterStats};

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

/// Final counters of a service run
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceReport {
    pub producer: ProducerStats,
    pub writer: WriterStats,
    /// Buffer state after both loops stopped
    pub buffer: BufferStats,
}

/// Ingestion service
///
/// Owns the cache, buffer and store shared by the production loop and the
/// batch writer.
///
/// # Type Parameters
///
/// - `S` -- Storage backend (e.g., `SqliteStore`)
/// - `P` -- Reading producer
pub struct IngestService<S: ReadingStore, P: ReadingProducer> {
    config: Config,
    cache: Arc<RetentionCache>,
    buffer: Arc<ElasticBuffer>,
    store: Arc<S>,
    producer: P,
}

impl<S: ReadingStore + 'static, P: ReadingProducer + 'static> IngestService<S, P> {
    /// Create a new ingestion service
    pub fn new(config: Config, store: S, producer: P) -> Self {
        Self {
            cache: Arc::new(RetentionCache::from_config(&config.cache)),
            buffer: Arc::new(ElasticBuffer::new(config.buffer.clone())),
            store: Arc::new(store),
            producer,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> Arc<RetentionCache> {
        Arc::clone(&self.cache)
    }

    pub fn buffer(&self) -> Arc<ElasticBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Get the store for direct access
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Read-side handle that stays valid while the service runs.
    pub fn query(&self) -> ReadingQuery<S> {
        ReadingQuery::new(Arc::clone(&self.cache), Arc::clone(&self.store))
    }

    /// Run the ingestion service
    ///
    /// Starts the production loop and batch writer in parallel and returns
    /// once both have observed `shutdown`. Readings still buffered at that
    /// point are not flushed.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<ServiceReport> {
        tracing::info!("Starting WSV Ingest Service");
        tracing::info!("  Sources: {}", self.config.sources.len());
        tracing::info!(
            "  Buffer: primary {} + {} x {} overflow",
            self.config.buffer.primary_capacity,
            self.config.buffer.max_overflow_segments,
            self.config.buffer.overflow_capacity
        );
        tracing::info!("  Retention: {}s", self.config.cache.retention_secs);

        let production = ProductionLoop::new(
            self.config.sources.clone(),
            self.producer,
            Arc::clone(&self.cache),
            Arc::clone(&self.buffer),
            self.config.producer.interval(),
        );

        let writer = BatchWriter::new(
            self.config.writer.clone(),
            Arc::clone(&self.buffer),
            Arc::clone(&self.store),
        );

        let (producer, writer) =
            tokio::try_join!(production.run(shutdown.clone()), writer.run(shutdown))?;

        let buffer = self.buffer.stats();
        if buffer.buffered > 0 {
            tracing::warn!(
                "Stopped with {} readings still buffered (not persisted)",
                buffer.buffered
            );
        }

        Ok(ServiceReport {
            producer,
            writer,
            buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use std::time::Duration;

    fn test_config() -> Config {
        Config::builder()
            .producer_interval_ms(1_000)
            .writer(WriterConfig {
                tick_interval_secs: 1,
                ..WriterConfig::default()
            })
            .sources(vec![Source::new(1, "a"), Source::new(2, "b")])
            .build()
    }

    #[test]
    fn test_ingest_service_creation() {
        let store = SqliteStore::new_in_memory().unwrap();
        let service = IngestService::new(test_config(), store, NominalProducer::default());

        assert_eq!(service.config().sources.len(), 2);
        assert_eq!(service.buffer().buffered_count(), 0);
        assert_eq!(service.buffer().segment_count(), 1);
        assert_eq!(service.store().count().unwrap(), 0);
        assert!(service.query().latest_all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_service_accounts_for_every_reading() {
        let service = IngestService::new(
            test_config(),
            MemoryStore::new(),
            NominalProducer::default(),
        );
        let store = service.store();
        let query = service.query();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(service.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(query.latest_all().len(), 2);

        shutdown_tx.send(true).unwrap();
        let report = handle.await.unwrap().unwrap();

        assert!(report.producer.produced > 0);
        assert!(report.writer.readings_written > 0);
        assert_eq!(report.producer.dropped, 0);
        assert_eq!(
            report.producer.produced,
            report.writer.readings_written + report.buffer.buffered as u64
        );
        assert_eq!(store.count().unwrap() as u64, report.writer.readings_written);
    }
}
