// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::float_cmp)] // Test assertions with constants

//! Write-behind integration tests
//!
//! Drives production and draining tick by tick: readings flow from the
//! producer into the cache and the buffer, then from the buffer into the store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wsv_ingest::config::{BufferConfig, WriterConfig};
use wsv_ingest::{
    BatchWriter, Config, DrainMode, ElasticBuffer, IngestService, LagState, MemoryStore,
    NominalProducer, ProductionLoop, ReadingQuery, ReadingStore, RetentionCache, Source,
    SqliteStore, TickOutcome, TimeRange,
};

// Elapsed times inside and outside the default 120 s slow window of a 300 s cycle
const SLOW: Duration = Duration::from_secs(0);
const NORMAL: Duration = Duration::from_secs(130);

struct Pipeline<S: ReadingStore> {
    cache: Arc<RetentionCache>,
    buffer: Arc<ElasticBuffer>,
    store: Arc<S>,
    production: ProductionLoop<NominalProducer>,
    writer: BatchWriter<S>,
}

impl<S: ReadingStore> Pipeline<S> {
    fn new(store: S, buffer: BufferConfig, sources: Vec<Source>) -> Self {
        let cache = Arc::new(RetentionCache::new(Duration::from_secs(60), 150));
        let buffer = Arc::new(ElasticBuffer::new(buffer));
        let store = Arc::new(store);
        let production = ProductionLoop::new(
            sources,
            NominalProducer::default(),
            Arc::clone(&cache),
            Arc::clone(&buffer),
            Duration::from_secs(1),
        );
        let writer = BatchWriter::new(
            WriterConfig::default(),
            Arc::clone(&buffer),
            Arc::clone(&store),
        );
        Self {
            cache,
            buffer,
            store,
            production,
            writer,
        }
    }

    fn query(&self) -> ReadingQuery<S> {
        ReadingQuery::new(Arc::clone(&self.cache), Arc::clone(&self.store))
    }

    /// Produce `ticks` rounds, one second apart, starting at `base`.
    fn produce(&mut self, base: DateTime<Utc>, ticks: i64) {
        for i in 0..ticks {
            self.production.tick_at(base + chrono::Duration::seconds(i));
        }
    }
}

/// Whole-second timestamp `secs` in the past, exact at store precision.
fn seconds_ago(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(Utc::now().timestamp() - secs, 0).unwrap()
}

fn two_sources() -> Vec<Source> {
    vec![Source::new(1, "turbine-1"), Source::new(2, "turbine-2")]
}

#[test]
fn test_readings_reach_sqlite_through_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readings.db");
    let store = SqliteStore::new(path.to_str().unwrap()).unwrap();
    let mut pipeline = Pipeline::new(store, BufferConfig::default(), two_sources());

    let base = seconds_ago(20);
    pipeline.produce(base, 10);
    assert_eq!(pipeline.buffer.buffered_count(), 20);

    // Slow window drains a trickle, normal mode takes the rest
    assert_eq!(
        pipeline.writer.tick_at(SLOW),
        TickOutcome::Written {
            written: 3,
            target: 3,
            mode: DrainMode::Slow,
        }
    );
    assert_eq!(
        pipeline.writer.tick_at(NORMAL),
        TickOutcome::Written {
            written: 17,
            target: 60,
            mode: DrainMode::Normal,
        }
    );
    assert!(matches!(
        pipeline.writer.tick_at(NORMAL),
        TickOutcome::Idle { .. }
    ));

    assert_eq!(pipeline.store.count().unwrap(), 20);
    assert_eq!(pipeline.buffer.buffered_count(), 0);

    let query = pipeline.query();
    let history = query.history(1, TimeRange::all(), None).unwrap();
    assert_eq!(history.len(), 10);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].timestamp > pair[1].timestamp));
    assert_eq!(history[0].timestamp, base + chrono::Duration::seconds(9));

    let lag = query.lag(2).unwrap();
    assert_eq!(lag.state, LagState::Ok);
    assert_eq!(lag.lag_secs, Some(0.0));
}

#[test]
fn test_store_outage_loses_one_batch_and_recovers() {
    let mut pipeline = Pipeline::new(MemoryStore::new(), BufferConfig::default(), two_sources());
    let base = seconds_ago(30);

    pipeline.produce(base, 5);
    pipeline.store.fail_next_writes(1);

    match pipeline.writer.tick_at(NORMAL) {
        TickOutcome::Failed {
            lost,
            oldest,
            newest,
            ..
        } => {
            assert_eq!(lost, 10);
            assert_eq!(oldest, base);
            assert_eq!(newest, base + chrono::Duration::seconds(4));
        }
        other => panic!("expected failed batch, got {:?}", other),
    }

    // Lost batch is not re-queued; live reads still see it
    assert_eq!(pipeline.buffer.buffered_count(), 0);
    assert_eq!(pipeline.store.count().unwrap(), 0);
    let query = pipeline.query();
    assert_eq!(query.lag(1).unwrap().state, LagState::DbEmpty);
    assert_eq!(query.history(1, TimeRange::all(), None).unwrap().len(), 5);

    pipeline.produce(base + chrono::Duration::seconds(5), 1);
    assert!(matches!(
        pipeline.writer.tick_at(NORMAL),
        TickOutcome::Written { written: 2, .. }
    ));

    let stats = pipeline.writer.stats();
    assert_eq!(stats.readings_lost, 10);
    assert_eq!(stats.readings_written, 2);
    assert_eq!(pipeline.store.write_calls(), 2);

    let lag = query.lag(1).unwrap();
    assert_eq!(lag.state, LagState::Ok);
    assert_eq!(lag.lag_secs, Some(0.0));
}

#[test]
fn test_burst_expands_then_drain_shrinks() {
    let buffer = BufferConfig {
        primary_capacity: 4,
        overflow_capacity: 2,
        max_overflow_segments: 1,
        expand_threshold: 0.5,
        ..BufferConfig::default()
    };
    let mut pipeline = Pipeline::new(MemoryStore::new(), buffer, vec![Source::new(7, "burst")]);
    let base = seconds_ago(10);

    pipeline.produce(base, 10);

    let stats = pipeline.buffer.stats();
    assert_eq!(stats.buffered, 6);
    assert_eq!(stats.segments, 2);
    assert_eq!(stats.dropped, 4);
    assert_eq!(pipeline.production.stats().dropped, 4);

    // Dropped readings never reached the buffer but the cache has all of them
    assert_eq!(pipeline.cache.recent_readings(7).len(), 10);

    pipeline.writer.tick_at(NORMAL);
    assert_eq!(pipeline.store.count().unwrap(), 6);
    assert_eq!(pipeline.buffer.segment_count(), 1);

    // The oldest six were kept, in order
    let stored = pipeline.store.readings();
    let expected: Vec<_> = (0..6).map(|i| base + chrono::Duration::seconds(i)).collect();
    let stamps: Vec<_> = stored.iter().map(|r| r.timestamp).collect();
    assert_eq!(stamps, expected);
}

#[tokio::test(start_paused = true)]
async fn test_service_persists_to_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service.db");
    let path = path.to_str().unwrap().to_string();

    let config = Config::builder()
        .database(path.clone())
        .producer_interval_ms(1_000)
        .writer(WriterConfig {
            tick_interval_secs: 2,
            ..WriterConfig::default()
        })
        .sources(two_sources())
        .build();
    config.validate().unwrap();

    let store = SqliteStore::new(&config.database).unwrap();
    let service = IngestService::new(config, store, NominalProducer::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(service.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(6_500)).await;
    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap().unwrap();

    assert!(report.writer.batches_written > 0);
    assert_eq!(report.writer.readings_lost, 0);

    let reopened = SqliteStore::new(&path).unwrap();
    assert_eq!(
        reopened.count().unwrap() as u64,
        report.writer.readings_written
    );
    let summaries = reopened.source_summaries().unwrap();
    assert!(summaries.iter().all(|s| s.source_id == 1 || s.source_id == 2));
}
