// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch writer
//!
//! Drains the elastic buffer into the durable store on a fixed schedule.
//!
//! # Operation
//!
//! Every tick:
//! 1. Pick the target batch size from the duty cycle (slow or normal)
//! 2. Dequeue up to that many readings, stopping early when the buffer is empty
//! 3. Skip the tick if nothing was dequeued
//! 4. Submit the batch as one atomic write
//!
//! A failed write loses that batch. It is logged with its size and time span
//! and is never re-queued, so a flapping store cannot cause duplicates or an
//! ever-growing retry backlog.

use crate::buffer::ElasticBuffer;
use crate::config::WriterConfig;
use crate::duty_cycle::{DrainMode, DutyCycle};
use crate::reading::Reading;
use crate::store::ReadingStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Writer statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriterStats {
    /// Ticks executed
    pub ticks: u64,
    /// Ticks that found the buffer empty
    pub idle_ticks: u64,
    /// Batches stored
    pub batches_written: u64,
    /// Readings stored
    pub readings_written: u64,
    /// Batches rejected by the store
    pub batches_failed: u64,
    /// Readings lost in rejected batches
    pub readings_lost: u64,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Buffer was empty; the store was not called.
    Idle { mode: DrainMode },

    /// Batch stored.
    Written {
        written: usize,
        target: usize,
        mode: DrainMode,
    },

    /// Store rejected the batch; the readings are gone.
    Failed {
        lost: usize,
        target: usize,
        mode: DrainMode,
        oldest: DateTime<Utc>,
        newest: DateTime<Utc>,
    },
}

/// Periodic buffer-to-store writer
pub struct BatchWriter<S: ReadingStore> {
    config: WriterConfig,
    duty_cycle: DutyCycle,
    buffer: Arc<ElasticBuffer>,
    store: Arc<S>,
    started: Instant,
    stats: WriterStats,
}

impl<S: ReadingStore> BatchWriter<S> {
    /// Create a writer. The duty cycle is measured from this call.
    pub fn new(config: WriterConfig, buffer: Arc<ElasticBuffer>, store: Arc<S>) -> Self {
        Self {
            duty_cycle: DutyCycle::from_config(&config),
            config,
            buffer,
            store,
            started: Instant::now(),
            stats: WriterStats::default(),
        }
    }

    /// Get writer statistics
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Target batch size for a drain mode.
    pub fn target_size(&self, mode: DrainMode) -> usize {
        match mode {
            DrainMode::Slow => self.config.slow_batch,
            DrainMode::Normal => self.config.normal_batch,
        }
    }

    /// Run one tick using the time elapsed since the writer was created.
    pub fn tick(&mut self) -> TickOutcome {
        self.tick_at(self.started.elapsed())
    }

    /// Run one tick as if `elapsed` had passed since start.
    pub fn tick_at(&mut self, elapsed: Duration) -> TickOutcome {
        self.stats.ticks += 1;

        let mode = self.duty_cycle.mode(elapsed);
        let target = self.target_size(mode);

        let batch: Vec<Reading> = std::iter::from_fn(|| self.buffer.dequeue())
            .take(target)
            .collect();

        if batch.is_empty() {
            self.stats.idle_ticks += 1;
            tracing::trace!("Writer tick: buffer empty, mode={}", mode);
            return TickOutcome::Idle { mode };
        }

        match self.store.write_batch(&batch) {
            Ok(()) => {
                self.stats.batches_written += 1;
                self.stats.readings_written += batch.len() as u64;
                tracing::info!(
                    "Writer tick: target={}, wrote={}, buffered={}, mode={}",
                    target,
                    batch.len(),
                    self.buffer.buffered_count(),
                    mode
                );
                TickOutcome::Written {
                    written: batch.len(),
                    target,
                    mode,
                }
            }
            Err(e) => {
                let (oldest, newest) = time_span(&batch);
                self.stats.batches_failed += 1;
                self.stats.readings_lost += batch.len() as u64;
                tracing::error!(
                    "Writer failed to store batch of {} readings spanning {} .. {}: {:#}",
                    batch.len(),
                    oldest,
                    newest,
                    e
                );
                TickOutcome::Failed {
                    lost: batch.len(),
                    target,
                    mode,
                    oldest,
                    newest,
                }
            }
        }
    }

    /// Run the writer until `shutdown` turns true or its sender is dropped.
    ///
    /// The first tick happens one interval after start. Shutdown is only
    /// observed between ticks; a submission in progress always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<WriterStats> {
        tracing::info!(
            "BatchWriter started: tick={:?}, normal={}, slow={}, cycle={:?}, slow window={:?}",
            self.config.tick_interval(),
            self.config.normal_batch,
            self.config.slow_batch,
            self.duty_cycle.cycle_length(),
            self.duty_cycle.slow_duration()
        );

        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() completes its first tick immediately
        ticker.tick().await;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            "BatchWriter stopped: {} readings written, {} lost, {} left buffered",
            self.stats.readings_written,
            self.stats.readings_lost,
            self.buffer.buffered_count()
        );

        Ok(self.stats)
    }
}

fn time_span(batch: &[Reading]) -> (DateTime<Utc>, DateTime<Utc>) {
    let mut oldest = batch[0].timestamp;
    let mut newest = batch[0].timestamp;
    for reading in &batch[1..] {
        oldest = oldest.min(reading.timestamp);
        newest = newest.max(reading.timestamp);
    }
    (oldest, newest)
}
