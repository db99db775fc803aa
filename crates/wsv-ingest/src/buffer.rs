// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Elastic write-behind buffer
//!
//! A primary bounded FIFO plus a chain of overflow segments that grows under
//! burst and shrinks back once the writer catches up.
//!
//! ```text
//!   enqueue -->  [ primary ][ overflow #1 ][ overflow #2 ]  (tail)
//!   dequeue <--  head of primary
//!                  ^ backfill pulls readings toward the primary
//! ```
//!
//! # Segment lifecycle
//!
//! - **Expand** (on enqueue, before the write): if the tail segment already
//!   holds at least `expand_threshold * capacity` readings, a new overflow
//!   segment is appended, up to `max_overflow_segments`.
//! - **Backfill** (on dequeue): readings move forward from each segment into
//!   its predecessor, so segments stay front-packed and draining order equals
//!   arrival order.
//! - **Shrink** (on dequeue, after backfill): from the tail inward, an empty
//!   overflow segment is released while its predecessor is at or below the
//!   shrink threshold. The primary segment is never released.
//!
//! When every segment is full and no more can be added, the new reading is
//! dropped and counted. Enqueue never blocks and never fails.

use crate::config::BufferConfig;
use crate::reading::Reading;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Reading stored in a segment
    Accepted,
    /// Every segment was full; reading discarded
    Dropped,
}

/// Point-in-time buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    /// Readings currently buffered across all segments
    pub buffered: usize,
    /// Capacity of the currently allocated segments
    pub capacity: usize,
    /// Allocated segments, primary included
    pub segments: usize,
    /// Readings dropped since creation
    pub dropped: u64,
}

struct Segment {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl Segment {
    fn new(capacity: usize) -> Self {
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.readings.len()
    }

    fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    fn has_room(&self) -> bool {
        self.readings.len() < self.capacity
    }

    fn reached(&self, fraction: f64) -> bool {
        self.len() as f64 >= fraction * self.capacity as f64
    }

    fn at_or_below(&self, fraction: f64) -> bool {
        self.len() as f64 <= fraction * self.capacity as f64
    }
}

struct BufferState {
    /// `segments[0]` is the primary segment and always present.
    segments: Vec<Segment>,
    dropped: u64,
}

impl BufferState {
    fn buffered(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    fn capacity(&self) -> usize {
        self.segments.iter().map(|s| s.capacity).sum()
    }

    fn overflow_count(&self) -> usize {
        self.segments.len() - 1
    }
}

/// Elastic FIFO buffer between the production loop and the batch writer.
///
/// Segment structure and counters are guarded by a single lock held for the
/// whole of each operation, housekeeping included.
pub struct ElasticBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
}

impl ElasticBuffer {
    /// Create a buffer holding only the primary segment.
    pub fn new(config: BufferConfig) -> Self {
        let primary = Segment::new(config.primary_capacity);
        Self {
            config,
            state: Mutex::new(BufferState {
                segments: vec![primary],
                dropped: 0,
            }),
        }
    }

    /// Append a reading, dropping it if every segment is full.
    pub fn enqueue(&self, reading: Reading) -> Enqueued {
        let mut state = self.state.lock();

        let tail_reached = state
            .segments
            .last()
            .map_or(false, |tail| tail.reached(self.config.expand_threshold));
        if tail_reached {
            self.try_expand(&mut state);
        }

        if let Some(segment) = state.segments.iter_mut().find(|s| s.has_room()) {
            segment.readings.push_back(reading);
            return Enqueued::Accepted;
        }

        state.dropped += 1;
        tracing::warn!(
            "Reading dropped for source {}, buffer at full capacity. Total dropped: {}. Buffered: {}/{}",
            reading.source_id,
            state.dropped,
            state.buffered(),
            state.capacity()
        );
        Enqueued::Dropped
    }

    /// Pop the oldest reading from the primary segment.
    ///
    /// Returns `None` when the primary segment is empty. Backfill keeps the
    /// primary full whenever overflow segments hold readings, so this only
    /// happens when the whole buffer is empty.
    pub fn dequeue(&self) -> Option<Reading> {
        let mut state = self.state.lock();

        let reading = state.segments[0].readings.pop_front();
        Self::backfill(&mut state.segments);
        self.shrink(&mut state);

        reading
    }

    /// Readings currently buffered across all segments.
    pub fn buffered_count(&self) -> usize {
        self.state.lock().buffered()
    }

    /// Readings dropped since creation.
    pub fn dropped_count(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Allocated segments, primary included.
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Occupancy of each segment, primary first.
    pub fn segment_occupancy(&self) -> Vec<usize> {
        self.state.lock().segments.iter().map(Segment::len).collect()
    }

    /// Snapshot of buffer statistics.
    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        BufferStats {
            buffered: state.buffered(),
            capacity: state.capacity(),
            segments: state.segments.len(),
            dropped: state.dropped,
        }
    }

    fn try_expand(&self, state: &mut BufferState) {
        let overflow = state.overflow_count();
        if overflow >= self.config.max_overflow_segments {
            tracing::warn!(
                "Overflow segment could not be created, maximum reached {}/{}. Data loss imminent",
                overflow,
                self.config.max_overflow_segments
            );
            return;
        }

        state
            .segments
            .push(Segment::new(self.config.overflow_capacity));
        tracing::info!(
            "Overflow segment #{} created. Total buffer capacity now {}",
            overflow + 1,
            state.capacity()
        );
    }

    /// Move readings forward so every segment is full before its successor
    /// holds anything.
    fn backfill(segments: &mut [Segment]) {
        for i in 0..segments.len().saturating_sub(1) {
            let (head, tail) = segments.split_at_mut(i + 1);
            let front = &mut head[i];
            let next = &mut tail[0];

            while front.has_room() {
                match next.readings.pop_front() {
                    Some(reading) => front.readings.push_back(reading),
                    None => break,
                }
            }
        }
    }

    /// Release trailing empty overflow segments whose predecessor has drained
    /// far enough. Stops at the first segment that does not qualify.
    fn shrink(&self, state: &mut BufferState) {
        while state.segments.len() > 1 {
            let last = state.segments.len() - 1;
            let threshold = if last == 1 {
                self.config.primary_shrink_threshold
            } else {
                self.config.overflow_shrink_threshold
            };

            let releasable = state.segments[last].is_empty()
                && state.segments[last - 1].at_or_below(threshold);
            if !releasable {
                return;
            }

            state.segments.pop();
            tracing::info!(
                "Overflow segment #{} released. Total buffer capacity now {}",
                last,
                state.capacity()
            );
        }
    }
}
