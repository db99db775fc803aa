// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer duty cycle
//!
//! Every cycle starts with a slow window of throttled writes, followed by
//! full-rate draining for the rest of the cycle.

use crate::config::WriterConfig;
use std::fmt;
use std::time::Duration;

/// Drain mode for a writer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    Slow,
    Normal,
}

impl fmt::Display for DrainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainMode::Slow => f.write_str("SLOW"),
            DrainMode::Normal => f.write_str("NORMAL"),
        }
    }
}

/// Slow/normal pattern repeating every `cycle_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycle {
    cycle_length: Duration,
    slow_duration: Duration,
}

impl DutyCycle {
    /// `slow_duration` is expected to be shorter than `cycle_length`; a zero
    /// cycle length always yields normal mode.
    pub fn new(cycle_length: Duration, slow_duration: Duration) -> Self {
        Self {
            cycle_length,
            slow_duration,
        }
    }

    pub fn from_config(config: &WriterConfig) -> Self {
        Self::new(config.cycle_length(), config.slow_duration())
    }

    /// Mode for the given time since service start.
    pub fn mode(&self, elapsed: Duration) -> DrainMode {
        let cycle = self.cycle_length.as_nanos();
        if cycle == 0 {
            return DrainMode::Normal;
        }

        let within_cycle = elapsed.as_nanos() % cycle;
        if within_cycle < self.slow_duration.as_nanos() {
            DrainMode::Slow
        } else {
            DrainMode::Normal
        }
    }

    pub fn cycle_length(&self) -> Duration {
        self.cycle_length
    }

    pub fn slow_duration(&self) -> Duration {
        self.slow_duration
    }
}
