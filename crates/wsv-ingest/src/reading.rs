// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading and source data model
//!
//! A [`Reading`] is created once by a producer and never mutated afterwards.
//! It flows by value through the retention cache, the elastic buffer and
//! finally the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a monitored source.
pub type SourceId = u32;

/// Operating status reported with a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceStatus {
    Running,
    Stopped,
}

impl SourceStatus {
    /// Label stored in the durable store.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Running => "Running",
            SourceStatus::Stopped => "Stopped",
        }
    }

    /// Parse a stored label. Unknown labels are rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Running" => Some(SourceStatus::Running),
            "Stopped" => Some(SourceStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable timestamped measurement from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Source that produced the reading
    pub source_id: SourceId,

    /// Production time (UTC)
    pub timestamp: DateTime<Utc>,

    /// Operating status
    pub status: SourceStatus,

    /// Revolutions per minute
    pub rpm: i32,

    /// Power output
    pub power: i32,

    /// Temperature in degrees Celsius
    pub temperature: f64,
}

impl Reading {
    /// Reading reported by a source that is switched off.
    pub fn stopped(source_id: SourceId, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id,
            timestamp,
            status: SourceStatus::Stopped,
            rpm: 0,
            power: 0,
            temperature: 0.0,
        }
    }
}

/// A monitored source, as listed in the service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Unique source identifier
    pub id: SourceId,

    /// Human-readable name
    pub name: String,

    /// Disabled sources still report, but with a `Stopped` status
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Source {
    /// Create an enabled source.
    pub fn new(id: SourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
        }
    }
}
