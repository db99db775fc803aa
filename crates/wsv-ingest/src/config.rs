// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion service configuration
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.
//! Every field has a default, so a partial file is valid.

use crate::reading::Source;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Elastic buffer sizing and housekeeping thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of the always-present primary segment
    pub primary_capacity: usize,

    /// Capacity of each overflow segment
    pub overflow_capacity: usize,

    /// Maximum number of overflow segments (0 = primary only)
    pub max_overflow_segments: usize,

    /// Tail occupancy fraction that triggers a new overflow segment
    pub expand_threshold: f64,

    /// Predecessor occupancy fraction at or below which an empty overflow
    /// segment behind another overflow segment is released
    pub overflow_shrink_threshold: f64,

    /// Primary occupancy fraction at or below which the last empty overflow
    /// segment is released
    pub primary_shrink_threshold: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            primary_capacity: 200,
            overflow_capacity: 100,
            max_overflow_segments: 2,
            expand_threshold: 0.6,
            overflow_shrink_threshold: 0.5,
            primary_shrink_threshold: 0.75,
        }
    }
}

impl BufferConfig {
    /// Capacity with every overflow segment allocated.
    pub fn max_capacity(&self) -> usize {
        self.primary_capacity + self.overflow_capacity * self.max_overflow_segments
    }
}

/// Retention cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Retention window in seconds
    pub retention_secs: u64,

    /// Per-source depth above which a warning is logged
    pub warning_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60,
            warning_threshold: 150,
        }
    }
}

impl CacheConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Batch writer and duty-cycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Interval between writer ticks in seconds
    pub tick_interval_secs: u64,

    /// Target batch size in normal mode
    pub normal_batch: usize,

    /// Target batch size in slow mode
    pub slow_batch: usize,

    /// Duty-cycle length in seconds
    pub cycle_length_secs: u64,

    /// Slow window at the start of each cycle, in seconds
    pub slow_duration_secs: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            normal_batch: 60,
            slow_batch: 3,
            cycle_length_secs: 300,
            slow_duration_secs: 120,
        }
    }
}

impl WriterConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn cycle_length(&self) -> Duration {
        Duration::from_secs(self.cycle_length_secs)
    }

    pub fn slow_duration(&self) -> Duration {
        Duration::from_secs(self.slow_duration_secs)
    }
}

/// Production loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Interval between production ticks in milliseconds
    pub interval_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
        }
    }
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Ingestion service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path
    pub database: String,

    /// Elastic buffer
    pub buffer: BufferConfig,

    /// Retention cache
    pub cache: CacheConfig,

    /// Batch writer
    pub writer: WriterConfig,

    /// Production loop
    pub producer: ProducerConfig,

    /// Monitored sources
    pub sources: Vec<Source>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "wsv_readings.db".to_string(),
            buffer: BufferConfig::default(),
            cache: CacheConfig::default(),
            writer: WriterConfig::default(),
            producer: ProducerConfig::default(),
            sources: vec![Source::new(1, "source-1")],
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML (used by `gen-config`).
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject settings the buffer, cache or writer cannot run with.
    ///
    /// Retention relative to arrival rate is not checked here; that only
    /// surfaces as the cache depth warning at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.buffer;
        if b.primary_capacity == 0 {
            return Err(invalid("buffer.primary_capacity must be > 0"));
        }
        if b.max_overflow_segments > 0 && b.overflow_capacity == 0 {
            return Err(invalid(
                "buffer.overflow_capacity must be > 0 when overflow segments are allowed",
            ));
        }
        for (name, value) in [
            ("buffer.expand_threshold", b.expand_threshold),
            ("buffer.overflow_shrink_threshold", b.overflow_shrink_threshold),
            ("buffer.primary_shrink_threshold", b.primary_shrink_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        let w = &self.writer;
        if w.tick_interval_secs == 0 {
            return Err(invalid("writer.tick_interval_secs must be > 0"));
        }
        if w.normal_batch == 0 || w.slow_batch == 0 {
            return Err(invalid("writer batch sizes must be > 0"));
        }
        if w.cycle_length_secs == 0 {
            return Err(invalid("writer.cycle_length_secs must be > 0"));
        }
        if w.slow_duration_secs >= w.cycle_length_secs {
            return Err(invalid(
                "writer.slow_duration_secs must be less than writer.cycle_length_secs",
            ));
        }

        if self.producer.interval_ms == 0 {
            return Err(invalid("producer.interval_ms must be > 0"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source id {}",
                    source.id
                )));
            }
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database: Option<String>,
    buffer: Option<BufferConfig>,
    cache: Option<CacheConfig>,
    writer: Option<WriterConfig>,
    producer_interval_ms: Option<u64>,
    sources: Option<Vec<Source>>,
}

impl ConfigBuilder {
    /// Set the SQLite database path
    pub fn database(mut self, path: impl Into<String>) -> Self {
        self.database = Some(path.into());
        self
    }

    /// Set elastic buffer settings
    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Set retention cache settings
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set batch writer settings
    pub fn writer(mut self, writer: WriterConfig) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Set the production interval in milliseconds
    pub fn producer_interval_ms(mut self, ms: u64) -> Self {
        self.producer_interval_ms = Some(ms);
        self
    }

    /// Set monitored sources
    pub fn sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            database: self.database.unwrap_or(defaults.database),
            buffer: self.buffer.unwrap_or(defaults.buffer),
            cache: self.cache.unwrap_or(defaults.cache),
            writer: self.writer.unwrap_or(defaults.writer),
            producer: self
                .producer_interval_ms
                .map(|interval_ms| ProducerConfig { interval_ms })
                .unwrap_or(defaults.producer),
            sources: self.sources.unwrap_or(defaults.sources),
        }
    }
}
