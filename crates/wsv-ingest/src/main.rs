// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WSV Ingest Service CLI
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (wsv_readings.db, one source)
//! wsv-ingest
//!
//! # Using configuration file, four sources, 5 s writer tick
//! wsv-ingest --config ingest.toml --sources 4 --tick-interval 5
//!
//! # Query stored history
//! wsv-ingest history 1 --limit 50
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use wsv_ingest::{
    Config, ElasticBuffer, IngestService, MemoryStore, NominalProducer, ReadingQuery,
    ReadingStore, RetentionCache, ServiceReport, Source, SqliteStore, TimeRange,
};

/// WSV sensor reading ingestion
#[derive(Parser, Debug)]
#[command(name = "wsv-ingest")]
#[command(about = "WSV Ingest Service - live cache and write-behind persistence for sensor readings")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (SQLite file), overrides the config
    #[arg(short, long)]
    db: Option<String>,

    /// Keep readings in memory instead of SQLite
    #[arg(long)]
    memory: bool,

    /// Writer tick interval in seconds, overrides the config
    #[arg(long)]
    tick_interval: Option<u64>,

    /// Number of sources to monitor (ids 1..=N), overrides the config
    #[arg(long)]
    sources: Option<u32>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "30")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print stored readings of a source as JSON lines, newest first
    History {
        /// Source id
        source: u32,

        /// Maximum readings (clamped to 1..=5000)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show stored reading statistics
    Stats,

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "ingest.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = build_config(&args)?;

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::History { source, limit } => cmd_history(&config, source, limit),
            Commands::Stats => cmd_stats(&config),
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    tracing::info!("WSV Ingest Service v{}", env!("CARGO_PKG_VERSION"));

    let report = if args.memory {
        tracing::info!("  Store: in-memory");
        run_service(config, MemoryStore::new(), args.stats_interval).await?
    } else {
        tracing::info!("  Store: {}", config.database);
        let store = SqliteStore::new(&config.database)?;
        run_service(config, store, args.stats_interval).await?
    };

    println!("\nFinal Statistics:");
    println!(
        "  Produced: {} readings ({} refused by buffer)",
        report.producer.produced, report.producer.dropped
    );
    println!(
        "  Written: {} readings in {} batches",
        report.writer.readings_written, report.writer.batches_written
    );
    println!(
        "  Lost: {} readings in {} failed batches",
        report.writer.readings_lost, report.writer.batches_failed
    );
    println!("  Left buffered: {}", report.buffer.buffered);

    Ok(())
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(ref db) = args.db {
        config.database = db.clone();
    }
    if let Some(secs) = args.tick_interval {
        config.writer.tick_interval_secs = secs;
    }
    if let Some(n) = args.sources {
        config.sources = (1..=n)
            .map(|id| Source::new(id, format!("source-{}", id)))
            .collect();
    }

    config.validate()?;
    Ok(config)
}

async fn run_service<S: ReadingStore + 'static>(
    config: Config,
    store: S,
    stats_interval: u64,
) -> Result<ServiceReport> {
    let source_ids: Vec<u32> = config.sources.iter().map(|s| s.id).collect();
    let service = IngestService::new(config, store, NominalProducer::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Stats reporting task
    if stats_interval > 0 {
        let buffer = service.buffer();
        let query = service.query();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => log_stats(&buffer, &query, &source_ids),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // Wait for Ctrl+C
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutting down...");
        let _ = shutdown_tx.send(true);
    });

    service.run(shutdown_rx).await
}

fn log_stats<S: ReadingStore>(buffer: &ElasticBuffer, query: &ReadingQuery<S>, sources: &[u32]) {
    let stats = buffer.stats();
    tracing::info!(
        "Buffer: {}/{} in {} segments, {} dropped",
        stats.buffered,
        stats.capacity,
        stats.segments,
        stats.dropped
    );

    for &id in sources {
        match query.lag(id) {
            Ok(report) => match report.lag_secs {
                Some(lag) => tracing::info!("  Source {}: lag {:.1}s", id, lag),
                None => tracing::info!("  Source {}: {:?}", id, report.state),
            },
            Err(e) => tracing::warn!("  Source {}: lag unavailable: {}", id, e),
        }
    }
}

fn cmd_history(config: &Config, source: u32, limit: Option<usize>) -> Result<()> {
    let store = Arc::new(SqliteStore::new(&config.database)?);
    // One-shot process: the cache stays empty, history comes from the store
    let cache = Arc::new(RetentionCache::from_config(&config.cache));
    let query = ReadingQuery::new(cache, store);

    for reading in query.history(source, TimeRange::all(), limit)? {
        println!("{}", serde_json::to_string(&reading)?);
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::new(&config.database)?;

    println!("Database: {}", config.database);
    println!("Total readings: {}", store.count()?);
    println!();

    let summaries = store.source_summaries()?;
    if summaries.is_empty() {
        println!("No stored readings.");
        return Ok(());
    }

    println!("{:<10} {:>10}  Newest", "Source", "Readings");
    for summary in summaries {
        println!(
            "{:<10} {:>10}  {}",
            summary.source_id,
            summary.readings,
            summary.newest.to_rfc3339()
        );
    }
    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let config = Config::builder()
        .sources(vec![
            Source::new(1, "turbine-1"),
            Source::new(2, "turbine-2"),
            Source {
                id: 3,
                name: "turbine-3".into(),
                enabled: false,
            },
        ])
        .build();

    let content = format!(
        r#"# WSV Ingest Configuration
# Generated by wsv-ingest gen-config

{}
"#,
        config.to_toml_string()?
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    match Config::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Database: {}", config.database);
            println!(
                "Buffer: primary {} + {} x {} overflow (max {})",
                config.buffer.primary_capacity,
                config.buffer.max_overflow_segments,
                config.buffer.overflow_capacity,
                config.buffer.max_capacity()
            );
            println!("Sources: {}", config.sources.len());
            for source in &config.sources {
                println!(
                    "  [{}] {} {}",
                    source.id,
                    source.name,
                    if source.enabled { "" } else { "(disabled)" }
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
