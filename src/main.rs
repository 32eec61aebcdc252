//! strata - column terrain synthesis with a self-pacing plate cache
//!
//! Generates a square of chunks from an engine config and reports how
//! synthesis and the mantle behaved.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strata_core::ChunkPos;
use strata_engine::{
    Engine, EngineConfig, GeneratedChunk, MantleMetrics, MetricsReportBuilder, MetricsSink,
    RunResult, TerrainMetrics,
};
use strata_mantle::{available_memory_mb, tectonic_limit_for, MB_PER_PLATE, MIN_TECTONIC_LIMIT};
use strata_world::{ChunkOutcome, NoiseSampler};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Column terrain synthesis with a self-pacing plate cache", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a square of chunks around a center chunk
    Generate {
        /// Engine config (TOML); defaults are used when it cannot be read
        #[arg(long)]
        config: Option<PathBuf>,
        /// Reject unreadable or invalid configs instead of using defaults
        #[arg(long)]
        strict: bool,
        /// Center chunk X
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        x: i32,
        /// Center chunk Z
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        z: i32,
        /// Chunks generated on each side of the center
        #[arg(long, default_value_t = 4)]
        radius: u32,
        /// Write a JSON metrics report here
        #[arg(long)]
        metrics: Option<PathBuf>,
        /// Keep the engine open this long so maintenance passes run
        #[arg(long, default_value_t = 0)]
        hold_secs: u64,
    },
    /// Print the plate limit derived from available memory
    Capacity {
        /// Size from this many MB instead of measuring
        #[arg(long)]
        memory_mb: Option<u64>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing with INFO level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting strata v{}", env!("CARGO_PKG_VERSION"));

    match Args::parse().command {
        Command::Generate {
            config,
            strict,
            x,
            z,
            radius,
            metrics,
            hold_secs,
        } => {
            let config = load_config(config.as_deref(), strict)?;
            generate(
                config,
                ChunkPos::new(x, z),
                radius,
                metrics.as_deref(),
                Duration::from_secs(hold_secs),
            )
        }
        Command::Capacity { memory_mb } => {
            capacity(memory_mb);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, strict: bool) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    if strict {
        let config = EngineConfig::from_path(path)
            .with_context(|| format!("failed to load engine config {}", path.display()))?;
        Ok(config)
    } else {
        Ok(EngineConfig::load_from_path(path))
    }
}

fn generate(
    config: EngineConfig,
    center: ChunkPos,
    radius: u32,
    metrics_path: Option<&Path>,
    hold: Duration,
) -> Result<()> {
    let sampler = Arc::new(NoiseSampler::new(config.seed));
    let engine = Engine::open(config, sampler, None).context("failed to open engine")?;

    let started = Instant::now();
    let chunks = engine
        .generate_area(center, radius)
        .with_context(|| format!("failed to generate area around {center}"))?;
    let gen_time = started.elapsed();
    let terrain = terrain_metrics(&chunks, gen_time);
    info!(
        chunks = terrain.chunks_generated,
        failed = terrain.chunks_failed,
        blocks = terrain.blocks_generated,
        chunks_per_second = terrain.chunks_per_second,
        "Generation finished"
    );

    if !hold.is_zero() {
        info!(seconds = hold.as_secs(), "Holding engine open for maintenance");
        thread::sleep(hold);
    }

    let snapshot = engine.metrics();
    let flushed = engine.close().context("failed to close engine")?;
    info!(flushed, resident = snapshot.mantle.resident, "Engine closed");

    if let Some(path) = metrics_path {
        let result = if terrain.chunks_generated == 0 {
            RunResult::Skip
        } else if terrain.chunks_failed > 0 {
            RunResult::Fail
        } else {
            RunResult::Pass
        };
        let report = MetricsReportBuilder::new(format!("{}_area", engine.name()))
            .result(result)
            .terrain(TerrainMetrics {
                avg_chunk_ms: snapshot.synth.avg_chunk_ms,
                max_chunk_ms: snapshot.synth.max_chunk_ms,
                ..terrain
            })
            .mantle(MantleMetrics::from_stats(snapshot.mantle, snapshot.tectonic_limit))
            .duration_seconds(started.elapsed().as_secs_f64())
            .build();
        MetricsSink::create(path)?.write(&report)?;
        info!(path = %path.display(), "Wrote metrics report");
    }
    Ok(())
}

fn terrain_metrics(chunks: &[GeneratedChunk], elapsed: Duration) -> TerrainMetrics {
    let mut metrics = TerrainMetrics {
        chunks_generated: chunks.len(),
        total_gen_time_ms: elapsed.as_secs_f64() * 1000.0,
        ..Default::default()
    };
    for chunk in chunks {
        metrics.blocks_generated += chunk.buffer.solid_count();
        match &chunk.outcome {
            ChunkOutcome::Complete {
                skipped_columns,
                merged_blocks,
            } => {
                metrics.columns_skipped += skipped_columns;
                metrics.merged_blocks += merged_blocks;
            }
            ChunkOutcome::Failed { .. } => metrics.chunks_failed += 1,
        }
    }
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        metrics.chunks_per_second = chunks.len() as f64 / seconds;
    }
    metrics
}

fn capacity(memory_mb: Option<u64>) {
    let (mb, measured) = match memory_mb {
        Some(mb) => (mb, false),
        None => match available_memory_mb() {
            Some(mb) => (mb, true),
            None => {
                println!("Available memory could not be measured");
                return;
            }
        },
    };
    println!(
        "{} MB {} -> tectonic limit {} ({} + {} MB per plate)",
        mb,
        if measured { "available" } else { "assumed" },
        tectonic_limit_for(mb),
        MIN_TECTONIC_LIMIT,
        MB_PER_PLATE
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_world::ChunkBuffer;

    #[test]
    fn args_parse_generate() {
        let args = Args::try_parse_from([
            "strata", "generate", "--radius", "2", "--x", "-3", "--metrics", "out.json",
        ])
        .unwrap();
        match args.command {
            Command::Generate {
                radius, x, z, metrics, ..
            } => {
                assert_eq!(radius, 2);
                assert_eq!(x, -3);
                assert_eq!(z, 0);
                assert_eq!(metrics, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn missing_config_uses_defaults_unless_strict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert_eq!(load_config(Some(&path), false).unwrap(), EngineConfig::default());
        assert!(load_config(Some(&path), true).is_err());
    }

    #[test]
    fn terrain_metrics_count_outcomes() {
        let pos = ChunkPos::new(0, 0);
        let mut solid = ChunkBuffer::new(pos, 4);
        solid.set(0, 0, 0, 1);
        let chunks = vec![
            GeneratedChunk {
                buffer: solid,
                outcome: ChunkOutcome::Complete {
                    skipped_columns: 3,
                    merged_blocks: 10,
                },
            },
            GeneratedChunk {
                buffer: ChunkBuffer::new(pos, 4),
                outcome: ChunkOutcome::Failed {
                    reason: "boom".into(),
                },
            },
        ];
        let metrics = terrain_metrics(&chunks, Duration::from_millis(500));
        assert_eq!(metrics.chunks_generated, 2);
        assert_eq!(metrics.chunks_failed, 1);
        assert_eq!(metrics.columns_skipped, 3);
        assert_eq!(metrics.merged_blocks, 10);
        assert_eq!(metrics.blocks_generated, 1);
        assert_eq!(metrics.chunks_per_second, 4.0);
    }
}
