//! Metrics reports for engine runs.
//!
//! A report captures what one run produced and how the plate cache behaved
//! while producing it. Reports are exported as JSON so CI can track
//! regressions between runs.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use strata_mantle::MantleStats;

/// Top-level report of one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Run identifier
    pub run_name: String,

    /// Timestamp when metrics were collected (ISO 8601)
    pub timestamp: String,

    /// Overall result
    pub result: RunResult,

    /// Chunk generation metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terrain: Option<TerrainMetrics>,

    /// Plate cache metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mantle: Option<MantleMetrics>,

    /// Wall-clock duration of the run (seconds)
    pub duration_seconds: f64,
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    /// Every chunk completed
    Pass,
    /// At least one chunk failed
    Fail,
    /// Nothing was generated
    Skip,
}

/// Chunk generation throughput and outcome counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainMetrics {
    /// Chunks attempted
    pub chunks_generated: usize,

    /// Chunks reported as failed
    pub chunks_failed: usize,

    /// Columns skipped for lack of a height sample
    pub columns_skipped: usize,

    /// Non-air blocks written
    pub blocks_generated: usize,

    /// Blocks replaced by the merge pass
    pub merged_blocks: usize,

    /// Rolling average per chunk (milliseconds)
    pub avg_chunk_ms: f64,

    /// Slowest chunk in the rolling window (milliseconds)
    pub max_chunk_ms: f64,

    /// Total generation time (milliseconds)
    pub total_gen_time_ms: f64,

    /// Chunks per second throughput
    pub chunks_per_second: f64,
}

/// Plate cache counters at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MantleMetrics {
    /// Process-wide resident plate limit
    pub tectonic_limit: usize,

    /// Plates resident at the end
    pub resident: usize,

    /// Lookups served from memory
    pub hits: u64,

    /// Lookups that loaded a plate
    pub misses: u64,

    /// Sections dropped by trim passes
    pub trimmed_sections: u64,

    /// Plates unloaded
    pub unloaded: u64,

    /// Plates written to the store
    pub persisted: u64,
}

impl MantleMetrics {
    /// Capture cache counters together with the limit they were held to.
    pub fn from_stats(stats: MantleStats, tectonic_limit: usize) -> Self {
        Self {
            tectonic_limit,
            resident: stats.resident,
            hits: stats.hits,
            misses: stats.misses,
            trimmed_sections: stats.trimmed_sections,
            unloaded: stats.unloaded,
            persisted: stats.persisted,
        }
    }
}

/// Builder for constructing metrics reports
pub struct MetricsReportBuilder {
    report: MetricsReport,
}

impl MetricsReportBuilder {
    /// Create a new builder with run name
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            report: MetricsReport {
                run_name: run_name.into(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                result: RunResult::Pass,
                terrain: None,
                mantle: None,
                duration_seconds: 0.0,
            },
        }
    }

    /// Set run result
    pub fn result(mut self, result: RunResult) -> Self {
        self.report.result = result;
        self
    }

    /// Set terrain metrics
    pub fn terrain(mut self, metrics: TerrainMetrics) -> Self {
        self.report.terrain = Some(metrics);
        self
    }

    /// Set mantle metrics
    pub fn mantle(mut self, metrics: MantleMetrics) -> Self {
        self.report.mantle = Some(metrics);
        self
    }

    /// Set run duration
    pub fn duration_seconds(mut self, seconds: f64) -> Self {
        self.report.duration_seconds = seconds;
        self
    }

    /// Build the metrics report
    pub fn build(self) -> MetricsReport {
        self.report
    }
}

/// Sink for writing metrics reports to JSON files
pub struct MetricsSink {
    path: std::path::PathBuf,
}

impl MetricsSink {
    /// Create a new metrics sink at the specified path
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self { path })
    }

    /// Write metrics report to file
    pub fn write(&self, report: &MetricsReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_report_roundtrip() {
        let report = MetricsReportBuilder::new("area_generation")
            .result(RunResult::Pass)
            .terrain(TerrainMetrics {
                chunks_generated: 81,
                blocks_generated: 1_300_000,
                avg_chunk_ms: 2.5,
                chunks_per_second: 400.0,
                ..Default::default()
            })
            .mantle(MantleMetrics {
                tectonic_limit: 5,
                resident: 1,
                misses: 1,
                hits: 80,
                ..Default::default()
            })
            .duration_seconds(0.2)
            .build();

        let json = serde_json::to_string_pretty(&report).unwrap();
        let parsed: MetricsReport = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.run_name, "area_generation");
        assert_eq!(parsed.result, RunResult::Pass);
        assert_eq!(parsed.terrain.as_ref().unwrap().chunks_generated, 81);
        assert_eq!(parsed.mantle.unwrap().hits, 80);
    }

    #[test]
    fn metrics_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.json");

        let report = MetricsReportBuilder::new("sink_test")
            .result(RunResult::Fail)
            .build();

        let sink = MetricsSink::create(&path).unwrap();
        sink.write(&report).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("sink_test"));
        assert!(contents.contains("\"result\": \"fail\""));
        assert!(!contents.contains("\"terrain\""));
    }
}
