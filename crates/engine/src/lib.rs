//! A generation engine: one dimension's synthesizer, its mantle and the
//! cleaner keeping that mantle within the process-wide plate limit.

mod config;
mod engine;
mod error;
mod report;

pub use config::{
    BiomeConfig, DimensionConfig, EngineConfig, MantleConfig, PerformanceConfig, RegionConfig,
    MAX_DIMENSION_HEIGHT,
};
pub use engine::{area_positions, Engine, EngineMetrics, GeneratedChunk};
pub use error::EngineError;
pub use report::{
    MantleMetrics, MetricsReport, MetricsReportBuilder, MetricsSink, RunResult, TerrainMetrics,
};
