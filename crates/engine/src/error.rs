use std::path::PathBuf;

use strata_mantle::MantleError;
use strata_world::{MergeError, SynthError};
use thiserror::Error;

/// Errors surfaced to whoever drives an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The config file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        /// File that was read.
        path: PathBuf,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`crate::EngineConfig`].
    #[error("failed to parse config {}: {source}", path.display())]
    ConfigParse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser cause.
        #[source]
        source: toml::de::Error,
    },
    /// A config value is out of range.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
    /// The engine was closed.
    #[error("engine '{0}' is closed")]
    Closed(String),
    /// Merge settings cannot work.
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// A chunk hit a merge configuration error.
    #[error(transparent)]
    Synth(#[from] SynthError),
    /// The plate cache or its store failed.
    #[error(transparent)]
    Mantle(#[from] MantleError),
    /// The plate directory could not be opened.
    #[error("failed to open plate store: {0:#}")]
    Store(#[source] anyhow::Error),
    /// The generation worker pool could not be started.
    #[error("failed to start generation workers: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),
}
