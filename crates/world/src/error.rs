use strata_core::ChunkPos;
use strata_mantle::MantleError;
use thiserror::Error;

/// Failures of the merge pass.
#[derive(Debug, Error)]
pub enum MergeError {
    /// No source registry was handed to the merger.
    #[error("merge sources are not initialized")]
    SourceUninitialized,
    /// The configured source world is not loaded.
    #[error("merge source world '{world}' is not available")]
    SourceUnavailable {
        /// Configured world name.
        world: String,
    },
    /// A generator was selected as merge source.
    #[error("merging from generator '{generator}' is not supported")]
    UnsupportedSource {
        /// Configured generator name.
        generator: String,
    },
    /// Merging is enabled but names no source.
    #[error("merge is enabled but no source world is configured")]
    MissingSource,
    /// The source could not produce the chunk.
    #[error("failed to fetch chunk {chunk} from merge source: {source:#}")]
    Fetch {
        /// Chunk being merged.
        chunk: ChunkPos,
        /// Cause reported by the source.
        #[source]
        source: anyhow::Error,
    },
    /// Reference heights could not be read from the mantle.
    #[error(transparent)]
    Mantle(#[from] MantleError),
}

impl MergeError {
    /// Whether this is a configuration problem that must reach the caller.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MergeError::SourceUninitialized
                | MergeError::SourceUnavailable { .. }
                | MergeError::UnsupportedSource { .. }
                | MergeError::MissingSource
        )
    }
}

/// Errors `synthesize_chunk` hands back instead of containing.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The merge pass is misconfigured.
    #[error("merge misconfigured while generating chunk {chunk}")]
    Merge {
        /// Chunk being generated.
        chunk: ChunkPos,
        /// Configuration failure.
        #[source]
        source: MergeError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_configuration_errors() {
        assert!(MergeError::MissingSource.is_configuration());
        assert!(MergeError::SourceUnavailable { world: "w".into() }.is_configuration());
        let fetch = MergeError::Fetch {
            chunk: ChunkPos::new(0, 0),
            source: anyhow::anyhow!("not generated"),
        };
        assert!(!fetch.is_configuration());
        assert!(fetch.to_string().contains("not generated"));
    }
}
