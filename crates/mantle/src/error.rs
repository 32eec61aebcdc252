use strata_core::PlateCoord;
use thiserror::Error;

/// Failures surfaced by the plate cache and its backing stores.
#[derive(Debug, Error)]
pub enum MantleError {
    /// The backing store could not read or write a plate.
    #[error("plate store failed for plate {coord}: {source:#}")]
    Store {
        /// Plate being loaded or persisted.
        coord: PlateCoord,
        /// Underlying I/O or format error.
        #[source]
        source: anyhow::Error,
    },
    /// A stored payload does not describe a valid plate.
    #[error("invalid payload for plate {coord}: {reason}")]
    InvalidPayload {
        /// Plate being decoded.
        coord: PlateCoord,
        /// What was wrong with it.
        reason: String,
    },
    /// A maintenance pass panicked.
    #[error("mantle maintenance panicked: {0}")]
    Panicked(String),
}

impl MantleError {
    pub(crate) fn store(coord: PlateCoord, source: anyhow::Error) -> Self {
        Self::Store { coord, source }
    }
}
