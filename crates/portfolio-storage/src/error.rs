//! Store error taxonomy.

use portfolio_model::ValidationError;
use std::path::PathBuf;

/// Errors raised by a [`crate::StorageDriver`] or [`crate::BuildingStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be opened (missing directory, permissions, a log
    /// file that belongs to another building).
    #[error("storage unavailable at {}: {reason}", path.display())]
    Unavailable { path: PathBuf, reason: String },

    /// I/O failure on an open store.
    #[error("storage I/O failed during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A complete log frame failed its digest or could not be decoded.
    #[error("corrupt log frame in {} at offset {offset}: {reason}", path.display())]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("store for building {building_id} is closed")]
    Closed { building_id: String },

    #[error("store already connected to {}, refusing {}", current.display(), requested.display())]
    AlreadyConnected { current: PathBuf, requested: PathBuf },

    #[error("deadline exceeded during {op}")]
    DeadlineExceeded { op: &'static str },

    #[error("failed to encode log frame: {0}")]
    Encode(String),

    #[error("invalid floor plan: {0}")]
    InvalidFloorPlan(#[from] ValidationError),
}

impl StoreError {
    pub(crate) fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io { op, source }
    }

    /// True for failures that happen before a store is usable.
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Corrupt { .. } | Self::AlreadyConnected { .. }
        )
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}
