//! Error types for the spatial index.

use thiserror::Error;

/// Spatial index errors.
///
/// Both variants are raised while validating a replacement set, before the
/// index is touched, so the previous contents always survive them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpatialError {
    /// A center coordinate was NaN or infinite.
    #[error("non-finite coordinate on {kind} {id}")]
    NonFiniteCoordinate { kind: &'static str, id: String },

    /// Two items in one replacement set share an identity.
    #[error("duplicate {kind} id in index: {id}")]
    DuplicateId { kind: &'static str, id: String },
}

/// Result type for spatial operations.
pub type Result<T> = std::result::Result<T, SpatialError>;
