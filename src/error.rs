//! Error taxonomy for the registration core.
//!
//! Internal routines return [`Result<T>`]; the top-level driver
//! ([`crate::demons::register`]) collapses every fatal variant to `None`
//! after logging it, matching the "Option-like" public contract described
//! for this crate.

use thiserror::Error;

/// Fatal and non-fatal failure modes surfaced by this crate's components.
///
/// `DegenerateHistogram` and `NoUsableSamples` are recoverable: callers
/// that encounter them fall back to a documented default (source
/// unchanged, MSE of zero) rather than aborting. Every other variant is
/// fatal and propagates to the driver's `None` result.
#[derive(Debug, Error, PartialEq)]
pub enum RegistrationError {
    /// Moving or fixed input has zero slices, rows, or columns.
    #[error("empty input volume: {0}")]
    EmptyInput(String),

    /// Buffer marshalling or field write-back found inconsistent
    /// dimensions.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Non-rectilinear grid, non-orthonormal in-plane basis, or
    /// non-positive spacing.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Non-finite sigma, negative kernel radius, out-of-range outlier
    /// fraction, or non-finite convergence threshold.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Direct index outside the buffer's bounds.
    #[error("index ({slice}, {row}, {col}, {channel}) out of bounds for shape ({n_slices}, {n_rows}, {n_cols}, {n_channels})")]
    OutOfBounds {
        slice: i64,
        row: i64,
        col: i64,
        channel: i64,
        n_slices: i64,
        n_rows: i64,
        n_cols: i64,
        n_channels: i64,
    },

    /// Constant intensities or an all-non-finite range made histogram
    /// matching impossible; recovered by returning the source unchanged.
    #[error("degenerate histogram: {0}")]
    DegenerateHistogram(String),

    /// No finite voxel overlap between two volumes; recovered by
    /// reporting MSE as zero.
    #[error("no usable samples: {0}")]
    NoUsableSamples(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RegistrationError>;
