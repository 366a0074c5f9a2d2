//! Error types for the model layer
//!
//! The model layer is mostly total: gap filling, clamping and documented
//! fallback parameters absorb bad telemetry instead of failing. The few
//! genuinely unanswerable requests (integrating an empty run, mismatched
//! column lengths) surface here. QC rejection is deliberately *not* an error
//! - a rejected run is a recorded verdict, see [`crate::qc`].

use thiserror::Error;

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors from the model layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Operation needs at least one sample
    #[error("run `{run_name}` has no samples")]
    EmptyRun {
        /// The offending run
        run_name: String,
    },

    /// Parallel columns disagree in length
    #[error("column length mismatch: {left} vs {right}")]
    ColumnMismatch {
        /// Length of the first column
        left: usize,
        /// Length of the second column
        right: usize,
    },

    /// A parameter that must be finite was not
    #[error("non-finite parameter: {name}")]
    NonFiniteParam {
        /// Which parameter
        name: &'static str,
    },
}
