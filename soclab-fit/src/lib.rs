//! Calibration engine for SocLab
//!
//! Estimates everything `soclab-core` models: per-run thermal parameters, the
//! power decomposition coefficients, the I²R internal-resistance surface, and
//! the run-level corrections - plus the holdout harness that judges whether
//! any of it generalizes.
//!
//! The solvers are deliberately small and closed-form: every regression here
//! has a handful of columns, so normal equations with Cholesky (and Huber
//! IRLS on top for the robust paths) cover the whole crate without a linear
//! algebra dependency.
//!
//! Modules:
//! - [`linalg`] / [`huber`] - the solvers
//! - [`thermal`] / [`power`] - per-run and fleet calibration
//! - [`eval`] - brightness-holdout / LOORO / LOSO evaluation
//! - [`i2r`] / [`residual`] / [`ancova`] - run-level corrections and triage
//! - [`runlevel`] - the joined run-level row the corrections share

#![deny(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

pub mod ancova;
pub mod eval;
pub mod huber;
pub mod i2r;
pub mod linalg;
pub mod power;
pub mod residual;
pub mod runlevel;
pub mod thermal;

pub use ancova::{covariate_adjusted_means, AncovaOptions, AncovaOutcome};
pub use eval::{evaluate, EvalMode, EvalOptions, EvalOutcome, FoldSummary, RunMetrics};
pub use huber::{fit_huber_irls, fit_huber_irls_with_ridge, HuberConfig};
pub use i2r::{fit_i2r_loso, I2rOptions, I2rOutcome};
pub use linalg::{ridge, DesignMatrix};
pub use power::{fit_power_model, predict_power, Calibration, CalibrationOptions};
pub use residual::{residual_correction_loso, ResidualCorrectionOptions, ResidualCorrectionOutcome};
pub use runlevel::{Covariate, RunLevelRow};
pub use thermal::{fit_thermal_1state, fit_thermal_2state};

/// Result type for fitting operations
pub type FitResult<T> = Result<T, FitError>;

/// Errors from the fitting layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Fewer usable rows than the design needs
    #[error("not enough rows to fit: needed {needed}, got {got}")]
    NotEnoughRows {
        /// Minimum usable rows
        needed: usize,
        /// Rows actually available
        got: usize,
    },

    /// The normal equations are numerically singular
    #[error("singular system (collinear design without regularization)")]
    Singular,

    /// Mismatched dimensions between design, response or weights
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// First dimension
        left: usize,
        /// Second dimension
        right: usize,
    },

    /// A configuration value that must be finite was not
    #[error("non-finite value: {0}")]
    NonFinite(&'static str),

    /// Error bubbled up from the model layer
    #[error(transparent)]
    Model(#[from] soclab_core::ModelError),
}

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
