//! Core battery SOC/power models for SocLab
//!
//! Owns the physics side of the pipeline: the power decomposition model, the
//! lumped thermal models that feed its leak term, the SOC ordinary
//! differential equation with time-to-empty, the internal-resistance loss
//! surface, and run-level QC gating. Estimation of all parameters lives in
//! `soclab-fit`; file I/O and reporting in `soclab-report`.
//!
//! ```no_run
//! use soclab_core::{QcPolicy, RunSummary};
//!
//! let policy = QcPolicy::default();
//! let verdict = policy.evaluate(&RunSummary::default());
//! assert!(verdict.keep); // missing covariates never reject
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod metrics;
pub mod power;
pub mod qc;
pub mod resistance;
pub mod series;
pub mod soc;
pub mod thermal;
pub mod types;

// Public API
pub use errors::{ModelError, ModelResult};
pub use metrics::{pearson, ResidualStats, ScenarioStats};
pub use power::{PowerBreakdown, PowerModelParams};
pub use qc::{QcPolicy, QcVerdict};
pub use resistance::{RintModel, RintParams};
pub use soc::SocTrajectory;
pub use thermal::{ThermalModel, ThermalParams1, ThermalParams2, ThermalTrajectory};
pub use types::{RunSeries, RunSummary, Sample};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
