//! CSV ingestion, Markdown reporting and the end-to-end pipeline for SocLab
//!
//! The I/O shell around `soclab-core` and `soclab-fit`: readers for the two
//! documented CSV schemas, writers for the derived tables and parameter JSON,
//! Markdown report rendering, and [`pipeline::run_analysis`] gluing the
//! stages together.
//!
//! ```no_run
//! use soclab_report::{ingest, pipeline};
//!
//! # fn main() -> Result<(), soclab_report::ReportError> {
//! let runs = ingest::read_model_input_path("all_runs_model_input.csv".as_ref())?;
//! let summaries = ingest::read_run_summaries_path("run_summaries.csv".as_ref())?;
//! let artifacts =
//!     pipeline::run_analysis(&runs, summaries, &pipeline::AnalysisConfig::default())?;
//! pipeline::write_artifacts(&artifacts, "artifacts/analysis".as_ref())?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

pub mod emit;
pub mod ingest;
pub mod pipeline;
pub mod report;

pub use ingest::{read_model_input, read_run_summaries};
pub use pipeline::{run_analysis, write_artifacts, AnalysisArtifacts, AnalysisConfig};

/// Result type for ingestion and reporting operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors from the ingestion/reporting layer
#[derive(Error, Debug)]
pub enum ReportError {
    /// Filesystem failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV input
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An input table held no rows
    #[error("empty input: {0}")]
    Empty(&'static str),

    /// Error bubbled up from the fitting layer
    #[error(transparent)]
    Fit(#[from] soclab_fit::FitError),

    /// Error bubbled up from the model layer
    #[error(transparent)]
    Model(#[from] soclab_core::ModelError),
}

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
