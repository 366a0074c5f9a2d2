//! End-to-end analysis pipeline
//!
//! ## Overview
//!
//! Wires the whole study together in the fixed stage order the artifacts
//! depend on:
//!
//! ```text
//! summaries ──► QC gate ──┐
//! samples ───► filter ────┴─► holdout evaluation ─► run-level join
//!                                                     │
//!                             I2R correction ◄────────┤
//!                             residual correction ◄───┘
//!                                      │
//!                             Markdown + CSV artifacts
//! ```
//!
//! QC-rejected runs are dropped from fitting and from reported metrics
//! whenever `use_only_qc_keep` is set (the default); the QC report still
//! lists them with their reasons. Every stage logs a one-line summary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use soclab_core::power::PowerModelParams;
use soclab_core::qc::{scenario_repeatability, QcPolicy, ScenarioRepeatability};
use soclab_core::types::{RunSeries, RunSummary};
use soclab_fit::eval::{evaluate, EvalOptions, EvalOutcome};
use soclab_fit::i2r::{fit_i2r_loso, I2rOptions, I2rOutcome};
use soclab_fit::power::fit_power_model;
use soclab_fit::residual::{
    residual_correction_loso, ResidualCorrectionOptions, ResidualCorrectionOutcome,
};
use soclab_fit::runlevel::RunLevelRow;

use crate::emit;
use crate::report;
use crate::ReportResult;

/// Full-pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// QC gating policy
    pub qc: QcPolicy,
    /// Holdout evaluation settings
    pub eval: EvalOptions,
    /// I²R correction settings
    pub i2r: I2rOptions,
    /// Residual correction settings
    pub residual: ResidualCorrectionOptions,
    /// Drop QC-rejected runs from fitting and reported metrics
    pub use_only_qc_keep: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            qc: QcPolicy::default(),
            eval: EvalOptions::default(),
            i2r: I2rOptions::default().with_use_only_qc_keep(true),
            residual: ResidualCorrectionOptions {
                use_only_qc_keep: true,
                ..ResidualCorrectionOptions::default()
            },
            use_only_qc_keep: true,
        }
    }
}

/// Rendered Markdown reports.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReports {
    /// QC verdicts and repeatability
    pub qc_md: String,
    /// Holdout evaluation
    pub eval_md: String,
    /// I²R correction
    pub i2r_md: String,
    /// Residual correction
    pub residual_md: String,
}

/// Everything the pipeline produces.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisArtifacts {
    /// Summaries with QC verdicts filled in
    pub summaries: Vec<RunSummary>,
    /// Scenario repeatability over the annotated summaries
    pub repeatability: Vec<ScenarioRepeatability>,
    /// Holdout evaluation outcome
    pub eval: EvalOutcome,
    /// Power model fitted on the full (QC-kept) fleet
    pub params: PowerModelParams,
    /// I²R correction outcome
    pub i2r: I2rOutcome,
    /// Residual correction outcome
    pub residual: ResidualCorrectionOutcome,
    /// Rendered reports
    pub reports: AnalysisReports,
}

/// Join held-out run metrics with their start-state summaries.
fn run_level_rows(
    eval: &EvalOutcome,
    summaries: &[RunSummary],
) -> Vec<RunLevelRow> {
    let by_key: BTreeMap<(&str, &str), &RunSummary> = summaries
        .iter()
        .map(|s| ((s.run_name.as_str(), s.scenario.as_str()), s))
        .collect();

    let mut rows = Vec::new();
    for m in &eval.run_metrics {
        match by_key.get(&(m.run_name.as_str(), m.scenario.as_str())) {
            Some(summary) => rows.push(RunLevelRow {
                summary: (*summary).clone(),
                p_meas_mean_mw: Some(m.p_meas_mean_mw).filter(|v| v.is_finite()),
                p_pred_mean_mw: Some(m.p_pred_mean_mw).filter(|v| v.is_finite()),
            }),
            None => log::warn!(
                "pipeline: no summary row for held-out run {} ({})",
                m.run_name,
                m.scenario
            ),
        }
    }
    rows
}

/// Run the full analysis.
pub fn run_analysis(
    runs: &[RunSeries],
    mut summaries: Vec<RunSummary>,
    config: &AnalysisConfig,
) -> ReportResult<AnalysisArtifacts> {
    // Stage 1: QC gate.
    config.qc.apply(&mut summaries);
    let kept: std::collections::BTreeSet<&str> = summaries
        .iter()
        .filter(|s| s.qc_keep)
        .map(|s| s.run_name.as_str())
        .collect();

    let fleet: Vec<RunSeries> = runs
        .iter()
        .filter(|r| !config.use_only_qc_keep || kept.contains(r.run_name.as_str()))
        .cloned()
        .collect();
    log::info!(
        "pipeline: {} of {} runs enter fitting",
        fleet.len(),
        runs.len()
    );

    // Stage 2: holdout evaluation and the full-fleet parameter artifact.
    let eval = evaluate(&fleet, &config.eval)?;
    let full_fit = fit_power_model(&fleet, &config.eval.calibration)?;
    log::info!(
        "pipeline: {} folds, {} held-out run rows",
        eval.summaries.len(),
        eval.run_metrics.len()
    );

    // Stage 3: run-level corrections on the joined rows.
    let rows = run_level_rows(&eval, &summaries);
    let i2r = fit_i2r_loso(&rows, &config.i2r)?;
    let residual = residual_correction_loso(&rows, &config.residual)?;

    // Stage 4: repeatability and reports.
    let repeatability = scenario_repeatability(&summaries);
    let reports = AnalysisReports {
        qc_md: report::qc_report(&summaries, &repeatability),
        eval_md: report::eval_report(&eval),
        i2r_md: report::i2r_report(&i2r, &config.i2r),
        residual_md: report::residual_report(&residual),
    };

    Ok(AnalysisArtifacts {
        summaries,
        repeatability,
        eval,
        params: full_fit.params,
        i2r,
        residual,
        reports,
    })
}

/// Write every artifact under `dir`, returning the created paths.
pub fn write_artifacts(artifacts: &AnalysisArtifacts, dir: &Path) -> ReportResult<Vec<PathBuf>> {
    let mut paths = Vec::new();

    let qc_csv = dir.join("qc_run_summary.csv");
    emit::write_run_summaries(emit::create_file(&qc_csv)?, &artifacts.summaries)?;
    paths.push(qc_csv);

    let rep_csv = dir.join("qc_scenario_repeatability.csv");
    emit::write_repeatability(emit::create_file(&rep_csv)?, &artifacts.repeatability)?;
    paths.push(rep_csv);

    let eval_csv = dir.join("eval_run_metrics.csv");
    emit::write_eval_run_metrics(emit::create_file(&eval_csv)?, &artifacts.eval.run_metrics)?;
    paths.push(eval_csv);

    let i2r_csv = dir.join("run_level_i2r_correction.csv");
    emit::write_i2r_runs(emit::create_file(&i2r_csv)?, &artifacts.i2r.runs)?;
    paths.push(i2r_csv);

    let params_json = dir.join("model_params.json");
    emit::write_params_json(emit::create_file(&params_json)?, &artifacts.params)?;
    paths.push(params_json);

    paths.push(emit::write_markdown(&dir.join("qc_report.md"), &artifacts.reports.qc_md)?);
    paths.push(emit::write_markdown(&dir.join("eval_report.md"), &artifacts.reports.eval_md)?);
    paths.push(emit::write_markdown(&dir.join("i2r_correction.md"), &artifacts.reports.i2r_md)?);
    paths.push(emit::write_markdown(
        &dir.join("residual_correction.md"),
        &artifacts.reports.residual_md,
    )?);

    log::info!("pipeline: wrote {} artifacts under {}", paths.len(), dir.display());
    Ok(paths)
}
