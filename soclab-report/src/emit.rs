//! CSV and JSON emission of derived tables
//!
//! Writers for the artifacts downstream tooling consumes: the annotated run
//! summary, the evaluation run metrics, the I²R corrected rows and the
//! fitted-parameter JSON. Headers match the documented schemas (the same row
//! structs the ingest side reads, where a schema round-trips).

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use soclab_core::power::PowerModelParams;
use soclab_core::qc::ScenarioRepeatability;
use soclab_core::types::RunSummary;
use soclab_fit::eval::RunMetrics;
use soclab_fit::i2r::I2rRun;

use crate::ingest::SummaryRow;
use crate::ReportResult;

/// Write the annotated run-summary table (`qc_run_summary` schema).
pub fn write_run_summaries<W: Write>(writer: W, runs: &[RunSummary]) -> ReportResult<()> {
    let mut w = csv::Writer::from_writer(writer);
    for run in runs {
        w.serialize(SummaryRow::from(run))?;
    }
    w.flush()?;
    Ok(())
}

/// Evaluation run-metrics row with documented headers.
#[derive(Debug, Clone, Serialize)]
struct EvalMetricsRow<'a> {
    split: &'a str,
    run_name: &'a str,
    scenario: &'a str,
    n_samples: usize,
    #[serde(rename = "p_meas_mean_mW")]
    p_meas_mean_mw: f64,
    #[serde(rename = "p_pred_mean_mW")]
    p_pred_mean_mw: f64,
    p_rel_err_pct: f64,
    rmse_soc_pct: f64,
}

/// Write the per-fold held-out run metrics (`eval_run_metrics` schema).
pub fn write_eval_run_metrics<W: Write>(writer: W, metrics: &[RunMetrics]) -> ReportResult<()> {
    let mut w = csv::Writer::from_writer(writer);
    for m in metrics {
        w.serialize(EvalMetricsRow {
            split: &m.split,
            run_name: &m.run_name,
            scenario: &m.scenario,
            n_samples: m.n_samples,
            p_meas_mean_mw: m.p_meas_mean_mw,
            p_pred_mean_mw: m.p_pred_mean_mw,
            p_rel_err_pct: m.p_rel_err_pct,
            rmse_soc_pct: m.rmse_soc_pct,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// I²R corrected-row record with documented headers.
#[derive(Debug, Clone, Serialize)]
struct I2rRow<'a> {
    run_name: &'a str,
    scenario: &'a str,
    #[serde(rename = "resid_mW")]
    resid_mw: f64,
    #[serde(rename = "p_loss_hat_W")]
    p_loss_w: f64,
    #[serde(rename = "p_pred_mean_mW_corr_i2r")]
    p_pred_corr_mw: f64,
    #[serde(rename = "resid_corr_mW")]
    resid_corr_mw: f64,
}

/// Write the run-level I²R correction table.
pub fn write_i2r_runs<W: Write>(writer: W, runs: &[I2rRun]) -> ReportResult<()> {
    let mut w = csv::Writer::from_writer(writer);
    for r in runs {
        w.serialize(I2rRow {
            run_name: &r.run_name,
            scenario: &r.scenario,
            resid_mw: r.resid_mw,
            p_loss_w: r.p_loss_w,
            p_pred_corr_mw: r.p_pred_corr_mw,
            resid_corr_mw: r.resid_corr_mw,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// Scenario repeatability record.
#[derive(Debug, Clone, Serialize)]
struct RepeatabilityRow<'a> {
    scenario: &'a str,
    n: usize,
    #[serde(rename = "p_mean_mW_mean")]
    power_mean_mw: f64,
    #[serde(rename = "p_mean_mW_std")]
    power_std_mw: f64,
    #[serde(rename = "p_mean_mW_cv")]
    cv: f64,
    #[serde(rename = "p_mean_mW_ratio_max_min")]
    ratio_max_min: f64,
}

/// Write the scenario repeatability table.
///
/// The header is written even when no scenario had enough runs, so consumers
/// can distinguish "no repeats collected" from a missing artifact.
pub fn write_repeatability<W: Write>(
    writer: W,
    rows: &[ScenarioRepeatability],
) -> ReportResult<()> {
    let mut w = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        w.write_record([
            "scenario",
            "n",
            "p_mean_mW_mean",
            "p_mean_mW_std",
            "p_mean_mW_cv",
            "p_mean_mW_ratio_max_min",
        ])?;
        w.flush()?;
        return Ok(());
    }
    for r in rows {
        w.serialize(RepeatabilityRow {
            scenario: &r.scenario,
            n: r.n,
            power_mean_mw: r.power_mean_mw,
            power_std_mw: r.power_std_mw,
            cv: r.cv,
            ratio_max_min: r.ratio_max_min,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// Write fitted power-model parameters as pretty JSON.
pub fn write_params_json<W: Write>(mut writer: W, params: &PowerModelParams) -> ReportResult<()> {
    serde_json::to_writer_pretty(&mut writer, params)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Create `path`'s parent directories and open it for writing.
pub fn create_file(path: &Path) -> ReportResult<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::File::create(path)?)
}

/// Write a rendered Markdown report to disk.
pub fn write_markdown(path: &Path, content: &str) -> ReportResult<PathBuf> {
    let mut f = create_file(path)?;
    f.write_all(content.as_bytes())?;
    Ok(path.to_path_buf())
}
