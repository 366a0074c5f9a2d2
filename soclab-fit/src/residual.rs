//! Run-level residual correction against start-state covariates
//!
//! A cheap complement to the I²R term: regress the out-of-fold residual
//! directly on the run's start state (SOC, voltage, temperatures) with a
//! small ridge, trained LOSO by scenario and applied to the held-out
//! scenario. Whatever systematic start-state effect the base model missed is
//! absorbed without claiming a physical mechanism - useful triage for
//! deciding whether more collection is needed.

use serde::{Deserialize, Serialize};

use soclab_core::metrics::{scenario_stats, ResidualStats, ScenarioStats};

use crate::linalg::{ridge, DesignMatrix};
use crate::runlevel::{filter_qc, Covariate, RunLevelRow};
use crate::FitResult;

/// Residual-correction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualCorrectionOptions {
    /// Ridge regularization strength
    pub alpha: f64,
    /// Covariates entering the design (intercept is implicit)
    pub covariates: Vec<Covariate>,
    /// Restrict to QC-kept runs
    pub use_only_qc_keep: bool,
}

impl Default for ResidualCorrectionOptions {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            covariates: Covariate::default_set(),
            use_only_qc_keep: false,
        }
    }
}

/// One run's corrected residual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedRun {
    /// Run identifier
    pub run_name: String,
    /// Its scenario
    pub scenario: String,
    /// Base residual, milliwatts
    pub resid_mw: f64,
    /// Predicted residual from the covariate model, milliwatts
    pub resid_hat_mw: f64,
    /// Residual after subtracting the prediction, milliwatts
    pub resid_corr_mw: f64,
}

/// Per-fold coefficient record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionFold {
    /// Held-out scenario
    pub held_out_scenario: String,
    /// Training rows used
    pub n_train: usize,
    /// Coefficients: intercept first, then the covariates in order
    pub beta: Vec<f64>,
}

/// Residual-correction outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualCorrectionOutcome {
    /// Per-run corrected rows
    pub runs: Vec<CorrectedRun>,
    /// Folds that had enough data to fit
    pub folds: Vec<CorrectionFold>,
    /// Error summary before correction
    pub base: ResidualStats,
    /// Error summary after correction
    pub corrected: ResidualStats,
    /// Per-scenario summary before correction, worst RMSE first
    pub scenario_base: Vec<ScenarioStats>,
    /// Per-scenario summary after correction, worst RMSE first
    pub scenario_corrected: Vec<ScenarioStats>,
}

/// Fit and apply the LOSO residual correction.
pub fn residual_correction_loso(
    rows: &[RunLevelRow],
    options: &ResidualCorrectionOptions,
) -> FitResult<ResidualCorrectionOutcome> {
    let rows = filter_qc(rows, options.use_only_qc_keep);
    let p = 1 + options.covariates.len();

    // Complete design rows only: finite residual and every covariate present.
    let design_of = |row: &RunLevelRow| -> Option<(Vec<f64>, f64)> {
        let resid = row.resid_mw()?;
        let mut x = Vec::with_capacity(p);
        x.push(1.0);
        for cov in &options.covariates {
            x.push(cov.extract(&row.summary)?);
        }
        Some((x, resid))
    };

    let mut scenarios: Vec<String> = rows.iter().map(|r| r.summary.scenario.clone()).collect();
    scenarios.sort();
    scenarios.dedup();

    let mut resid_hat = vec![0.0_f64; rows.len()];
    let mut folds = Vec::new();

    for scenario in &scenarios {
        let mut x = DesignMatrix::new(p);
        let mut y = Vec::new();
        for row in rows.iter().filter(|r| r.summary.scenario != *scenario) {
            if let Some((xr, yr)) = design_of(row) {
                x.push_row(&xr);
                y.push(yr);
            }
        }

        if y.len() < p + 1 {
            // Not enough training data: leave the held-out residual as-is.
            log::debug!("residual correction: skipping fold {scenario} ({} rows)", y.len());
            continue;
        }

        let beta = ridge(&x, &y, options.alpha)?;
        for (i, row) in rows.iter().enumerate() {
            if row.summary.scenario == *scenario {
                if let Some((xr, _)) = design_of(row) {
                    resid_hat[i] = xr.iter().zip(&beta).map(|(a, b)| a * b).sum();
                }
            }
        }
        folds.push(CorrectionFold {
            held_out_scenario: scenario.clone(),
            n_train: y.len(),
            beta,
        });
    }

    let mut out_runs = Vec::with_capacity(rows.len());
    let mut resid_base = Vec::new();
    let mut resid_corr = Vec::new();
    let mut scenario_labels = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let base = row.resid_mw().unwrap_or(f64::NAN);
        let corr = base - resid_hat[i];
        out_runs.push(CorrectedRun {
            run_name: row.summary.run_name.clone(),
            scenario: row.summary.scenario.clone(),
            resid_mw: base,
            resid_hat_mw: resid_hat[i],
            resid_corr_mw: corr,
        });
        resid_base.push(base);
        resid_corr.push(corr);
        scenario_labels.push(row.summary.scenario.clone());
    }

    Ok(ResidualCorrectionOutcome {
        base: ResidualStats::from_residuals(&resid_base),
        corrected: ResidualStats::from_residuals(&resid_corr),
        scenario_base: scenario_stats(&scenario_labels, &resid_base),
        scenario_corrected: scenario_stats(&scenario_labels, &resid_corr),
        runs: out_runs,
        folds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use soclab_core::types::RunSummary;

    /// Residuals that depend linearly on start temperature.
    fn fleet(slope_per_c: f64) -> Vec<RunLevelRow> {
        let mut rows = Vec::new();
        for (si, scenario) in ["A", "B", "C", "D"].iter().enumerate() {
            for ri in 0..5 {
                let t_cpu = 30.0 + 2.0 * ri as f64 + si as f64;
                let resid = slope_per_c * (t_cpu - 35.0);
                rows.push(RunLevelRow {
                    summary: RunSummary {
                        run_name: format!("{scenario}{ri}"),
                        scenario: scenario.to_string(),
                        battery_level0_pct: Some(80.0 - ri as f64),
                        battery_voltage0_mv: Some(4000.0 + 10.0 * ri as f64),
                        thermal_cpu0_c: Some(t_cpu),
                        thermal_batt0_c: Some(t_cpu - 6.0),
                        qc_keep: true,
                        ..RunSummary::default()
                    },
                    p_meas_mean_mw: Some(800.0 + resid),
                    p_pred_mean_mw: Some(800.0),
                });
            }
        }
        rows
    }

    #[test]
    fn linear_start_state_effect_is_absorbed() {
        let rows = fleet(12.0);
        let out = residual_correction_loso(&rows, &ResidualCorrectionOptions::default()).unwrap();
        assert_eq!(out.folds.len(), 4);
        assert!(out.corrected.rmse_mw < out.base.rmse_mw / 3.0);
    }

    #[test]
    fn no_effect_means_no_harm() {
        let rows = fleet(0.0);
        let out = residual_correction_loso(&rows, &ResidualCorrectionOptions::default()).unwrap();
        // All residuals are exactly zero; corrected stays ~zero.
        assert!(out.corrected.rmse_mw < 1e-6);
    }

    #[test]
    fn sparse_folds_leave_residuals_untouched() {
        let rows: Vec<RunLevelRow> = fleet(10.0).into_iter().take(6).collect(); // A*5 + B0
        let out = residual_correction_loso(&rows, &ResidualCorrectionOptions::default()).unwrap();
        // Holding out scenario A leaves a single training row: fold skipped,
        // so scenario A residuals pass through uncorrected.
        let a_rows: Vec<_> = out.runs.iter().filter(|r| r.scenario == "A").collect();
        assert!(a_rows.iter().all(|r| r.resid_hat_mw == 0.0));
        assert!(a_rows.iter().all(|r| r.resid_corr_mw == r.resid_mw));
    }

    #[test]
    fn missing_covariate_rows_are_not_fitted() {
        let mut rows = fleet(10.0);
        rows[2].summary.thermal_cpu0_c = None;
        let out = residual_correction_loso(&rows, &ResidualCorrectionOptions::default()).unwrap();
        // The row still appears in the output with zero correction.
        assert_eq!(out.runs.len(), rows.len());
        assert_eq!(out.runs[2].resid_hat_mw, 0.0);
    }

    #[test]
    fn scenario_tables_are_sorted_worst_first() {
        let rows = fleet(12.0);
        let out = residual_correction_loso(&rows, &ResidualCorrectionOptions::default()).unwrap();
        for w in out.scenario_base.windows(2) {
            assert!(w[0].stats.rmse_mw >= w[1].stats.rmse_mw);
        }
    }
}
