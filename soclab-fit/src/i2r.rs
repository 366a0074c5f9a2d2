//! I²R internal-resistance loss fitting under LOSO
//!
//! ## Overview
//!
//! After the base model is evaluated out-of-fold, a systematic positive
//! residual that grows with discharge current is the signature of Joule loss
//! inside the cell. This stage tests that hypothesis at run level:
//!
//! ```text
//! resid_W+  ~  I^2 * [1, (1-SOC), max(0, T_cpu - T_ref)] * beta
//! ```
//!
//! - the target is the *positive part* of the base residual (a resistance
//!   cannot explain over-prediction),
//! - fitted per LOSO fold over scenarios so the correction is judged on
//!   scenarios it never saw,
//! - coefficients clamped non-negative after the ridge solve (physical
//!   resistances),
//! - an optional non-negative scale `s`, least-squares-fitted on the fold's
//!   *unclipped* training residuals, damps double-counting when the base
//!   model already absorbed part of the effect.
//!
//! The verdict is read off two tables: the error summary before/after the
//! correction, and the Pearson correlation of residuals against start-state
//! covariates - a real I²R effect pulls the current and temperature
//! correlations toward zero.

use serde::{Deserialize, Serialize};

use soclab_core::metrics::{pearson, ResidualStats};
use soclab_core::resistance::{RintModel, RintParams, DEFAULT_TREF_C};

use crate::linalg::{ridge, DesignMatrix};
use crate::runlevel::{filter_qc, RunLevelRow};
use crate::FitResult;

/// Threshold below which a squared current is treated as "no discharge data".
const MIN_I2_A2: f64 = 1e-8;

/// I²R fitting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct I2rOptions {
    /// Resistance parameterization
    pub model: RintModel,
    /// Reference temperature for the thermal term, Celsius
    pub tref_c: f64,
    /// Ridge strength for the per-fold solve
    pub ridge: f64,
    /// Fit the per-fold non-negative scale
    pub fit_scale: bool,
    /// Restrict to QC-kept runs
    pub use_only_qc_keep: bool,
}

impl Default for I2rOptions {
    fn default() -> Self {
        Self {
            model: RintModel::default(),
            tref_c: DEFAULT_TREF_C,
            ridge: 1e-6,
            fit_scale: false,
            use_only_qc_keep: false,
        }
    }
}

impl I2rOptions {
    /// Select the resistance parameterization.
    pub fn with_model(mut self, model: RintModel) -> Self {
        self.model = model;
        self
    }

    /// Enable the per-fold scale fit.
    pub fn with_fit_scale(mut self, on: bool) -> Self {
        self.fit_scale = on;
        self
    }

    /// Restrict fitting and reporting to QC-kept runs.
    pub fn with_use_only_qc_keep(mut self, on: bool) -> Self {
        self.use_only_qc_keep = on;
        self
    }
}

/// Fitted parameters for one held-out scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct I2rFold {
    /// Scenario held out while these parameters were fitted
    pub held_out_scenario: String,
    /// Training rows behind the fit
    pub n_train: usize,
    /// The fitted resistance surface (non-negative by construction)
    pub params: RintParams,
}

/// One run's corrected prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct I2rRun {
    /// Run identifier
    pub run_name: String,
    /// Its scenario
    pub scenario: String,
    /// Base residual, milliwatts (NaN when a mean is missing)
    pub resid_mw: f64,
    /// Predicted loss, watts (NaN when the run carried no usable current)
    pub p_loss_w: f64,
    /// Corrected predicted mean power, milliwatts
    pub p_pred_corr_mw: f64,
    /// Residual after correction, milliwatts
    pub resid_corr_mw: f64,
}

/// Correlation of residuals against one covariate, before and after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateCorrelation {
    /// Covariate column name
    pub covariate: String,
    /// Pearson r against the base residual
    pub r_before: f64,
    /// Pearson r against the corrected residual
    pub r_after: f64,
}

/// Full I²R outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct I2rOutcome {
    /// Per-fold fitted parameters (folds with enough training rows)
    pub folds: Vec<I2rFold>,
    /// Per-run corrected rows
    pub runs: Vec<I2rRun>,
    /// Error summary before the correction
    pub base: ResidualStats,
    /// Error summary after the correction
    pub corrected: ResidualStats,
    /// Residual correlations against start-state covariates
    pub correlations: Vec<CovariateCorrelation>,
}

impl I2rOutcome {
    /// True when every fold's coefficients and scale are non-negative.
    pub fn all_folds_physical(&self) -> bool {
        self.folds.iter().all(|f| f.params.is_physical())
    }
}

/// Per-row regression inputs, extracted once.
struct Row {
    resid_mw: f64,
    i2_a2: f64,
    soc_frac: f64,
    t_cpu_c: f64,
    usable: bool,
}

fn extract(row: &RunLevelRow, model: RintModel) -> Row {
    let resid = row.resid_mw().unwrap_or(f64::NAN);
    let i2 = row
        .summary
        .trace_current_mean_a()
        .map(|i| i * i)
        .unwrap_or(f64::NAN);
    let soc = row.summary.battery_level0_frac().unwrap_or(f64::NAN);
    let t = row.summary.thermal_cpu0_c.unwrap_or(f64::NAN);

    // The fold design needs every feature the model touches to be finite.
    let mut usable = resid.is_finite() && i2.is_finite() && i2 > MIN_I2_A2;
    if matches!(model, RintModel::R0Rsoc | RintModel::R0RsocRtpos) {
        usable &= soc.is_finite();
    }
    if matches!(model, RintModel::R0RsocRtpos) {
        usable &= t.is_finite();
    }
    Row {
        resid_mw: resid,
        i2_a2: i2,
        soc_frac: soc,
        t_cpu_c: t,
        usable,
    }
}

/// Fit the I²R correction per LOSO fold and apply it out-of-fold.
pub fn fit_i2r_loso(rows: &[RunLevelRow], options: &I2rOptions) -> FitResult<I2rOutcome> {
    let rows = filter_qc(rows, options.use_only_qc_keep);
    let extracted: Vec<Row> = rows.iter().map(|r| extract(r, options.model)).collect();

    let mut scenarios: Vec<String> = rows
        .iter()
        .zip(&extracted)
        .filter(|(_, e)| e.usable)
        .map(|(r, _)| r.summary.scenario.clone())
        .collect();
    scenarios.sort();
    scenarios.dedup();

    let p = options.model.num_params();
    let design_row = |e: &Row| -> Vec<f64> {
        options
            .model
            .features(e.soc_frac, e.t_cpu_c, options.tref_c)
            .iter()
            .map(|f| f * e.i2_a2)
            .collect()
    };

    let mut p_loss_w = vec![f64::NAN; rows.len()];
    let mut folds = Vec::new();

    for scenario in &scenarios {
        let in_test =
            |i: usize| extracted[i].usable && rows[i].summary.scenario == *scenario;
        let in_train =
            |i: usize| extracted[i].usable && rows[i].summary.scenario != *scenario;

        let mut x = DesignMatrix::new(p);
        let mut y = Vec::new();
        let mut resid_train = Vec::new();
        for i in 0..rows.len() {
            if in_train(i) {
                x.push_row(&design_row(&extracted[i]));
                // A resistance only adds power: regress on the positive part.
                y.push((extracted[i].resid_mw / 1000.0).max(0.0));
                resid_train.push(extracted[i].resid_mw / 1000.0);
            }
        }

        if y.len() < p + 1 {
            // Too little data to say anything: predict zero loss out-of-fold.
            log::debug!("i2r: fold {scenario} has {} rows, predicting zero loss", y.len());
            for i in 0..rows.len() {
                if in_test(i) {
                    p_loss_w[i] = 0.0;
                }
            }
            continue;
        }

        let beta: Vec<f64> = ridge(&x, &y, options.ridge)?
            .into_iter()
            .map(|b| b.max(0.0))
            .collect();

        // Optional scaling against the unclipped training residuals:
        // s = argmin ||resid - s*yhat||^2 over s >= 0.
        let mut scale = 1.0;
        if options.fit_scale {
            let yhat = x.matvec(&beta)?;
            let den: f64 = yhat.iter().map(|v| v * v).sum();
            if den > 0.0 {
                let num: f64 = yhat.iter().zip(&resid_train).map(|(a, b)| a * b).sum();
                scale = (num / den).max(0.0);
            }
        }

        let params = RintParams {
            model: options.model,
            coeffs: beta,
            tref_c: options.tref_c,
            scale,
        };

        for i in 0..rows.len() {
            if in_test(i) {
                let e = &extracted[i];
                let loss = params.p_loss_w(e.i2_a2.sqrt(), e.soc_frac, e.t_cpu_c);
                p_loss_w[i] = loss;
            }
        }

        folds.push(I2rFold {
            held_out_scenario: scenario.clone(),
            n_train: y.len(),
            params,
        });
    }

    // Corrected rows and summaries.
    let mut out_rows = Vec::with_capacity(rows.len());
    let mut resid_base = Vec::new();
    let mut resid_corr = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let e = &extracted[i];
        let p_pred = row.p_pred_mean_mw.unwrap_or(f64::NAN);
        let p_pred_corr = p_pred + 1000.0 * p_loss_w[i];
        let r_corr = row.p_meas_mean_mw.unwrap_or(f64::NAN) - p_pred_corr;
        out_rows.push(I2rRun {
            run_name: row.summary.run_name.clone(),
            scenario: row.summary.scenario.clone(),
            resid_mw: e.resid_mw,
            p_loss_w: p_loss_w[i],
            p_pred_corr_mw: p_pred_corr,
            resid_corr_mw: r_corr,
        });
        resid_base.push(e.resid_mw);
        resid_corr.push(r_corr);
    }

    let correlations = [
        (
            "thermal_cpu0_C",
            rows.iter()
                .map(|r| r.summary.thermal_cpu0_c.unwrap_or(f64::NAN))
                .collect::<Vec<_>>(),
        ),
        (
            "battery_level0_pct",
            rows.iter()
                .map(|r| r.summary.battery_level0_pct.unwrap_or(f64::NAN))
                .collect::<Vec<_>>(),
        ),
        (
            "trace_voltage_mean_V",
            rows.iter()
                .map(|r| r.summary.trace_voltage_mean_v.unwrap_or(f64::NAN))
                .collect::<Vec<_>>(),
        ),
        (
            "trace_current_mean_uA",
            rows.iter()
                .map(|r| r.summary.trace_current_mean_ua.unwrap_or(f64::NAN))
                .collect::<Vec<_>>(),
        ),
    ]
    .into_iter()
    .map(|(name, cov)| CovariateCorrelation {
        covariate: name.to_string(),
        r_before: pearson(&cov, &resid_base),
        r_after: pearson(&cov, &resid_corr),
    })
    .collect();

    Ok(I2rOutcome {
        folds,
        runs: out_rows,
        base: ResidualStats::from_residuals(&resid_base),
        corrected: ResidualStats::from_residuals(&resid_corr),
        correlations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use soclab_core::types::RunSummary;

    /// Build a fleet whose residuals are exactly I^2 * R_true.
    fn fleet_with_true_resistance(r0: f64, r1: f64) -> Vec<RunLevelRow> {
        let mut rows = Vec::new();
        for (si, scenario) in ["S1", "S2", "S3", "S4", "S5"].iter().enumerate() {
            for ri in 0..4 {
                let current_a = 0.2 + 0.15 * ri as f64 + 0.05 * si as f64;
                let soc_pct = 90.0 - 8.0 * ri as f64;
                let soc_frac = soc_pct / 100.0;
                let r_int = r0 + r1 * (1.0 - soc_frac);
                let loss_mw = current_a * current_a * r_int * 1000.0;
                rows.push(RunLevelRow {
                    summary: RunSummary {
                        run_name: format!("{scenario}_{ri}"),
                        scenario: scenario.to_string(),
                        battery_level0_pct: Some(soc_pct),
                        thermal_cpu0_c: Some(38.0),
                        trace_current_mean_ua: Some(current_a * 1e6),
                        trace_voltage_mean_v: Some(4.0),
                        qc_keep: true,
                        ..RunSummary::default()
                    },
                    p_meas_mean_mw: Some(900.0 + loss_mw),
                    p_pred_mean_mw: Some(900.0),
                });
            }
        }
        rows
    }

    #[test]
    fn recovers_resistance_and_shrinks_error() {
        let rows = fleet_with_true_resistance(0.12, 0.08);
        let outcome =
            fit_i2r_loso(&rows, &I2rOptions::default().with_model(RintModel::R0Rsoc)).unwrap();
        assert!(outcome.all_folds_physical());
        assert_eq!(outcome.folds.len(), 5);
        for fold in &outcome.folds {
            assert!((fold.params.coeffs[0] - 0.12).abs() < 0.03, "{:?}", fold.params);
        }
        assert!(outcome.corrected.rmse_mw < outcome.base.rmse_mw / 5.0);
    }

    #[test]
    fn coefficients_never_negative_even_on_noise() {
        // Residuals uncorrelated with current: clamped fit must stay >= 0.
        let mut rows = fleet_with_true_resistance(0.0, 0.0);
        for (i, row) in rows.iter_mut().enumerate() {
            let bump = if i % 2 == 0 { 25.0 } else { -25.0 };
            row.p_meas_mean_mw = row.p_meas_mean_mw.map(|p| p + bump);
        }
        let outcome = fit_i2r_loso(&rows, &I2rOptions::default()).unwrap();
        assert!(outcome.all_folds_physical());
        for run in &outcome.runs {
            assert!(run.p_loss_w.is_nan() || run.p_loss_w >= 0.0);
        }
    }

    #[test]
    fn qc_rejected_runs_are_excluded_when_flagged() {
        let mut rows = fleet_with_true_resistance(0.1, 0.0);
        rows[0].summary.qc_keep = false;
        let n_all = fit_i2r_loso(&rows, &I2rOptions::default()).unwrap().runs.len();
        let n_kept = fit_i2r_loso(&rows, &I2rOptions::default().with_use_only_qc_keep(true))
            .unwrap()
            .runs
            .len();
        assert_eq!(n_all, rows.len());
        assert_eq!(n_kept, rows.len() - 1);
    }

    #[test]
    fn rows_without_current_get_nan_loss() {
        let mut rows = fleet_with_true_resistance(0.1, 0.0);
        rows[3].summary.trace_current_mean_ua = None;
        let outcome = fit_i2r_loso(&rows, &I2rOptions::default()).unwrap();
        assert!(outcome.runs[3].p_loss_w.is_nan());
        // ...and such rows still count in the base stats but not corrected.
        assert!(outcome.base.n > outcome.corrected.n);
    }

    #[test]
    fn scale_fit_damps_overcorrection() {
        // The fitted scale must stay non-negative and cannot hurt when the
        // residuals really are pure I^2*R.
        let rows = fleet_with_true_resistance(0.1, 0.0);
        let plain = fit_i2r_loso(
            &rows,
            &I2rOptions::default().with_model(RintModel::R0),
        )
        .unwrap();
        let scaled = fit_i2r_loso(
            &rows,
            &I2rOptions::default()
                .with_model(RintModel::R0)
                .with_fit_scale(true),
        )
        .unwrap();
        for fold in &scaled.folds {
            assert!(fold.params.scale >= 0.0);
        }
        // On exactly-generated data both should do well.
        assert!(scaled.corrected.rmse_mw <= plain.corrected.rmse_mw + 1e-6);
    }

    #[test]
    fn current_correlation_drops_after_correction() {
        // I^2*R signal plus current-independent noise: the correction should
        // strip the current-coupled component and leave the noise behind.
        let mut rows = fleet_with_true_resistance(0.15, 0.0);
        for (i, row) in rows.iter_mut().enumerate() {
            let bump = if i % 2 == 0 { 15.0 } else { -15.0 };
            row.p_meas_mean_mw = row.p_meas_mean_mw.map(|p| p + bump);
        }
        let outcome = fit_i2r_loso(&rows, &I2rOptions::default()).unwrap();
        let c = outcome
            .correlations
            .iter()
            .find(|c| c.covariate == "trace_current_mean_uA")
            .unwrap();
        assert!(c.r_before > 0.7, "r_before = {}", c.r_before);
        assert!(c.r_after.abs() < c.r_before, "r_after = {}", c.r_after);
    }
}
