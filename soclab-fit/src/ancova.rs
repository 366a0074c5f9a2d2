//! Covariate-adjusted scenario means (ANCOVA-style, Huber-robust)
//!
//! ## Overview
//!
//! Raw per-scenario mean power confounds the scenario effect with the start
//! state the runs happened to be collected in - a scenario whose runs all
//! started hot looks more expensive than it is. The fix is the classic
//! ANCOVA shape, fitted robustly:
//!
//! ```text
//! power_mean ~ intercept + scenario dummies + covariates    (Huber IRLS)
//! ```
//!
//! The *adjusted mean* of a scenario is the model evaluated at that
//! scenario's dummy with every covariate pinned to a common reference state
//! (per-covariate median unless overridden). Comparing raw vs adjusted means
//! shows how much of each scenario's apparent cost is start-state artifact.
//!
//! With `drop_first` the first scenario (sorted order) becomes the baseline
//! absorbed into the intercept, removing the dummy collinearity; the Huber
//! loss keeps contaminated runs from dragging the scenario contrasts.

use serde::{Deserialize, Serialize};

use soclab_core::series;

use crate::huber::{fit_huber_irls, HuberConfig};
use crate::linalg::DesignMatrix;
use crate::runlevel::{Covariate, RunLevelRow};
use crate::{FitError, FitResult};

/// Covariate-adjustment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncovaOptions {
    /// Covariates entering the design
    pub covariates: Vec<Covariate>,
    /// Reference value per covariate; `None` pins to the fitted-row median
    pub reference: Vec<Option<f64>>,
    /// Drop the first scenario dummy (baseline absorbed into the intercept)
    pub drop_first: bool,
    /// Robust-fit settings
    pub huber: HuberConfig,
}

impl Default for AncovaOptions {
    fn default() -> Self {
        let covariates = Covariate::default_set();
        let reference = vec![None; covariates.len()];
        Self {
            covariates,
            reference,
            drop_first: false,
            huber: HuberConfig::default(),
        }
    }
}

impl AncovaOptions {
    /// Enable the drop-first dummy coding.
    pub fn with_drop_first(mut self, on: bool) -> Self {
        self.drop_first = on;
        self
    }
}

/// Raw spread of one scenario's per-run mean power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRawStats {
    /// Scenario label
    pub scenario: String,
    /// Runs with a mean power
    pub n: usize,
    /// Raw mean, milliwatts
    pub raw_mean_mw: f64,
    /// Sample standard deviation, milliwatts
    pub raw_std_mw: f64,
    /// Smallest per-run mean
    pub raw_min_mw: f64,
    /// Largest per-run mean
    pub raw_max_mw: f64,
    /// Coefficient of variation
    pub raw_cv: f64,
}

/// One scenario's adjusted mean next to its raw mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedMean {
    /// Scenario label
    pub scenario: String,
    /// Model prediction at the reference covariate state, milliwatts
    pub adjusted_mean_mw: f64,
}

/// Covariate-adjustment outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncovaOutcome {
    /// Raw per-scenario stats
    pub raw: Vec<ScenarioRawStats>,
    /// Adjusted mean per scenario
    pub adjusted: Vec<AdjustedMean>,
    /// Fitted coefficients as (term, value) pairs
    pub coefficients: Vec<(String, f64)>,
    /// Baseline scenario when `drop_first` was used
    pub baseline_scenario: Option<String>,
    /// Reference covariate state as (name, value) pairs
    pub reference: Vec<(String, f64)>,
    /// Rows entering the fit
    pub n_fit: usize,
}

/// Fit the adjustment and evaluate adjusted means.
///
/// The response is each run's trace mean power; rows missing the response or
/// any covariate are excluded from the fit (and from the reference medians).
pub fn covariate_adjusted_means(
    rows: &[RunLevelRow],
    options: &AncovaOptions,
) -> FitResult<AncovaOutcome> {
    if options.reference.len() != options.covariates.len() {
        return Err(FitError::DimensionMismatch {
            left: options.covariates.len(),
            right: options.reference.len(),
        });
    }

    // Complete rows: response + all covariates.
    let mut complete: Vec<(&RunLevelRow, Vec<f64>, f64)> = Vec::new();
    for row in rows {
        let y = match row.summary.trace_power_mean_mw.filter(|v| v.is_finite()) {
            Some(v) => v,
            None => continue,
        };
        let mut covs = Vec::with_capacity(options.covariates.len());
        let mut ok = true;
        for cov in &options.covariates {
            match cov.extract(&row.summary) {
                Some(v) => covs.push(v),
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            complete.push((row, covs, y));
        }
    }

    let mut scenario_values: Vec<String> = complete
        .iter()
        .map(|(r, _, _)| r.summary.scenario.clone())
        .collect();
    scenario_values.sort();
    scenario_values.dedup();

    let baseline = if options.drop_first {
        scenario_values.first().cloned()
    } else {
        None
    };
    let dummy_scenarios: Vec<&String> = scenario_values
        .iter()
        .filter(|s| Some(*s) != baseline.as_ref())
        .collect();

    // Terms: intercept, scen_<label>..., covariates...
    let mut terms: Vec<String> = vec!["intercept".to_string()];
    terms.extend(dummy_scenarios.iter().map(|s| format!("scen_{s}")));
    terms.extend(options.covariates.iter().map(|c| c.name().to_string()));
    let p = terms.len();

    if complete.len() < p + 1 {
        return Err(FitError::NotEnoughRows {
            needed: p + 1,
            got: complete.len(),
        });
    }

    // Reference covariate state: override or fitted-row median.
    let mut reference: Vec<(String, f64)> = Vec::new();
    for (ci, cov) in options.covariates.iter().enumerate() {
        let value = match options.reference[ci] {
            Some(v) if v.is_finite() => v,
            _ => {
                let col: Vec<f64> = complete.iter().map(|(_, covs, _)| covs[ci]).collect();
                series::median(&col).unwrap_or(0.0)
            }
        };
        reference.push((cov.name().to_string(), value));
    }

    // Assemble and fit.
    let mut x = DesignMatrix::new(p);
    let mut y = Vec::with_capacity(complete.len());
    for (row, covs, yi) in &complete {
        let mut xr = vec![0.0; p];
        xr[0] = 1.0;
        for (di, scen) in dummy_scenarios.iter().enumerate() {
            if row.summary.scenario == **scen {
                xr[1 + di] = 1.0;
            }
        }
        for (ci, v) in covs.iter().enumerate() {
            xr[1 + dummy_scenarios.len() + ci] = *v;
        }
        x.push_row(&xr);
        y.push(*yi);
    }
    let beta = fit_huber_irls(&x, &y, &options.huber)?;

    // Adjusted mean per scenario at the reference state.
    let mut adjusted = Vec::new();
    for scen in &scenario_values {
        let mut xr = vec![0.0; p];
        xr[0] = 1.0;
        for (di, dummy) in dummy_scenarios.iter().enumerate() {
            if *dummy == scen {
                xr[1 + di] = 1.0;
            }
        }
        for (ci, (_, v)) in reference.iter().enumerate() {
            xr[1 + dummy_scenarios.len() + ci] = *v;
        }
        adjusted.push(AdjustedMean {
            scenario: scen.clone(),
            adjusted_mean_mw: xr.iter().zip(&beta).map(|(a, b)| a * b).sum(),
        });
    }

    // Raw stats over every row with a response (not just complete rows).
    let mut raw_groups: std::collections::BTreeMap<&str, Vec<f64>> =
        std::collections::BTreeMap::new();
    for row in rows {
        if let Some(v) = row.summary.trace_power_mean_mw.filter(|v| v.is_finite()) {
            raw_groups
                .entry(row.summary.scenario.as_str())
                .or_default()
                .push(v);
        }
    }
    let raw = raw_groups
        .into_iter()
        .map(|(scenario, vals)| {
            let mean = series::mean_finite(vals.iter().copied()).unwrap_or(f64::NAN);
            let std = series::std_finite(&vals).unwrap_or(f64::NAN);
            ScenarioRawStats {
                scenario: scenario.to_string(),
                n: vals.len(),
                raw_mean_mw: mean,
                raw_std_mw: std,
                raw_min_mw: vals.iter().copied().fold(f64::INFINITY, f64::min),
                raw_max_mw: vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                raw_cv: if mean != 0.0 { std / mean } else { f64::NAN },
            }
        })
        .collect();

    Ok(AncovaOutcome {
        raw,
        adjusted,
        coefficients: terms.into_iter().zip(beta).collect(),
        baseline_scenario: baseline,
        reference,
        n_fit: complete.len(),
    })
}
