//! Residual error summaries and correlation diagnostics
//!
//! The reporting vocabulary of the whole pipeline: `n / mae_mW / rmse_mW /
//! bias_mW` over finite residuals, Pearson correlation of residuals against
//! start-state covariates, and per-scenario breakdowns sorted worst-first.
//! Everything masks non-finite entries instead of propagating NaN - a run
//! without an observation simply doesn't vote.

use serde::{Deserialize, Serialize};

/// Error summary over a residual series, milliwatts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    /// Number of finite residuals
    pub n: usize,
    /// Mean absolute error
    pub mae_mw: f64,
    /// Root-mean-square error
    pub rmse_mw: f64,
    /// Mean signed error (positive = model under-predicts)
    pub bias_mw: f64,
}

impl ResidualStats {
    /// Summarize a residual series (measured minus predicted), ignoring
    /// non-finite entries.
    pub fn from_residuals(residuals: &[f64]) -> Self {
        let finite: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
        if finite.is_empty() {
            return Self {
                n: 0,
                mae_mw: f64::NAN,
                rmse_mw: f64::NAN,
                bias_mw: f64::NAN,
            };
        }
        let n = finite.len() as f64;
        let mae = finite.iter().map(|r| r.abs()).sum::<f64>() / n;
        let mse = finite.iter().map(|r| r * r).sum::<f64>() / n;
        let bias = finite.iter().sum::<f64>() / n;
        Self {
            n: finite.len(),
            mae_mw: mae,
            rmse_mw: mse.sqrt(),
            bias_mw: bias,
        }
    }
}

/// Pearson correlation over jointly-finite pairs.
///
/// Returns NaN with fewer than three usable pairs or zero variance on either
/// side.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect();
    if pairs.len() < 3 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in &pairs {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let den = (sxx / n * (syy / n)).sqrt();
    if den > 0.0 {
        (sxy / n) / den
    } else {
        f64::NAN
    }
}

/// Residual stats for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    /// Scenario label
    pub scenario: String,
    /// Error summary over the scenario's runs
    pub stats: ResidualStats,
}

/// Per-scenario residual summaries, sorted by RMSE descending.
pub fn scenario_stats(scenarios: &[String], residuals: &[f64]) -> Vec<ScenarioStats> {
    debug_assert_eq!(scenarios.len(), residuals.len());
    let mut grouped: std::collections::BTreeMap<&str, Vec<f64>> =
        std::collections::BTreeMap::new();
    for (scen, r) in scenarios.iter().zip(residuals) {
        if r.is_finite() {
            grouped.entry(scen.as_str()).or_default().push(*r);
        }
    }
    let mut out: Vec<ScenarioStats> = grouped
        .into_iter()
        .map(|(scenario, rs)| ScenarioStats {
            scenario: scenario.to_string(),
            stats: ResidualStats::from_residuals(&rs),
        })
        .collect();
    out.sort_by(|a, b| {
        b.stats
            .rmse_mw
            .partial_cmp(&a.stats.rmse_mw)
            .unwrap_or(core::cmp::Ordering::Equal)
    });
    out
}
