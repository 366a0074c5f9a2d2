//! Run-level rows shared by the correction and adjustment fits
//!
//! The I²R, residual-correction and covariate-adjustment stages all work on
//! one row per run: the start-state summary joined with the out-of-fold
//! evaluation means. [`RunLevelRow`] is that join; [`Covariate`] names the
//! start-state columns the corrections may regress on (voltage is converted
//! to volts so the design matrix columns stay on comparable scales).

use serde::{Deserialize, Serialize};

use soclab_core::types::RunSummary;

/// One run's summary joined with its evaluation means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLevelRow {
    /// Start-state summary with QC verdict
    pub summary: RunSummary,
    /// Mean observed power over the held-out run, milliwatts
    pub p_meas_mean_mw: Option<f64>,
    /// Mean out-of-fold predicted power, milliwatts
    pub p_pred_mean_mw: Option<f64>,
}

impl RunLevelRow {
    /// Base residual, measured minus predicted mean power.
    pub fn resid_mw(&self) -> Option<f64> {
        match (self.p_meas_mean_mw, self.p_pred_mean_mw) {
            (Some(m), Some(p)) if m.is_finite() && p.is_finite() => Some(m - p),
            _ => None,
        }
    }
}

/// Start-state covariates available for run-level regressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Covariate {
    /// Start SOC, percent
    SocStartPct,
    /// Start voltage, volts
    VoltageStartV,
    /// Start CPU temperature, Celsius
    ThermalCpuStartC,
    /// Start battery temperature, Celsius
    ThermalBattStartC,
}

impl Covariate {
    /// The default covariate set, in reporting order.
    pub fn default_set() -> Vec<Covariate> {
        vec![
            Covariate::SocStartPct,
            Covariate::VoltageStartV,
            Covariate::ThermalCpuStartC,
            Covariate::ThermalBattStartC,
        ]
    }

    /// Column name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Covariate::SocStartPct => "battery_level0_pct",
            Covariate::VoltageStartV => "voltage_V",
            Covariate::ThermalCpuStartC => "thermal_cpu0_C",
            Covariate::ThermalBattStartC => "thermal_batt0_C",
        }
    }

    /// Extract the covariate from a summary, finite values only.
    pub fn extract(&self, summary: &RunSummary) -> Option<f64> {
        let v = match self {
            Covariate::SocStartPct => summary.battery_level0_pct,
            Covariate::VoltageStartV => summary.battery_voltage0_v(),
            Covariate::ThermalCpuStartC => summary.thermal_cpu0_c,
            Covariate::ThermalBattStartC => summary.thermal_batt0_c,
        };
        v.filter(|x| x.is_finite())
    }
}

/// Keep only QC-kept rows when the flag asks for it.
pub fn filter_qc(rows: &[RunLevelRow], use_only_qc_keep: bool) -> Vec<RunLevelRow> {
    rows.iter()
        .filter(|r| !use_only_qc_keep || r.summary.qc_keep)
        .cloned()
        .collect()
}
