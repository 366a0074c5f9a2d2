//! SOC ordinary differential equation and time-to-empty
//!
//! ## Overview
//!
//! State of charge evolves by draining the effective capacity at the modelled
//! power, converted to current through the terminal voltage:
//!
//! ```text
//! dSOC/dt = -P_total(t) / (V(t) * 3600 * C_eff_mAh)
//! ```
//!
//! with `P_total` in mW, `V` in volts and `C_eff` in mAh, so the denominator
//! carries the mWh-per-mAh conversion. Integration is forward Euler over the
//! sampling grid - the sampling cadence (seconds) is far below the battery
//! time constant (hours), so higher-order integrators buy nothing here.
//!
//! ## Edge policy
//!
//! Each step clips SOC to [0, 1]. A clip means the model disagrees with the
//! physical bounds (typically overshoot near empty); the trajectory records
//! that in its `clipped` flag rather than failing, and the produced series
//! never leaves the unit interval.
//!
//! Time-to-empty is the first crossing of a configurable floor (default 5%),
//! linearly interpolated inside the crossing step.

use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, ModelResult};
use crate::types::RunSeries;

/// Voltage fallback when a run never reports one, volts.
pub const NOMINAL_CELL_V: f64 = 3.85;

/// Default SOC floor defining "empty" for TTE.
pub const DEFAULT_SOC_MIN: f64 = 0.05;

/// Seconds per hour; converts mAh to mA-seconds in the ODE denominator.
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Result of integrating the SOC ODE over one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocTrajectory {
    /// SOC fraction per sample, always within [0, 1]
    pub soc: Vec<f64>,
    /// Interval lengths the trajectory was integrated over
    pub dt_s: Vec<f64>,
    /// Whether any step had to be clipped to the unit interval
    pub clipped: bool,
}

impl SocTrajectory {
    /// SOC in percent per sample.
    pub fn soc_pct(&self) -> Vec<f64> {
        self.soc.iter().map(|s| s * 100.0).collect()
    }

    /// Final SOC fraction.
    pub fn final_soc(&self) -> f64 {
        *self.soc.last().unwrap_or(&f64::NAN)
    }

    /// Time of the first crossing of `soc_min`, seconds from run start.
    ///
    /// Linear interpolation inside the crossing step; `None` when the
    /// trajectory stays above the floor. A trajectory that *starts* at or
    /// below the floor crosses at t = 0.
    pub fn time_to_empty_s(&self, soc_min: f64) -> Option<f64> {
        if self.soc.is_empty() {
            return None;
        }
        if self.soc[0] <= soc_min {
            return Some(0.0);
        }
        let mut t = 0.0;
        for i in 1..self.soc.len() {
            let dt = self.dt_s[i - 1].max(0.0);
            if self.soc[i] <= soc_min {
                let drop = self.soc[i - 1] - self.soc[i];
                let frac = if drop > 0.0 {
                    ((self.soc[i - 1] - soc_min) / drop).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                return Some(t + frac * dt);
            }
            t += dt;
        }
        None
    }
}

/// Integrate the ODE from dense per-sample columns.
///
/// `power_mw`, `voltage_v` and `dt_s` must agree in length; `dt_s[i]` is the
/// step from sample `i` to `i + 1` (the last entry only matters for TTE
/// accounting). Non-positive/non-finite voltages fall back to
/// [`NOMINAL_CELL_V`]; non-positive intervals hold the state.
pub fn integrate(
    dt_s: &[f64],
    voltage_v: &[f64],
    power_mw: &[f64],
    soc0: f64,
    c_eff_mah: f64,
) -> ModelResult<SocTrajectory> {
    if dt_s.len() != voltage_v.len() {
        return Err(ModelError::ColumnMismatch {
            left: dt_s.len(),
            right: voltage_v.len(),
        });
    }
    if dt_s.len() != power_mw.len() {
        return Err(ModelError::ColumnMismatch {
            left: dt_s.len(),
            right: power_mw.len(),
        });
    }
    if dt_s.is_empty() {
        return Err(ModelError::EmptyRun {
            run_name: String::new(),
        });
    }
    if !(c_eff_mah.is_finite() && c_eff_mah > 0.0) {
        return Err(ModelError::NonFiniteParam { name: "c_eff_mah" });
    }

    let denom = SECONDS_PER_HOUR * c_eff_mah;
    let mut soc = Vec::with_capacity(dt_s.len());
    let mut clipped = false;

    let first = soc0.clamp(0.0, 1.0);
    if first != soc0 {
        clipped = true;
    }
    soc.push(first);

    for i in 0..dt_s.len() - 1 {
        let prev = soc[i];
        let dt = dt_s[i];
        if !(dt.is_finite() && dt > 0.0) {
            soc.push(prev);
            continue;
        }
        let v = if voltage_v[i].is_finite() && voltage_v[i] > 0.0 {
            voltage_v[i]
        } else {
            NOMINAL_CELL_V
        };
        let p = if power_mw[i].is_finite() { power_mw[i] } else { 0.0 };

        let dsoc = p / (v * denom) * dt;
        let raw = prev - dsoc;
        let next = raw.clamp(0.0, 1.0);
        if next != raw {
            clipped = true;
        }
        soc.push(next);
    }

    Ok(SocTrajectory {
        soc,
        dt_s: dt_s.to_vec(),
        clipped,
    })
}

/// Integrate over a run using a predicted power series.
///
/// Voltage is the run's gap-filled observation; the initial SOC is the first
/// reported level (0.5 when the run never reports one, matching the fitting
/// pipeline's neutral start).
pub fn integrate_run(
    run: &RunSeries,
    power_pred_mw: &[f64],
    c_eff_mah: f64,
) -> ModelResult<SocTrajectory> {
    if run.is_empty() {
        return Err(ModelError::EmptyRun {
            run_name: run.run_name.clone(),
        });
    }
    let dt: Vec<f64> = run.samples.iter().map(|s| s.dt_s).collect();
    let voltage = run.voltage_v_filled();
    let soc0 = run.initial_soc_frac().unwrap_or(0.5);
    integrate(&dt, &voltage, power_pred_mw, soc0, c_eff_mah)
}
