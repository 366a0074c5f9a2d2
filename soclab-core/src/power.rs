//! Physically-structured power decomposition model
//!
//! ## Overview
//!
//! Total instantaneous device power is expressed as a sum of interpretable
//! subsystem terms rather than a black-box regression:
//!
//! ```text
//! leak(T)  = exp(gamma * (T_leak - T_ref))
//! P0       = p_base + k_screen*P_screen + k_cpu*P_cpu + k_leak*leak(T_leak)
//! P_total  = P0 + k_gps_off*(1 - gps_on) + k_cell_off*(1 - cellular_on)
//! ```
//!
//! - `p_base` is the always-on floor (rails, memory, sensor hub).
//! - `P_screen` and `P_cpu` are *measured proxies* (panel power estimate, CPU
//!   frequency-residency energy over the interval); their coefficients absorb
//!   proxy calibration error.
//! - The leak term is an Arrhenius-inspired exponential in the simulated leak
//!   temperature: silicon leakage roughly doubles every ~10 C, so the default
//!   prior is `gamma = ln(2)/10`.
//! - GPS and cellular enter as *offsets applied when the subsystem is OFF*,
//!   calibrated from A/B run pairs. The dominant operating point (both ON) is
//!   the regression baseline, so both offsets are constrained non-positive:
//!   turning a radio off cannot increase power.
//!
//! Coefficients come out of the calibration crate; this module owns the
//! parameter set and the forward prediction.

use serde::{Deserialize, Serialize};

use crate::types::Sample;

/// Default effective battery capacity, mAh.
pub const DEFAULT_C_EFF_MAH: f64 = 4410.0;

/// Default leak-doubling interval, Celsius.
pub const DEFAULT_LEAK_DOUBLING_C: f64 = 10.0;

/// Leak-rate exponent for a given doubling interval.
pub fn leak_gamma_per_c(doubling_c: f64) -> f64 {
    core::f64::consts::LN_2 / doubling_c
}

/// Fitted parameters of the power decomposition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerModelParams {
    /// Always-on baseline, milliwatts
    pub p_base_mw: f64,
    /// Screen proxy coefficient (dimensionless)
    pub k_screen: f64,
    /// CPU proxy coefficient (dimensionless)
    pub k_cpu: f64,
    /// Leak term magnitude at the reference temperature, milliwatts
    pub k_leak_mw: f64,
    /// Leak exponent, 1/Celsius
    pub leak_gamma_per_c: f64,
    /// Leak reference temperature, Celsius
    pub leak_tref_c: f64,
    /// Offset applied when GPS is OFF, milliwatts (<= 0)
    pub k_gps_off_mw: f64,
    /// Offset applied when cellular is OFF, milliwatts (<= 0)
    pub k_cellular_off_mw: f64,
    /// Effective battery capacity consumed by the SOC ODE, mAh
    pub c_eff_mah: f64,
}

impl Default for PowerModelParams {
    fn default() -> Self {
        Self {
            p_base_mw: 0.0,
            k_screen: 1.0,
            k_cpu: 1.0,
            k_leak_mw: 0.0,
            leak_gamma_per_c: leak_gamma_per_c(DEFAULT_LEAK_DOUBLING_C),
            leak_tref_c: 40.0,
            k_gps_off_mw: 0.0,
            k_cellular_off_mw: 0.0,
            c_eff_mah: DEFAULT_C_EFF_MAH,
        }
    }
}

impl PowerModelParams {
    /// Leak feature at a given leak temperature.
    pub fn leak_feature(&self, t_leak_c: f64) -> f64 {
        (self.leak_gamma_per_c * (t_leak_c - self.leak_tref_c)).exp()
    }

    /// Predicted total power for one sample given its leak temperature.
    pub fn predict_mw(&self, sample: &Sample, t_leak_c: f64) -> f64 {
        self.decompose(sample, t_leak_c).total_mw()
    }

    /// Predicted total power for a run given per-sample leak temperatures.
    ///
    /// Missing CPU/screen proxies contribute zero, mirroring how the fit
    /// treats them.
    pub fn predict_series_mw(&self, samples: &[Sample], t_leak_c: &[f64]) -> Vec<f64> {
        samples
            .iter()
            .zip(t_leak_c)
            .map(|(s, &t)| self.predict_mw(s, t))
            .collect()
    }

    /// Per-subsystem breakdown for one sample.
    pub fn decompose(&self, sample: &Sample, t_leak_c: f64) -> PowerBreakdown {
        let p_screen = sample.power_screen_mw.filter(|v| v.is_finite()).unwrap_or(0.0);
        let p_cpu = sample.power_cpu_mw.filter(|v| v.is_finite()).unwrap_or(0.0);
        PowerBreakdown {
            base_mw: self.p_base_mw,
            screen_mw: self.k_screen * p_screen,
            cpu_mw: self.k_cpu * p_cpu,
            leak_mw: self.k_leak_mw * self.leak_feature(t_leak_c),
            gps_off_mw: if sample.gps_on { 0.0 } else { self.k_gps_off_mw },
            cellular_off_mw: if sample.cellular_on {
                0.0
            } else {
                self.k_cellular_off_mw
            },
        }
    }
}

/// Named subsystem terms of one prediction, all in milliwatts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerBreakdown {
    /// Always-on baseline
    pub base_mw: f64,
    /// Screen term
    pub screen_mw: f64,
    /// CPU term
    pub cpu_mw: f64,
    /// Temperature-dependent leak term
    pub leak_mw: f64,
    /// GPS-off offset (zero when GPS is on)
    pub gps_off_mw: f64,
    /// Cellular-off offset (zero when cellular is on)
    pub cellular_off_mw: f64,
}

impl PowerBreakdown {
    /// Sum of all terms.
    pub fn total_mw(&self) -> f64 {
        self.base_mw
            + self.screen_mw
            + self.cpu_mw
            + self.leak_mw
            + self.gps_off_mw
            + self.cellular_off_mw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PowerModelParams {
        PowerModelParams {
            p_base_mw: 300.0,
            k_screen: 1.1,
            k_cpu: 0.9,
            k_leak_mw: 50.0,
            leak_gamma_per_c: leak_gamma_per_c(10.0),
            leak_tref_c: 40.0,
            k_gps_off_mw: -80.0,
            k_cellular_off_mw: -40.0,
            c_eff_mah: DEFAULT_C_EFF_MAH,
        }
    }

    fn sample(screen: f64, cpu: f64, gps: bool, cell: bool) -> Sample {
        Sample {
            power_screen_mw: Some(screen),
            power_cpu_mw: Some(cpu),
            gps_on: gps,
            cellular_on: cell,
            ..Sample::default()
        }
    }

    #[test]
    fn leak_doubles_every_interval() {
        let p = params();
        let at_ref = p.leak_feature(40.0);
        let warmer = p.leak_feature(50.0);
        assert!((at_ref - 1.0).abs() < 1e-12);
        assert!((warmer - 2.0).abs() < 1e-12);
    }

    #[test]
    fn offsets_only_apply_when_off() {
        let p = params();
        let on = p.predict_mw(&sample(100.0, 200.0, true, true), 40.0);
        let gps_off = p.predict_mw(&sample(100.0, 200.0, false, true), 40.0);
        let both_off = p.predict_mw(&sample(100.0, 200.0, false, false), 40.0);
        assert!((on - (300.0 + 110.0 + 180.0 + 50.0)).abs() < 1e-9);
        assert!((gps_off - (on - 80.0)).abs() < 1e-9);
        assert!((both_off - (on - 120.0)).abs() < 1e-9);
    }

    #[test]
    fn missing_proxies_contribute_zero() {
        let p = params();
        let s = Sample {
            gps_on: true,
            cellular_on: true,
            ..Sample::default()
        };
        let got = p.predict_mw(&s, 40.0);
        assert!((got - (300.0 + 50.0)).abs() < 1e-9);
    }

    #[test]
    fn breakdown_sums_to_prediction() {
        let p = params();
        let s = sample(120.0, 340.0, false, true);
        let b = p.decompose(&s, 47.0);
        assert!((b.total_mw() - p.predict_mw(&s, 47.0)).abs() < 1e-12);
    }
}
