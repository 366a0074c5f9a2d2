//! Lumped thermal models feeding the leak term
//!
//! ## Overview
//!
//! The leak term of the power model consumes a *simulated* temperature, not
//! the raw sensor: the raw CPU thermistor is noisy and reacts to workload
//! spikes faster than the silicon that actually leaks. Two lumped models are
//! supported, both integrated with forward Euler over the sampling grid:
//!
//! ### 1-state
//!
//! ```text
//! dT/dt = a*(T - T_amb) + b*P_heat        a <= 0, b >= 0
//! ```
//!
//! `T_amb` is approximated by the minimum observed in-run temperature and
//! `tau = -1/a` is the cooling time constant.
//!
//! ### 2-state
//!
//! A fast CPU node coupled to a slow battery/body node, which is what it
//! takes to explain within-run drift as the whole device warms:
//!
//! ```text
//! dT_cpu/dt  = a_cpu*(T_cpu - T_batt)  + b_cpu*P_heat
//! dT_batt/dt = a_batt*(T_batt - T_amb) + b_couple*(T_cpu - T_batt)
//! ```
//!
//! with `a_cpu <= 0`, `b_cpu >= 0`, `a_batt <= 0`, `b_couple >= 0`. The leak
//! temperature is a convex mix of the two simulated nodes, default 0.7 CPU.
//!
//! Fitting lives in `soclab-fit::thermal` (finite-difference ridge
//! regression); this module owns the parameter structs, the documented
//! fallback constants and the simulation.

use serde::{Deserialize, Serialize};

use crate::series;
use crate::types::RunSeries;

/// Fallback cooling rate when a fit is unusable: tau = 2000 s.
pub const FALLBACK_A_PER_S: f64 = -1.0 / 2000.0;

/// Fallback battery-node cooling rate: tau = 5000 s.
pub const FALLBACK_A_BATT_PER_S: f64 = -1.0 / 5000.0;

/// Ambient guess when a run never reports a temperature.
pub const FALLBACK_T_AMB_C: f64 = 40.0;

/// Default CPU share of the leak-temperature mix for the 2-state model.
pub const DEFAULT_LEAK_MIX_CPU: f64 = 0.7;

/// Which thermal model generates the leak temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermalModel {
    /// Single lumped node driven by CPU power
    OneState,
    /// Fast CPU node coupled to a slow battery node
    TwoState,
}

impl Default for ThermalModel {
    fn default() -> Self {
        ThermalModel::OneState
    }
}

/// 1-state model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalParams1 {
    /// Cooling rate, 1/s (non-positive)
    pub a_per_s: f64,
    /// Heating response, C/J
    pub b_c_per_j: f64,
    /// Ambient proxy, Celsius
    pub t_amb_c: f64,
}

impl ThermalParams1 {
    /// Documented fallback when fitting is impossible.
    pub fn fallback(t_amb_c: f64) -> Self {
        Self {
            a_per_s: FALLBACK_A_PER_S,
            b_c_per_j: 0.0,
            t_amb_c,
        }
    }

    /// Cooling time constant in seconds (infinite when a >= 0).
    pub fn tau_s(&self) -> f64 {
        if self.a_per_s < 0.0 {
            -1.0 / self.a_per_s
        } else {
            f64::INFINITY
        }
    }
}

/// 2-state model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalParams2 {
    /// CPU-node coupling to the battery node, 1/s (non-positive)
    pub a_cpu_per_s: f64,
    /// CPU heating response, C/J
    pub b_cpu_c_per_j: f64,
    /// Battery-node cooling to ambient, 1/s (non-positive)
    pub a_batt_per_s: f64,
    /// Battery-node heating from the CPU node, 1/s (non-negative)
    pub b_couple_per_s: f64,
    /// Ambient proxy, Celsius
    pub t_amb_c: f64,
}

impl ThermalParams2 {
    /// Documented fallback when fitting is impossible.
    pub fn fallback(t_amb_c: f64) -> Self {
        Self {
            a_cpu_per_s: -1.0 / 200.0,
            b_cpu_c_per_j: 0.0,
            a_batt_per_s: FALLBACK_A_BATT_PER_S,
            b_couple_per_s: 0.0,
            t_amb_c,
        }
    }

    /// CPU-node time constant, seconds.
    pub fn tau_cpu_s(&self) -> f64 {
        if self.a_cpu_per_s < 0.0 {
            -1.0 / self.a_cpu_per_s
        } else {
            f64::INFINITY
        }
    }

    /// Battery-node time constant, seconds.
    pub fn tau_batt_s(&self) -> f64 {
        if self.a_batt_per_s < 0.0 {
            -1.0 / self.a_batt_per_s
        } else {
            f64::INFINITY
        }
    }
}

/// Simulated temperatures for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalTrajectory {
    /// Simulated CPU-node temperature per sample
    pub t_cpu_hat_c: Vec<f64>,
    /// Simulated battery-node temperature per sample (empty for 1-state)
    pub t_batt_hat_c: Vec<f64>,
    /// Leak temperature consumed by the power model
    pub t_leak_hat_c: Vec<f64>,
}

/// CPU heating proxy in watts: clipped CPU power over each interval.
pub fn heat_w(run: &RunSeries) -> Vec<f64> {
    run.samples
        .iter()
        .map(|s| {
            s.power_cpu_mw
                .filter(|v| v.is_finite())
                .map(|mw| mw.max(0.0) / 1000.0)
                .unwrap_or(0.0)
        })
        .collect()
}

/// Ambient proxy: minimum observed value of a gap-filled temperature column.
pub fn ambient_proxy_c(filled_temps: &[f64]) -> f64 {
    let min = filled_temps
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    if min.is_finite() {
        min
    } else {
        series::median(filled_temps).unwrap_or(FALLBACK_T_AMB_C)
    }
}

/// Forward-Euler simulation of the 1-state model over a run.
///
/// Non-positive intervals hold the state. The initial condition is the first
/// observed CPU temperature, else ambient.
pub fn simulate_1state(run: &RunSeries, params: &ThermalParams1) -> ThermalTrajectory {
    let n = run.len();
    let p_heat = heat_w(run);
    let t0 = run
        .samples
        .iter()
        .filter_map(|s| s.temp_cpu_c)
        .find(|v| v.is_finite())
        .unwrap_or(params.t_amb_c);

    let mut t_hat = Vec::with_capacity(n);
    if n == 0 {
        return ThermalTrajectory {
            t_cpu_hat_c: t_hat.clone(),
            t_batt_hat_c: Vec::new(),
            t_leak_hat_c: t_hat,
        };
    }
    t_hat.push(t0);
    for i in 0..n - 1 {
        let dt = run.samples[i].dt_s;
        let prev = *t_hat.last().unwrap_or(&t0);
        if !(dt.is_finite() && dt > 0.0) {
            t_hat.push(prev);
            continue;
        }
        let dtdt = params.a_per_s * (prev - params.t_amb_c) + params.b_c_per_j * p_heat[i];
        t_hat.push(prev + dtdt * dt);
    }

    ThermalTrajectory {
        t_leak_hat_c: t_hat.clone(),
        t_cpu_hat_c: t_hat,
        t_batt_hat_c: Vec::new(),
    }
}

/// Forward-Euler simulation of the 2-state model over a run.
///
/// `leak_mix_cpu` is clamped to [0, 1]; the leak temperature is
/// `mix*T_cpu_hat + (1-mix)*T_batt_hat`.
pub fn simulate_2state(
    run: &RunSeries,
    params: &ThermalParams2,
    leak_mix_cpu: f64,
) -> ThermalTrajectory {
    let n = run.len();
    let p_heat = heat_w(run);
    let mix = if leak_mix_cpu.is_finite() {
        leak_mix_cpu.clamp(0.0, 1.0)
    } else {
        DEFAULT_LEAK_MIX_CPU
    };

    let first = |get: fn(&crate::types::Sample) -> Option<f64>| {
        run.samples
            .iter()
            .filter_map(get)
            .find(|v| v.is_finite())
            .unwrap_or(params.t_amb_c)
    };
    let t_cpu0 = first(|s| s.temp_cpu_c);
    let t_batt0 = first(|s| s.temp_batt_c);

    let mut t_cpu = Vec::with_capacity(n);
    let mut t_batt = Vec::with_capacity(n);
    if n == 0 {
        return ThermalTrajectory {
            t_cpu_hat_c: t_cpu,
            t_batt_hat_c: t_batt,
            t_leak_hat_c: Vec::new(),
        };
    }
    t_cpu.push(t_cpu0);
    t_batt.push(t_batt0);
    for i in 0..n - 1 {
        let dt = run.samples[i].dt_s;
        let (c_prev, b_prev) = (t_cpu[i], t_batt[i]);
        if !(dt.is_finite() && dt > 0.0) {
            t_cpu.push(c_prev);
            t_batt.push(b_prev);
            continue;
        }
        let dc = params.a_cpu_per_s * (c_prev - b_prev) + params.b_cpu_c_per_j * p_heat[i];
        let db = params.a_batt_per_s * (b_prev - params.t_amb_c)
            + params.b_couple_per_s * (c_prev - b_prev);
        t_cpu.push(c_prev + dc * dt);
        t_batt.push(b_prev + db * dt);
    }

    let t_leak = t_cpu
        .iter()
        .zip(&t_batt)
        .map(|(&c, &b)| mix * c + (1.0 - mix) * b)
        .collect();

    ThermalTrajectory {
        t_cpu_hat_c: t_cpu,
        t_batt_hat_c: t_batt,
        t_leak_hat_c: t_leak,
    }
}
