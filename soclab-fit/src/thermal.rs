//! Per-run thermal model estimation
//!
//! Finite-difference regression of the lumped thermal models in
//! [`soclab_core::thermal`]: the observed temperature derivative over each
//! interval regresses on the cooling and heating features with a small ridge
//! (the features are correlated - workload heats the device while the device
//! is already warm). Sign constraints are enforced after the fact: a cooling
//! rate must not be positive and a heating response must not be negative;
//! violating estimates snap to the documented fallbacks.
//!
//! Fitting is deliberately infallible. A run with too few usable intervals
//! (fewer than [`MIN_POINTS`]), an all-missing temperature column or a
//! singular system gets the fallback parameters and a warning, never an
//! error - the calibration must survive individual bad runs.

use soclab_core::thermal::{
    self, ThermalParams1, ThermalParams2, FALLBACK_A_PER_S, FALLBACK_A_BATT_PER_S,
    FALLBACK_T_AMB_C,
};
use soclab_core::types::RunSeries;
use soclab_core::series;

use crate::linalg::{ridge, DesignMatrix};

/// Minimum usable finite-difference points per regression.
pub const MIN_POINTS: usize = 10;

/// Ridge strength for the finite-difference regressions.
pub const THERMAL_RIDGE: f64 = 1e-3;

/// Gap-filled temperature column, `None` when nothing was observed.
fn temps(run: &RunSeries, get: fn(&soclab_core::types::Sample) -> Option<f64>) -> Option<Vec<f64>> {
    if !run.samples.iter().filter_map(get).any(|v| v.is_finite()) {
        return None;
    }
    Some(run.filled_column(get, FALLBACK_T_AMB_C))
}

/// Fit the 1-state model on a run's observed CPU temperature.
pub fn fit_thermal_1state(run: &RunSeries) -> ThermalParams1 {
    let t = match temps(run, |s| s.temp_cpu_c) {
        Some(t) => t,
        None => {
            log::warn!("thermal fit {}: no CPU temperature, using fallback", run.run_name);
            return ThermalParams1::fallback(FALLBACK_T_AMB_C);
        }
    };
    let p_heat = thermal::heat_w(run);
    let t_amb = thermal::ambient_proxy_c(&t);

    // z = dT/dt, x1 = T - T_amb, x2 = P_heat
    let mut x = DesignMatrix::new(2);
    let mut z = Vec::new();
    for i in 0..run.len().saturating_sub(1) {
        let dt = run.samples[i].dt_s;
        if !(dt.is_finite() && dt > 0.0) {
            continue;
        }
        z.push((t[i + 1] - t[i]) / dt);
        x.push_row(&[t[i] - t_amb, p_heat[i]]);
    }

    if z.len() < MIN_POINTS {
        return ThermalParams1::fallback(t_amb);
    }

    let beta = match ridge(&x, &z, THERMAL_RIDGE) {
        Ok(b) => b,
        Err(e) => {
            log::warn!("thermal fit {}: {}", run.run_name, e);
            return ThermalParams1::fallback(t_amb);
        }
    };

    let mut a = beta[0];
    let mut b = beta[1];
    // Physical signs: cooling, non-negative heating. A rate indistinguishable
    // from zero is treated as unfit and snapped to the fallback tau.
    if !a.is_finite() || a >= -1e-6 {
        a = FALLBACK_A_PER_S;
    }
    if !b.is_finite() || b < 0.0 {
        b = 0.0;
    }

    ThermalParams1 {
        a_per_s: a,
        b_c_per_j: b,
        t_amb_c: t_amb,
    }
}

/// Fit the 2-state model on a run's observed CPU and battery temperatures.
pub fn fit_thermal_2state(run: &RunSeries) -> ThermalParams2 {
    let t_cpu = temps(run, |s| s.temp_cpu_c);
    let t_batt = temps(run, |s| s.temp_batt_c);
    let (t_cpu, t_batt) = match (t_cpu, t_batt) {
        (Some(c), Some(b)) => (c, b),
        (c, _) => {
            let t_amb = c
                .as_deref()
                .and_then(series::median)
                .unwrap_or(FALLBACK_T_AMB_C);
            log::warn!(
                "thermal fit {}: missing temperature channel, using fallback",
                run.run_name
            );
            return ThermalParams2::fallback(t_amb);
        }
    };

    let p_heat = thermal::heat_w(run);
    let t_amb = thermal::ambient_proxy_c(&t_batt);

    // Regression 1: dT_cpu/dt ~ (T_cpu - T_batt), P_heat
    // Regression 2: dT_batt/dt ~ (T_batt - T_amb), (T_cpu - T_batt)
    let mut x1 = DesignMatrix::new(2);
    let mut z1 = Vec::new();
    let mut x2 = DesignMatrix::new(2);
    let mut z2 = Vec::new();
    for i in 0..run.len().saturating_sub(1) {
        let dt = run.samples[i].dt_s;
        if !(dt.is_finite() && dt > 0.0) {
            continue;
        }
        z1.push((t_cpu[i + 1] - t_cpu[i]) / dt);
        x1.push_row(&[t_cpu[i] - t_batt[i], p_heat[i]]);

        z2.push((t_batt[i + 1] - t_batt[i]) / dt);
        x2.push_row(&[t_batt[i] - t_amb, t_cpu[i] - t_batt[i]]);
    }

    if z1.len() < MIN_POINTS || z2.len() < MIN_POINTS {
        return ThermalParams2::fallback(t_amb);
    }

    let (beta1, beta2) = match (ridge(&x1, &z1, THERMAL_RIDGE), ridge(&x2, &z2, THERMAL_RIDGE)) {
        (Ok(b1), Ok(b2)) => (b1, b2),
        _ => {
            log::warn!("thermal fit {}: singular 2-state system", run.run_name);
            return ThermalParams2::fallback(t_amb);
        }
    };

    let mut a_cpu = beta1[0];
    let mut b_cpu = beta1[1];
    let mut a_batt = beta2[0];
    let mut b_couple = beta2[1];

    // Only the sign matters for a_cpu: a small negative coupling is plausible
    // (the CPU node barely talks to the battery node) and must not be snapped
    // to a strong default, or hot-start runs would cool unrealistically fast.
    if !a_cpu.is_finite() || a_cpu > 0.0 {
        a_cpu = FALLBACK_A_PER_S;
    }
    if !b_cpu.is_finite() || b_cpu < 0.0 {
        b_cpu = 0.0;
    }
    if !a_batt.is_finite() || a_batt > 0.0 {
        a_batt = FALLBACK_A_BATT_PER_S;
    }
    if !b_couple.is_finite() || b_couple < 0.0 {
        b_couple = 0.0;
    }

    ThermalParams2 {
        a_cpu_per_s: a_cpu,
        b_cpu_c_per_j: b_cpu,
        a_batt_per_s: a_batt,
        b_couple_per_s: b_couple,
        t_amb_c: t_amb,
    }
}
