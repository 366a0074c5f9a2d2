//! Power-model calibration
//!
//! ## Overview
//!
//! Two-stage fit of the power decomposition model, mirroring how the data was
//! collected:
//!
//! 1. **Thermal stage** - per run, fit the configured thermal model and
//!    simulate the leak temperature over the run. The leak reference
//!    temperature becomes the median simulated leak temperature across the
//!    whole training fleet, so the leak coefficient is anchored at a typical
//!    operating point.
//! 2. **Electrical stage** - Huber-IRLS ridge regression of observed total
//!    power on `[1, P_screen, P_cpu, leak(T_hat)]`, restricted to the
//!    dominant operating mask (GPS ON and cellular ON). The heavy default
//!    ridge (`alpha = 2000`) reflects how collinear the proxies are within a
//!    scenario fleet; the Huber loss bounds the influence of contaminated
//!    runs. Plain ridge is available by clearing the `huber` option.
//! 3. **A/B offsets** - the GPS and cellular contributions are identified
//!    from designated ON/OFF run pairs, not from the regression: the offset
//!    is the difference of mean stage-2 residuals (OFF minus ON), clamped
//!    non-positive since switching a radio off cannot add power. Without a
//!    configured pair the offset stays zero.
//!
//! Prediction at evaluation time re-fits the thermal stage on the target
//! run's *observed* temperatures - temperatures are measured covariates, not
//! part of what the power model must generalize over.

use serde::{Deserialize, Serialize};

use soclab_core::power::{self, PowerModelParams};
use soclab_core::series;
use soclab_core::thermal::{ThermalModel, DEFAULT_LEAK_MIX_CPU};
use soclab_core::types::RunSeries;

use crate::huber::{fit_huber_irls_with_ridge, HuberConfig};
use crate::linalg::{ridge, DesignMatrix};
use crate::thermal::{fit_thermal_1state, fit_thermal_2state};
use crate::{FitError, FitResult};

/// Default ridge strength for the electrical stage.
pub const DEFAULT_ALPHA: f64 = 2000.0;

/// A designated ON/OFF run pair for a subsystem A/B offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbPair {
    /// Run collected with the subsystem ON
    pub on_run: String,
    /// Run collected with the subsystem OFF
    pub off_run: String,
}

/// Calibration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOptions {
    /// Ridge strength for the electrical stage
    pub alpha: f64,
    /// Leak-doubling interval, Celsius
    pub leak_doubling_c: f64,
    /// Thermal model generating the leak temperature
    pub thermal_model: ThermalModel,
    /// CPU share of the 2-state leak mix
    pub leak_mix_cpu: f64,
    /// Effective capacity handed to the SOC ODE, mAh
    pub c_eff_mah: f64,
    /// Robust electrical-stage settings; `None` falls back to plain ridge
    pub huber: Option<HuberConfig>,
    /// A/B pair identifying the GPS offset
    pub gps_ab: Option<AbPair>,
    /// A/B pair identifying the cellular offset
    pub cellular_ab: Option<AbPair>,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            leak_doubling_c: power::DEFAULT_LEAK_DOUBLING_C,
            thermal_model: ThermalModel::OneState,
            leak_mix_cpu: DEFAULT_LEAK_MIX_CPU,
            c_eff_mah: power::DEFAULT_C_EFF_MAH,
            huber: Some(HuberConfig::default()),
            gps_ab: None,
            cellular_ab: None,
        }
    }
}

impl CalibrationOptions {
    /// Set the electrical-stage ridge strength.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Select the thermal model.
    pub fn with_thermal_model(mut self, model: ThermalModel) -> Self {
        self.thermal_model = model;
        self
    }

    /// Name the GPS ON/OFF run pair.
    pub fn with_gps_ab(mut self, on_run: impl Into<String>, off_run: impl Into<String>) -> Self {
        self.gps_ab = Some(AbPair {
            on_run: on_run.into(),
            off_run: off_run.into(),
        });
        self
    }

    /// Name the cellular ON/OFF run pair.
    pub fn with_cellular_ab(
        mut self,
        on_run: impl Into<String>,
        off_run: impl Into<String>,
    ) -> Self {
        self.cellular_ab = Some(AbPair {
            on_run: on_run.into(),
            off_run: off_run.into(),
        });
        self
    }
}

/// Per-run thermal fit record for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalFitRow {
    /// Run the parameters were fitted on
    pub run_name: String,
    /// Which model produced the row
    pub thermal_model: ThermalModel,
    /// Ambient proxy, Celsius
    pub t_amb_c: f64,
    /// CPU-node rate, 1/s
    pub a_cpu_per_s: f64,
    /// CPU heating response, C/J
    pub b_cpu_c_per_j: f64,
    /// Battery-node rate, 1/s (2-state only)
    pub a_batt_per_s: Option<f64>,
    /// Battery-node coupling, 1/s (2-state only)
    pub b_couple_per_s: Option<f64>,
    /// CPU-node time constant, seconds
    pub tau_cpu_s: f64,
    /// Battery-node time constant, seconds (2-state only)
    pub tau_batt_s: Option<f64>,
    /// Leak mix used (2-state only)
    pub leak_mix_cpu: Option<f64>,
}

/// One run with its simulated leak temperature and model prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedRun {
    /// The fittable subset of the run (positive dt, observed power)
    pub series: RunSeries,
    /// Simulated leak temperature per sample
    pub t_leak_c: Vec<f64>,
    /// Predicted total power per sample, milliwatts
    pub power_pred_mw: Vec<f64>,
}

impl PredictedRun {
    /// Per-sample residuals, measured minus predicted.
    pub fn residuals_mw(&self) -> Vec<f64> {
        self.series
            .samples
            .iter()
            .zip(&self.power_pred_mw)
            .map(|(s, p)| s.power_total_mw.unwrap_or(f64::NAN) - p)
            .collect()
    }
}

/// Calibration result: fitted parameters plus the training-set artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Fitted power model
    pub params: PowerModelParams,
    /// Per-run thermal fits
    pub thermal: Vec<ThermalFitRow>,
    /// Training runs with in-sample predictions
    pub runs: Vec<PredictedRun>,
    /// Where the GPS offset came from (`None` when no pair was configured)
    pub gps_source: Option<AbPair>,
    /// Where the cellular offset came from
    pub cellular_source: Option<AbPair>,
}

/// Thermal stage: fit and simulate the leak temperature for one run.
fn leak_temperature(
    run: &RunSeries,
    options: &CalibrationOptions,
) -> (Vec<f64>, ThermalFitRow) {
    match options.thermal_model {
        ThermalModel::OneState => {
            let p = fit_thermal_1state(run);
            let traj = soclab_core::thermal::simulate_1state(run, &p);
            let row = ThermalFitRow {
                run_name: run.run_name.clone(),
                thermal_model: ThermalModel::OneState,
                t_amb_c: p.t_amb_c,
                a_cpu_per_s: p.a_per_s,
                b_cpu_c_per_j: p.b_c_per_j,
                a_batt_per_s: None,
                b_couple_per_s: None,
                tau_cpu_s: p.tau_s(),
                tau_batt_s: None,
                leak_mix_cpu: None,
            };
            (traj.t_leak_hat_c, row)
        }
        ThermalModel::TwoState => {
            let p = fit_thermal_2state(run);
            let traj = soclab_core::thermal::simulate_2state(run, &p, options.leak_mix_cpu);
            let row = ThermalFitRow {
                run_name: run.run_name.clone(),
                thermal_model: ThermalModel::TwoState,
                t_amb_c: p.t_amb_c,
                a_cpu_per_s: p.a_cpu_per_s,
                b_cpu_c_per_j: p.b_cpu_c_per_j,
                a_batt_per_s: Some(p.a_batt_per_s),
                b_couple_per_s: Some(p.b_couple_per_s),
                tau_cpu_s: p.tau_cpu_s(),
                tau_batt_s: Some(p.tau_batt_s()),
                leak_mix_cpu: Some(options.leak_mix_cpu),
            };
            (traj.t_leak_hat_c, row)
        }
    }
}

/// Fit the power model on a fleet of runs.
pub fn fit_power_model(
    runs: &[RunSeries],
    options: &CalibrationOptions,
) -> FitResult<Calibration> {
    let gamma = power::leak_gamma_per_c(options.leak_doubling_c);

    // Thermal stage over the fittable subset of every run.
    let mut prepared: Vec<(RunSeries, Vec<f64>)> = Vec::new();
    let mut thermal_rows: Vec<ThermalFitRow> = Vec::new();
    for run in runs {
        let mut fittable = run.retain_fittable();
        if fittable.is_empty() {
            log::debug!("calibration: skipping {} (no fittable samples)", run.run_name);
            continue;
        }
        fittable.sort_by_time();
        let (t_leak, row) = leak_temperature(&fittable, options);
        thermal_rows.push(row);
        prepared.push((fittable, t_leak));
    }
    thermal_rows.sort_by(|a, b| a.run_name.cmp(&b.run_name));

    if prepared.is_empty() {
        return Err(FitError::NotEnoughRows { needed: 1, got: 0 });
    }

    // Leak anchor: median simulated leak temperature across the fleet.
    let all_leak: Vec<f64> = prepared
        .iter()
        .flat_map(|(_, t)| t.iter().copied())
        .collect();
    let t_ref = series::median(&all_leak).unwrap_or(soclab_core::thermal::FALLBACK_T_AMB_C);

    // Electrical stage on the dominant operating mask.
    let mut x = DesignMatrix::new(4);
    let mut y = Vec::new();
    for (run, t_leak) in &prepared {
        for (s, t) in run.samples.iter().zip(t_leak) {
            if !(s.gps_on && s.cellular_on) {
                continue;
            }
            let p_total = match s.power_total_mw {
                Some(p) if p.is_finite() => p,
                _ => continue,
            };
            let p_screen = s.power_screen_mw.filter(|v| v.is_finite()).unwrap_or(0.0);
            let p_cpu = s.power_cpu_mw.filter(|v| v.is_finite()).unwrap_or(0.0);
            let leak = (gamma * (t - t_ref)).exp();
            x.push_row(&[1.0, p_screen, p_cpu, leak]);
            y.push(p_total);
        }
    }
    if y.len() < x.ncols() + 1 {
        return Err(FitError::NotEnoughRows {
            needed: x.ncols() + 1,
            got: y.len(),
        });
    }
    // Robust by default: contaminated runs (background sync, throttling)
    // otherwise drag every coefficient.
    let beta = match &options.huber {
        Some(config) => fit_huber_irls_with_ridge(&x, &y, options.alpha, config)?,
        None => ridge(&x, &y, options.alpha)?,
    };

    let mut params = PowerModelParams {
        p_base_mw: beta[0],
        k_screen: beta[1],
        k_cpu: beta[2],
        k_leak_mw: beta[3],
        leak_gamma_per_c: gamma,
        leak_tref_c: t_ref,
        k_gps_off_mw: 0.0,
        k_cellular_off_mw: 0.0,
        c_eff_mah: options.c_eff_mah,
    };

    // Per-run mean residuals of the base prediction (offsets not yet applied),
    // computed up front so the offset clamps below can mutate `params`.
    let mut mean_resid: std::collections::BTreeMap<String, f64> =
        std::collections::BTreeMap::new();
    for (run, t_leak) in &prepared {
        let resid = run.samples.iter().zip(t_leak).map(|(s, &t)| {
            let b = params.decompose(s, t);
            let p0 = b.base_mw + b.screen_mw + b.cpu_mw + b.leak_mw;
            s.power_total_mw.unwrap_or(f64::NAN) - p0
        });
        if let Some(m) = series::mean_finite(resid) {
            mean_resid.insert(run.run_name.clone(), m);
        }
    }
    let mean_resid_of = |name: &str| mean_resid.get(name).copied();

    let mut gps_source = None;
    if let Some(pair) = &options.gps_ab {
        match (mean_resid_of(&pair.on_run), mean_resid_of(&pair.off_run)) {
            (Some(r_on), Some(r_off)) => {
                params.k_gps_off_mw = (r_off - r_on).min(0.0);
                gps_source = Some(pair.clone());
            }
            _ => log::warn!("calibration: GPS A/B pair not found in training runs"),
        }
    }
    let mut cellular_source = None;
    if let Some(pair) = &options.cellular_ab {
        match (mean_resid_of(&pair.on_run), mean_resid_of(&pair.off_run)) {
            (Some(r_on), Some(r_off)) => {
                params.k_cellular_off_mw = (r_off - r_on).min(0.0);
                cellular_source = Some(pair.clone());
            }
            _ => log::warn!("calibration: cellular A/B pair not found in training runs"),
        }
    }

    // Final in-sample predictions with offsets applied.
    let predicted = prepared
        .into_iter()
        .map(|(series, t_leak)| {
            let power_pred_mw = params.predict_series_mw(&series.samples, &t_leak);
            PredictedRun {
                series,
                t_leak_c: t_leak,
                power_pred_mw,
            }
        })
        .collect();

    Ok(Calibration {
        params,
        thermal: thermal_rows,
        runs: predicted,
        gps_source,
        cellular_source,
    })
}

/// Predict a fleet of runs with fitted parameters.
///
/// The thermal stage is re-fitted per run on observed temperatures; the
/// electrical parameters come from `params` untouched.
pub fn predict_power(
    runs: &[RunSeries],
    params: &PowerModelParams,
    options: &CalibrationOptions,
) -> Vec<PredictedRun> {
    let mut out = Vec::new();
    for run in runs {
        let mut fittable = run.retain_fittable();
        if fittable.is_empty() {
            continue;
        }
        fittable.sort_by_time();
        let (t_leak, _) = leak_temperature(&fittable, options);
        let power_pred_mw = params.predict_series_mw(&fittable.samples, &t_leak);
        out.push(PredictedRun {
            series: fittable,
            t_leak_c: t_leak,
            power_pred_mw,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use soclab_core::types::Sample;

    /// Fleet whose observed power follows a known decomposition exactly.
    fn synthetic_fleet(truth: &PowerModelParams) -> Vec<RunSeries> {
        let mut runs = Vec::new();
        for (ri, (screen_base, cpu_base)) in
            [(0.0, 200.0), (150.0, 600.0), (400.0, 1200.0), (80.0, 2500.0)]
                .iter()
                .enumerate()
        {
            let mut run = RunSeries::new(format!("run{ri}"), format!("S{ri}"));
            for i in 0..120 {
                let t_c = 38.0 + (i as f64 * 0.13).sin() * 3.0 + ri as f64;
                let screen = screen_base + (i % 7) as f64 * 10.0;
                let cpu = cpu_base + (i % 11) as f64 * 25.0;
                let mut s = Sample {
                    t_s: i as f64 * 10.0,
                    dt_s: 10.0,
                    temp_cpu_c: Some(t_c),
                    temp_batt_c: Some(t_c - 5.0),
                    power_screen_mw: Some(screen),
                    power_cpu_mw: Some(cpu),
                    gps_on: true,
                    cellular_on: true,
                    soc_pct: Some(90.0 - i as f64 * 0.05),
                    voltage_mv: Some(4100.0),
                    ..Sample::default()
                };
                // Observed power from the ground-truth decomposition with the
                // leak evaluated at the *observed* temperature; the thermal
                // stage will track it closely on clean data.
                let p = truth.predict_mw(&s, t_c);
                s.power_total_mw = Some(p);
                run.samples.push(s);
            }
            runs.push(run);
        }
        runs
    }

    fn truth() -> PowerModelParams {
        PowerModelParams {
            p_base_mw: 450.0,
            k_screen: 1.05,
            k_cpu: 0.92,
            k_leak_mw: 0.0, // keep the exact-recovery test linear
            leak_gamma_per_c: power::leak_gamma_per_c(10.0),
            leak_tref_c: 40.0,
            k_gps_off_mw: 0.0,
            k_cellular_off_mw: 0.0,
            c_eff_mah: power::DEFAULT_C_EFF_MAH,
        }
    }

    #[test]
    fn recovers_linear_coefficients() {
        let truth = truth();
        let runs = synthetic_fleet(&truth);
        // Light ridge so the synthetic coefficients come back unshrunk.
        let options = CalibrationOptions::default().with_alpha(1e-6);
        let cal = fit_power_model(&runs, &options).unwrap();
        assert!((cal.params.k_screen - truth.k_screen).abs() < 0.02);
        assert!((cal.params.k_cpu - truth.k_cpu).abs() < 0.02);
        assert!((cal.params.p_base_mw - truth.p_base_mw).abs() < 30.0);
    }

    #[test]
    fn in_sample_residuals_are_small() {
        let runs = synthetic_fleet(&truth());
        let options = CalibrationOptions::default().with_alpha(1e-6);
        let cal = fit_power_model(&runs, &options).unwrap();
        for run in &cal.runs {
            for r in run.residuals_mw() {
                assert!(r.abs() < 20.0, "residual {r}");
            }
        }
    }

    #[test]
    fn gps_offset_from_ab_pair_is_nonpositive() {
        let truth = truth();
        let mut runs = synthetic_fleet(&truth);
        // Clone run0 into an OFF twin drawing 120 mW less.
        let mut off = runs[0].clone();
        off.run_name = "run0_gpsoff".to_string();
        off.scenario = "S0-off".to_string();
        for s in &mut off.samples {
            s.gps_on = false;
            if let Some(p) = s.power_total_mw.as_mut() {
                *p -= 120.0;
            }
        }
        runs.push(off);

        let options = CalibrationOptions::default()
            .with_alpha(1e-6)
            .with_gps_ab("run0", "run0_gpsoff");
        let cal = fit_power_model(&runs, &options).unwrap();
        assert!(cal.gps_source.is_some());
        assert!(cal.params.k_gps_off_mw <= 0.0);
        assert!((cal.params.k_gps_off_mw + 120.0).abs() < 15.0);
    }

    #[test]
    fn missing_ab_pair_leaves_offset_zero() {
        let runs = synthetic_fleet(&truth());
        let options = CalibrationOptions::default()
            .with_alpha(1e-6)
            .with_gps_ab("nope-on", "nope-off");
        let cal = fit_power_model(&runs, &options).unwrap();
        assert_eq!(cal.params.k_gps_off_mw, 0.0);
        assert!(cal.gps_source.is_none());
    }

    #[test]
    fn prediction_generalizes_to_unseen_run() {
        let truth = truth();
        let runs = synthetic_fleet(&truth);
        let options = CalibrationOptions::default().with_alpha(1e-6);
        let cal = fit_power_model(&runs[..3], &options).unwrap();
        let pred = predict_power(&runs[3..], &cal.params, &options);
        assert_eq!(pred.len(), 1);
        let resid = pred[0].residuals_mw();
        let mae = resid.iter().map(|r| r.abs()).sum::<f64>() / resid.len() as f64;
        assert!(mae < 30.0, "mae {mae}");
    }

    #[test]
    fn robust_fit_shrugs_off_contaminated_samples() {
        let truth = truth();
        let mut runs = synthetic_fleet(&truth);
        // Benign measurement jitter everywhere (keeps the robust residual
        // scale honest)...
        for (ri, run) in runs.iter_mut().enumerate() {
            for (i, s) in run.samples.iter_mut().enumerate() {
                if let Some(p) = s.power_total_mw.as_mut() {
                    *p += ((i * 37 + ri * 11) % 13) as f64 - 6.0;
                }
            }
        }
        // ...plus gross spikes on every 8th sample of one run, the shape a
        // background sync burst leaves in the trace.
        for (i, s) in runs[1].samples.iter_mut().enumerate() {
            if i % 8 == 0 {
                if let Some(p) = s.power_total_mw.as_mut() {
                    *p += 4000.0;
                }
            }
        }

        let robust = fit_power_model(&runs, &CalibrationOptions::default().with_alpha(1e-6))
            .unwrap();
        let plain_options = CalibrationOptions {
            huber: None,
            ..CalibrationOptions::default().with_alpha(1e-6)
        };
        let plain = fit_power_model(&runs, &plain_options).unwrap();

        let robust_err = (robust.params.k_cpu - truth.k_cpu).abs();
        let plain_err = (plain.params.k_cpu - truth.k_cpu).abs();
        assert!(robust_err < plain_err, "robust {robust_err} vs plain {plain_err}");
        assert!(robust_err < 0.05, "robust k_cpu err {robust_err}");
    }

    #[test]
    fn empty_fleet_is_an_error() {
        let options = CalibrationOptions::default();
        assert!(matches!(
            fit_power_model(&[], &options),
            Err(FitError::NotEnoughRows { .. })
        ));
    }
}
