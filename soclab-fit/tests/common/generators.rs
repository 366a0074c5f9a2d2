//! Synthetic telemetry generators with known ground truth
//!
//! Builds fleets whose observed power follows a chosen decomposition exactly
//! (plus optional Gaussian-ish noise), so integration tests can assert that
//! calibration recovers what generated the data. The reported SOC drains
//! consistently with the ODE, making SOC-tracking metrics meaningful too.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use soclab_core::power::{leak_gamma_per_c, PowerModelParams, DEFAULT_C_EFF_MAH};
use soclab_core::types::{RunSeries, RunSummary, Sample};

/// Ground truth used by the generated fleets.
pub fn ground_truth() -> PowerModelParams {
    PowerModelParams {
        p_base_mw: 480.0,
        k_screen: 1.08,
        k_cpu: 0.95,
        k_leak_mw: 0.0,
        leak_gamma_per_c: leak_gamma_per_c(10.0),
        leak_tref_c: 40.0,
        k_gps_off_mw: 0.0,
        k_cellular_off_mw: 0.0,
        c_eff_mah: DEFAULT_C_EFF_MAH,
    }
}

/// Scenario recipe for [`fleet`].
pub struct ScenarioSpec {
    /// Scenario label
    pub scenario: &'static str,
    /// Screen proxy base, milliwatts
    pub screen_mw: f64,
    /// CPU proxy base, milliwatts
    pub cpu_mw: f64,
    /// Runs to generate
    pub n_runs: usize,
}

/// Default five-scenario recipe covering idle to heavy load.
pub fn default_specs() -> Vec<ScenarioSpec> {
    vec![
        ScenarioSpec { scenario: "S1_idle", screen_mw: 0.0, cpu_mw: 150.0, n_runs: 2 },
        ScenarioSpec { scenario: "S2_b30", screen_mw: 110.0, cpu_mw: 400.0, n_runs: 2 },
        ScenarioSpec { scenario: "S2_b128", screen_mw: 420.0, cpu_mw: 400.0, n_runs: 2 },
        ScenarioSpec { scenario: "S3_cpu", screen_mw: 0.0, cpu_mw: 2200.0, n_runs: 2 },
        ScenarioSpec { scenario: "S4_gps", screen_mw: 0.0, cpu_mw: 350.0, n_runs: 2 },
    ]
}

/// Generate a fleet of runs (and matching summaries) from a recipe.
///
/// `noise_mw` adds zero-mean uniform noise to the observed power; zero keeps
/// the data exact. The RNG is seeded, so fleets are reproducible.
pub fn fleet(
    truth: &PowerModelParams,
    specs: &[ScenarioSpec],
    samples_per_run: usize,
    noise_mw: f64,
    seed: u64,
) -> (Vec<RunSeries>, Vec<RunSummary>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut runs = Vec::new();
    let mut summaries = Vec::new();

    for spec in specs {
        for ri in 0..spec.n_runs {
            let run_name = format!("{}_{ri}", spec.scenario);
            let mut run = RunSeries::new(run_name.clone(), spec.scenario);

            let t0_c = 34.0 + rng.gen_range(0.0..6.0);
            let soc0 = 95.0 - rng.gen_range(0.0..15.0);
            let voltage0 = 4150.0 - (95.0 - soc0) * 8.0;

            let mut soc = soc0;
            let mut power_sum = 0.0;
            for i in 0..samples_per_run {
                let t_c = t0_c + (i as f64 * 0.17).sin() * 2.0 + i as f64 * 0.005;
                let voltage_mv = voltage0 - i as f64 * 0.05;
                let mut s = Sample {
                    t_s: i as f64 * 10.0,
                    dt_s: 10.0,
                    soc_pct: Some(soc),
                    voltage_mv: Some(voltage_mv),
                    temp_batt_c: Some(t_c - 4.5),
                    temp_cpu_c: Some(t_c),
                    brightness: Some(if spec.screen_mw > 0.0 { 128.0 } else { 0.0 }),
                    screen_on: spec.screen_mw > 0.0,
                    power_cpu_mw: Some(spec.cpu_mw + (i % 13) as f64 * 18.0),
                    power_screen_mw: Some(spec.screen_mw + (i % 5) as f64 * 4.0),
                    gps_on: true,
                    cellular_on: true,
                    ..Sample::default()
                };
                let clean = truth.predict_mw(&s, t_c);
                let noise = if noise_mw > 0.0 {
                    rng.gen_range(-noise_mw..noise_mw)
                } else {
                    0.0
                };
                s.power_total_mw = Some(clean + noise);
                power_sum += clean + noise;

                soc -= clean / (voltage_mv / 1000.0 * 3600.0 * truth.c_eff_mah) * 10.0 * 100.0;
                run.samples.push(s);
            }

            let mean_power = power_sum / samples_per_run as f64;
            let current_ua = mean_power / (voltage0 / 1000.0) * 1000.0;
            summaries.push(RunSummary {
                run_name,
                scenario: spec.scenario.to_string(),
                battery_level0_pct: Some(soc0),
                battery_voltage0_mv: Some(voltage0),
                thermal_cpu0_c: Some(t0_c),
                thermal_batt0_c: Some(t0_c - 4.5),
                thermal_status0: Some(0.0),
                battery_plugged0: Some(0.0),
                brightness0: Some(if spec.screen_mw > 0.0 { 128.0 } else { 0.0 }),
                has_trace: true,
                trace_power_mean_mw: Some(mean_power),
                trace_current_mean_ua: Some(current_ua),
                trace_voltage_mean_v: Some(voltage0 / 1000.0),
                trace_discharge_mah: Some(current_ua / 1000.0 / 2.0),
                trace_duration_s: Some(samples_per_run as f64 * 10.0),
                qc_keep: false,
                qc_reject_reasons: String::new(),
            });
            runs.push(run);
        }
    }
    (runs, summaries)
}
