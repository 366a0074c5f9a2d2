//! End-to-end demo: synthesize a small study, run the full analysis and
//! write every artifact under `artifacts/demo/`.
//!
//! ```bash
//! cargo run --example 01_end_to_end
//! ```

use soclab_core::power::{leak_gamma_per_c, PowerModelParams};
use soclab_core::types::{RunSeries, RunSummary, Sample};
use soclab_fit::EvalMode;
use soclab_report::pipeline::{run_analysis, write_artifacts, AnalysisConfig};

fn truth() -> PowerModelParams {
    PowerModelParams {
        p_base_mw: 510.0,
        k_screen: 1.05,
        k_cpu: 0.93,
        k_leak_mw: 0.0,
        leak_gamma_per_c: leak_gamma_per_c(10.0),
        leak_tref_c: 40.0,
        k_gps_off_mw: 0.0,
        k_cellular_off_mw: 0.0,
        c_eff_mah: 4410.0,
    }
}

fn synth_run(name: &str, scenario: &str, screen: f64, cpu: f64, soc0: f64) -> (RunSeries, RunSummary) {
    let truth = truth();
    let mut run = RunSeries::new(name, scenario);
    let voltage0 = 4120.0;
    let mut soc = soc0;
    let mut power_sum = 0.0;
    let n = 60;
    for i in 0..n {
        let t_c = 36.0 + (i as f64 * 0.19).sin() * 2.5;
        let mut s = Sample {
            t_s: i as f64 * 10.0,
            dt_s: 10.0,
            soc_pct: Some(soc),
            voltage_mv: Some(voltage0 - i as f64 * 0.04),
            temp_batt_c: Some(t_c - 4.0),
            temp_cpu_c: Some(t_c),
            screen_on: screen > 0.0,
            power_screen_mw: Some(screen + (i % 5) as f64 * 6.0),
            power_cpu_mw: Some(cpu + (i % 9) as f64 * 14.0),
            gps_on: true,
            cellular_on: true,
            ..Sample::default()
        };
        let p = truth.predict_mw(&s, t_c);
        s.power_total_mw = Some(p);
        power_sum += p;
        soc -= p / (voltage0 / 1000.0 * 3600.0 * truth.c_eff_mah) * 10.0 * 100.0;
        run.samples.push(s);
    }

    let mean_power = power_sum / n as f64;
    let current_ua = mean_power / (voltage0 / 1000.0) * 1000.0;
    let summary = RunSummary {
        run_name: name.to_string(),
        scenario: scenario.to_string(),
        battery_level0_pct: Some(soc0),
        battery_voltage0_mv: Some(voltage0),
        thermal_cpu0_c: Some(36.0),
        thermal_batt0_c: Some(32.0),
        thermal_status0: Some(0.0),
        battery_plugged0: Some(0.0),
        has_trace: true,
        trace_power_mean_mw: Some(mean_power),
        trace_current_mean_ua: Some(current_ua),
        trace_voltage_mean_v: Some(voltage0 / 1000.0),
        trace_duration_s: Some(n as f64 * 10.0),
        ..RunSummary::default()
    };
    (run, summary)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let specs = [
        ("S1_idle_0", "S1_idle", 0.0, 170.0, 91.0),
        ("S1_idle_1", "S1_idle", 0.0, 175.0, 87.0),
        ("S2_b30_0", "S2_b30", 115.0, 410.0, 85.0),
        ("S2_b128_0", "S2_b128", 440.0, 410.0, 89.0),
        ("S3_cpu_0", "S3_cpu", 0.0, 2150.0, 86.0),
        ("S1_low_0", "S1_low", 0.0, 190.0, 28.0), // rejected by QC
    ];

    let mut runs = Vec::new();
    let mut summaries = Vec::new();
    for (name, scenario, screen, cpu, soc0) in specs {
        let (run, summary) = synth_run(name, scenario, screen, cpu, soc0);
        runs.push(run);
        summaries.push(summary);
    }

    let mut config = AnalysisConfig::default();
    config.eval.mode = EvalMode::LeaveOneScenarioOut;
    config.eval.calibration.alpha = 1e-6;

    let artifacts = run_analysis(&runs, summaries, &config)?;

    println!("fitted params:");
    println!("  p_base   = {:8.1} mW", artifacts.params.p_base_mw);
    println!("  k_screen = {:8.3}", artifacts.params.k_screen);
    println!("  k_cpu    = {:8.3}", artifacts.params.k_cpu);
    println!("  k_leak   = {:8.1} mW", artifacts.params.k_leak_mw);
    println!();
    for summary in &artifacts.eval.summaries {
        println!(
            "{:28} sample MAE = {:6.1} mW",
            summary.split, summary.power_sample_mae_mw
        );
    }

    let out_dir = std::path::Path::new("artifacts/demo");
    let paths = write_artifacts(&artifacts, out_dir)?;
    println!("\nwrote {} artifacts:", paths.len());
    for path in paths {
        println!("  {}", path.display());
    }
    Ok(())
}
