//! End-to-end: CSV in, artifacts out.
//!
//! Builds a synthetic study as CSV text, ingests it through the documented
//! schemas, runs the full analysis and checks both the artifacts on disk and
//! the pipeline-level invariants (QC exclusion, physical I²R folds).

use std::fmt::Write as _;

use soclab_core::power::{leak_gamma_per_c, PowerModelParams};
use soclab_report::pipeline::{run_analysis, write_artifacts, AnalysisConfig};
use soclab_report::{read_model_input, read_run_summaries};

fn truth() -> PowerModelParams {
    PowerModelParams {
        p_base_mw: 520.0,
        k_screen: 1.0,
        k_cpu: 1.0,
        k_leak_mw: 0.0,
        leak_gamma_per_c: leak_gamma_per_c(10.0),
        leak_tref_c: 40.0,
        k_gps_off_mw: 0.0,
        k_cellular_off_mw: 0.0,
        c_eff_mah: 4410.0,
    }
}

/// Render a synthetic study as (model_input_csv, run_summary_csv).
///
/// One run per scenario plus one doomed low-SOC run that QC must reject.
fn study_csvs() -> (String, String) {
    let truth = truth();
    let specs: [(&str, &str, f64, f64, f64); 5] = [
        ("S1_idle_0", "S1_idle", 0.0, 180.0, 88.0),
        ("S2_b30_0", "S2_b30", 120.0, 420.0, 84.0),
        ("S2_b128_0", "S2_b128", 430.0, 420.0, 90.0),
        ("S3_cpu_0", "S3_cpu", 0.0, 2100.0, 86.0),
        ("S1_low_0", "S1_low", 0.0, 200.0, 31.0), // QC reject: soc < 50
    ];

    let mut samples = String::from(
        "run_name,scenario,t_s,dt_s,soc_pct,voltage_mV,temperature_C,temperature_cpu_C,\
brightness,display_state,power_total_mW,power_cpu_mW,power_screen_mW,charge_counter_uAh,\
is_gps_on,cellular_on\n",
    );
    let mut summaries = String::from(
        "run_name,scenario,battery_level0_pct,battery_voltage0_mV,thermal_cpu0_C,\
thermal_batt0_C,thermal_status0,battery_plugged0,brightness0,has_trace,trace_power_mean_mW,\
trace_current_mean_uA,trace_voltage_mean_V,trace_discharge_mAh,trace_duration_s,\
qc_keep,qc_reject_reasons\n",
    );

    for (run_name, scenario, screen, cpu, soc0) in specs {
        let voltage0 = 4100.0;
        let t0 = 36.0;
        let mut soc = soc0;
        let mut power_sum = 0.0;
        let n = 40;
        for i in 0..n {
            let t_c = t0 + (i as f64 * 0.2).sin() * 2.0;
            let screen_i = screen + (i % 5) as f64 * 5.0;
            let cpu_i = cpu + (i % 9) as f64 * 15.0;
            let display = if screen > 0.0 { "ON" } else { "OFF" };
            let sample = soclab_core::types::Sample {
                power_screen_mw: Some(screen_i),
                power_cpu_mw: Some(cpu_i),
                gps_on: true,
                cellular_on: true,
                ..Default::default()
            };
            let p = truth.predict_mw(&sample, t_c);
            power_sum += p;
            writeln!(
                samples,
                "{run_name},{scenario},{t},{dt},{soc:.3},{v:.1},{tb:.2},{tc:.2},{br},{display},\
{p:.2},{cpu_i:.1},{screen_i:.1},{cc},1,1",
                t = i * 10,
                dt = 10,
                v = voltage0 - i as f64 * 0.05,
                tb = t_c - 4.0,
                tc = t_c,
                br = if screen > 0.0 { 128 } else { 0 },
                cc = 2_000_000 - i * 500,
            )
            .unwrap();
            soc -= p / (voltage0 / 1000.0 * 3600.0 * truth.c_eff_mah) * 10.0 * 100.0;
        }

        let mean_power = power_sum / n as f64;
        let current_ua = mean_power / (voltage0 / 1000.0) * 1000.0;
        writeln!(
            summaries,
            "{run_name},{scenario},{soc0},{voltage0},{t0},{tb},0,0,{br},1,{p:.2},{i:.0},\
{v:.3},{q:.2},{dur},,",
            tb = t0 - 4.0,
            br = if screen > 0.0 { 128 } else { 0 },
            p = mean_power,
            i = current_ua,
            v = voltage0 / 1000.0,
            q = current_ua / 1000.0 / 2.0,
            dur = n * 10,
        )
        .unwrap();
    }
    (samples, summaries)
}

fn config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.eval.calibration.alpha = 1e-6;
    config.eval.mode = soclab_fit::EvalMode::LeaveOneScenarioOut;
    config.eval.min_run_samples = 30;
    config
}

#[test]
fn full_pipeline_from_csv_to_artifacts() {
    let (samples_csv, summary_csv) = study_csvs();
    let runs = read_model_input(samples_csv.as_bytes()).unwrap();
    let summaries = read_run_summaries(summary_csv.as_bytes()).unwrap();
    assert_eq!(runs.len(), 5);

    let artifacts = run_analysis(&runs, summaries, &config()).unwrap();

    // QC: the low-SOC run is rejected with the documented reason...
    let low = artifacts
        .summaries
        .iter()
        .find(|s| s.run_name == "S1_low_0")
        .unwrap();
    assert!(!low.qc_keep);
    assert_eq!(low.qc_reject_reasons, "soc<50.0");

    // ...and never reaches the reported metrics (use_only_qc_keep default).
    assert!(artifacts
        .eval
        .run_metrics
        .iter()
        .all(|m| m.run_name != "S1_low_0"));
    assert!(artifacts.i2r.runs.iter().all(|r| r.run_name != "S1_low_0"));

    // Four kept scenarios, one LOSO fold each.
    assert_eq!(artifacts.eval.summaries.len(), 4);

    // Exact synthetic data: the fleet fit recovers the generating model.
    assert!((artifacts.params.k_screen - 1.0).abs() < 0.05);
    assert!((artifacts.params.k_cpu - 1.0).abs() < 0.05);

    // I²R folds stay physical.
    assert!(artifacts.i2r.all_folds_physical());

    // Reports mention what they must.
    assert!(artifacts.reports.qc_md.contains("soc<50.0"));
    assert!(artifacts.reports.eval_md.contains("LOSO:"));
    assert!(artifacts.reports.i2r_md.contains("## Error summary"));
}

#[test]
fn artifacts_land_on_disk() {
    let (samples_csv, summary_csv) = study_csvs();
    let runs = read_model_input(samples_csv.as_bytes()).unwrap();
    let summaries = read_run_summaries(summary_csv.as_bytes()).unwrap();
    let artifacts = run_analysis(&runs, summaries, &config()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let paths = write_artifacts(&artifacts, dir.path()).unwrap();
    assert_eq!(paths.len(), 9);
    for path in &paths {
        assert!(path.exists(), "{} missing", path.display());
        assert!(std::fs::metadata(path).unwrap().len() > 0);
    }

    // The emitted QC summary round-trips through the ingest schema.
    let reread =
        read_run_summaries(std::fs::File::open(dir.path().join("qc_run_summary.csv")).unwrap())
            .unwrap();
    assert_eq!(reread.len(), artifacts.summaries.len());
    let low = reread.iter().find(|s| s.run_name == "S1_low_0").unwrap();
    assert!(!low.qc_keep);
    assert!(low.qc_reject_reasons.contains("soc<50.0"));
}

#[test]
fn qc_override_includes_rejected_runs() {
    let (samples_csv, summary_csv) = study_csvs();
    let runs = read_model_input(samples_csv.as_bytes()).unwrap();
    let summaries = read_run_summaries(summary_csv.as_bytes()).unwrap();

    let mut cfg = config();
    cfg.use_only_qc_keep = false;
    cfg.i2r.use_only_qc_keep = false;
    cfg.residual.use_only_qc_keep = false;

    let artifacts = run_analysis(&runs, summaries, &cfg).unwrap();
    assert!(artifacts
        .eval
        .run_metrics
        .iter()
        .any(|m| m.run_name == "S1_low_0"));
}
