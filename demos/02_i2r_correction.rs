//! I²R correction demo: run-level residuals that hide a Joule loss term,
//! recovered under LOSO with non-negative coefficients.
//!
//! ```bash
//! cargo run --example 02_i2r_correction
//! ```

use soclab_core::resistance::RintModel;
use soclab_core::types::RunSummary;
use soclab_fit::i2r::{fit_i2r_loso, I2rOptions};
use soclab_fit::runlevel::RunLevelRow;
use soclab_report::report::i2r_report;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // True cell: 90 mOhm constant plus 60 mOhm at full depth of discharge.
    let (r0, r1) = (0.090, 0.060);

    let mut rows = Vec::new();
    for (si, scenario) in ["S1", "S2", "S3", "S4", "S5", "S6"].iter().enumerate() {
        for ri in 0..3 {
            let current_a = 0.18 + 0.12 * ri as f64 + 0.04 * si as f64;
            let soc_pct = 92.0 - 7.0 * ri as f64 - si as f64;
            let r_int = r0 + r1 * (1.0 - soc_pct / 100.0);
            let loss_mw = current_a * current_a * r_int * 1000.0;
            rows.push(RunLevelRow {
                summary: RunSummary {
                    run_name: format!("{scenario}_{ri}"),
                    scenario: scenario.to_string(),
                    battery_level0_pct: Some(soc_pct),
                    thermal_cpu0_c: Some(37.5),
                    trace_current_mean_ua: Some(current_a * 1e6),
                    trace_voltage_mean_v: Some(4.02),
                    qc_keep: true,
                    ..RunSummary::default()
                },
                p_meas_mean_mw: Some(870.0 + loss_mw),
                p_pred_mean_mw: Some(870.0),
            });
        }
    }

    let options = I2rOptions::default()
        .with_model(RintModel::R0Rsoc)
        .with_fit_scale(true);
    let outcome = fit_i2r_loso(&rows, &options)?;

    println!(
        "base:      n={:2}  mae={:6.2} mW  rmse={:6.2} mW",
        outcome.base.n, outcome.base.mae_mw, outcome.base.rmse_mw
    );
    println!(
        "corrected: n={:2}  mae={:6.2} mW  rmse={:6.2} mW",
        outcome.corrected.n, outcome.corrected.mae_mw, outcome.corrected.rmse_mw
    );
    println!("all folds physical: {}", outcome.all_folds_physical());
    println!();
    println!("{}", i2r_report(&outcome, &options));
    Ok(())
}
