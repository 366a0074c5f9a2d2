//! Markdown report rendering
//!
//! Every analysis stage ends in a human-readable Markdown report: QC verdict
//! listing, fold-by-fold evaluation, the I²R correction verdict and the
//! residual-correction triage. Tables are proper pipe tables; numbers carry
//! a fixed precision and non-finite values render as `nan` so a missing
//! observation is visible rather than blank.

use soclab_core::metrics::ResidualStats;
use soclab_core::qc::ScenarioRepeatability;
use soclab_core::types::RunSummary;
use soclab_fit::ancova::AncovaOutcome;
use soclab_fit::eval::EvalOutcome;
use soclab_fit::i2r::{I2rOptions, I2rOutcome};
use soclab_fit::residual::ResidualCorrectionOutcome;

/// Format a float at fixed precision, `nan` for non-finite values.
pub fn fmt(v: f64, precision: usize) -> String {
    if v.is_finite() {
        format!("{v:.precision$}")
    } else {
        "nan".to_string()
    }
}

/// Minimal pipe-table builder.
#[derive(Debug, Clone, Default)]
pub struct MarkdownTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MarkdownTable {
    /// Start a table with the given header row.
    pub fn new<S: Into<String>, I: IntoIterator<Item = S>>(headers: I) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append one row; short rows are padded with empty cells.
    pub fn row<S: Into<String>, I: IntoIterator<Item = S>>(&mut self, cells: I) -> &mut Self {
        let mut row: Vec<String> = cells.into_iter().map(Into::into).collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
        self
    }

    /// Render as a Markdown pipe table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("| ");
        out.push_str(&self.headers.join(" | "));
        out.push_str(" |\n|");
        for _ in &self.headers {
            out.push_str(" --- |");
        }
        out.push('\n');
        for row in &self.rows {
            out.push_str("| ");
            out.push_str(&row.join(" | "));
            out.push_str(" |\n");
        }
        out
    }
}

fn stats_table(entries: &[(&str, &ResidualStats)]) -> String {
    let mut table = MarkdownTable::new(["metric", "n", "mae_mW", "rmse_mW", "bias_mW"]);
    for (label, s) in entries {
        table.row([
            label.to_string(),
            s.n.to_string(),
            fmt(s.mae_mw, 1),
            fmt(s.rmse_mw, 1),
            fmt(s.bias_mw, 1),
        ]);
    }
    table.render()
}

/// QC report: policy outcome per run plus scenario repeatability.
pub fn qc_report(runs: &[RunSummary], repeatability: &[ScenarioRepeatability]) -> String {
    let kept = runs.iter().filter(|r| r.qc_keep).count();

    let mut md = String::new();
    md.push_str("# Run QC Report\n\n");
    md.push_str(&format!("Kept {kept}/{} runs.\n\n", runs.len()));

    md.push_str("## Verdicts\n\n");
    let mut table = MarkdownTable::new([
        "run_name",
        "scenario",
        "soc0_pct",
        "voltage0_mV",
        "thermal_cpu0_C",
        "keep",
        "reject_reasons",
    ]);
    for run in runs {
        table.row([
            run.run_name.clone(),
            run.scenario.clone(),
            fmt(run.battery_level0_pct.unwrap_or(f64::NAN), 0),
            fmt(run.battery_voltage0_mv.unwrap_or(f64::NAN), 0),
            fmt(run.thermal_cpu0_c.unwrap_or(f64::NAN), 1),
            if run.qc_keep { "1" } else { "0" }.to_string(),
            run.qc_reject_reasons.clone(),
        ]);
    }
    md.push_str(&table.render());

    if !repeatability.is_empty() {
        md.push_str("\n## Scenario repeatability (worst first)\n\n");
        let mut table = MarkdownTable::new([
            "scenario",
            "n",
            "p_mean_mW",
            "p_std_mW",
            "cv",
            "ratio_max_min",
        ]);
        for r in repeatability {
            table.row([
                r.scenario.clone(),
                r.n.to_string(),
                fmt(r.power_mean_mw, 1),
                fmt(r.power_std_mw, 1),
                fmt(r.cv, 3),
                fmt(r.ratio_max_min, 3),
            ]);
        }
        md.push_str(&table.render());
    }
    md
}

/// Evaluation report: one row per fold plus the worst held-out runs.
pub fn eval_report(outcome: &EvalOutcome) -> String {
    let mut md = String::new();
    md.push_str("# Holdout Evaluation Report\n\n");

    md.push_str("## Folds\n\n");
    let mut table = MarkdownTable::new([
        "split",
        "n_train_runs",
        "n_test_runs",
        "sample_mae_mW",
        "p_base_mW",
        "k_screen",
        "k_cpu",
        "k_leak_mW",
    ]);
    for s in &outcome.summaries {
        table.row([
            s.split.clone(),
            s.n_train_runs.to_string(),
            s.n_test_runs.to_string(),
            fmt(s.power_sample_mae_mw, 1),
            fmt(s.params.p_base_mw, 1),
            fmt(s.params.k_screen, 3),
            fmt(s.params.k_cpu, 3),
            fmt(s.params.k_leak_mw, 1),
        ]);
    }
    md.push_str(&table.render());

    md.push_str("\n## Held-out runs (worst SOC tracking first)\n\n");
    let mut metrics = outcome.run_metrics.clone();
    metrics.sort_by(|a, b| {
        b.rmse_soc_pct
            .partial_cmp(&a.rmse_soc_pct)
            .unwrap_or(core::cmp::Ordering::Equal)
    });
    let mut table = MarkdownTable::new([
        "split",
        "run_name",
        "scenario",
        "p_meas_mean_mW",
        "p_pred_mean_mW",
        "p_rel_err_pct",
        "rmse_soc_pct",
    ]);
    for m in &metrics {
        table.row([
            m.split.clone(),
            m.run_name.clone(),
            m.scenario.clone(),
            fmt(m.p_meas_mean_mw, 1),
            fmt(m.p_pred_mean_mw, 1),
            fmt(m.p_rel_err_pct, 2),
            fmt(m.rmse_soc_pct, 2),
        ]);
    }
    md.push_str(&table.render());
    md
}

/// I²R correction report: configuration, per-fold coefficients, error
/// summary before/after, and the residual correlations.
pub fn i2r_report(outcome: &I2rOutcome, options: &I2rOptions) -> String {
    let mut md = String::new();
    md.push_str("# I2R Loss Correction Report (LOSO)\n\n");
    md.push_str(&format!(
        "R_int model: `{:?}` (Tref = {} C); fit_scale = {}; qc_keep_only = {}\n\n",
        options.model, fmt(options.tref_c, 1), options.fit_scale, options.use_only_qc_keep
    ));

    md.push_str("## Error summary\n\n");
    md.push_str(&stats_table(&[
        ("base", &outcome.base),
        ("i2r_corrected", &outcome.corrected),
    ]));

    md.push_str("\n## Residual correlations\n\n");
    let mut table = MarkdownTable::new(["covariate", "r_before", "r_after"]);
    for c in &outcome.correlations {
        table.row([
            c.covariate.clone(),
            fmt(c.r_before, 3),
            fmt(c.r_after, 3),
        ]);
    }
    md.push_str(&table.render());

    md.push_str("\n## Coefficients by held-out scenario\n\n");
    let mut table = MarkdownTable::new(["held_out", "n_train", "scale", "coeffs_ohm"]);
    for fold in &outcome.folds {
        let coeffs = fold
            .params
            .coeffs
            .iter()
            .map(|c| fmt(*c, 4))
            .collect::<Vec<_>>()
            .join(", ");
        table.row([
            fold.held_out_scenario.clone(),
            fold.n_train.to_string(),
            fmt(fold.params.scale, 3),
            coeffs,
        ]);
    }
    md.push_str(&table.render());
    md
}

/// Residual-correction report.
pub fn residual_report(outcome: &ResidualCorrectionOutcome) -> String {
    let mut md = String::new();
    md.push_str("# Residual Correction Report (LOSO)\n\n");

    md.push_str("## Summary\n\n");
    md.push_str(&stats_table(&[
        ("base", &outcome.base),
        ("corrected", &outcome.corrected),
    ]));

    let topn = 10;
    if !outcome.scenario_base.is_empty() {
        md.push_str("\n## Worst scenarios by RMSE (base vs corrected)\n\n");
        let mut table =
            MarkdownTable::new(["metric", "scenario", "n", "mae_mW", "rmse_mW", "bias_mW"]);
        for (label, list) in [
            ("base", &outcome.scenario_base),
            ("corrected", &outcome.scenario_corrected),
        ] {
            for s in list.iter().take(topn) {
                table.row([
                    label.to_string(),
                    s.scenario.clone(),
                    s.stats.n.to_string(),
                    fmt(s.stats.mae_mw, 1),
                    fmt(s.stats.rmse_mw, 1),
                    fmt(s.stats.bias_mw, 1),
                ]);
            }
        }
        md.push_str(&table.render());
    }
    md
}

/// Covariate-adjustment report: raw vs adjusted scenario means.
pub fn ancova_report(outcome: &AncovaOutcome) -> String {
    let mut md = String::new();
    md.push_str("# Scenario Covariate Adjustment Report\n\n");
    md.push_str(&format!("Rows fitted: {}\n\n", outcome.n_fit));

    if let Some(baseline) = &outcome.baseline_scenario {
        md.push_str(&format!("Baseline scenario (dropped dummy): `{baseline}`\n\n"));
    }

    md.push_str("## Reference state\n\n");
    for (name, value) in &outcome.reference {
        md.push_str(&format!("- {name}: {}\n", fmt(*value, 2)));
    }

    md.push_str("\n## Raw vs adjusted means\n\n");
    let mut table = MarkdownTable::new([
        "scenario",
        "n",
        "raw_mean_mW",
        "adjusted_mean_mW",
        "delta_mW",
    ]);
    for raw in &outcome.raw {
        let adjusted = outcome
            .adjusted
            .iter()
            .find(|a| a.scenario == raw.scenario)
            .map(|a| a.adjusted_mean_mw)
            .unwrap_or(f64::NAN);
        table.row([
            raw.scenario.clone(),
            raw.n.to_string(),
            fmt(raw.raw_mean_mw, 1),
            fmt(adjusted, 1),
            fmt(raw.raw_mean_mw - adjusted, 1),
        ]);
    }
    md.push_str(&table.render());

    md.push_str("\n## Coefficients\n\n");
    let mut table = MarkdownTable::new(["term", "coef"]);
    for (term, coef) in &outcome.coefficients {
        table.row([term.clone(), fmt(*coef, 4)]);
    }
    md.push_str(&table.render());
    md
}
