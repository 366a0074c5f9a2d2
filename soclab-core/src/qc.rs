//! Run-level quality-control gating
//!
//! ## Overview
//!
//! Before any run contributes to calibration it passes through a QC policy:
//! threshold checks on the *start state* of the run. A run that begins at low
//! SOC, at sagging voltage or on a hot SoC measures a different battery than
//! the one being modelled (internal resistance and leakage both shift), so
//! such runs are excluded from fitting rather than silently biasing it.
//!
//! Rejection is a verdict, not an error: every rejected run records the full
//! list of human-readable reasons (`soc<50.0`, `thermal_cpu0>60.0C`, ...) so
//! the report can show *why* the fleet shrank. Missing covariates never
//! reject a run - only a finite, violating observation does.
//!
//! ## Policy defaults
//!
//! ```text
//! battery_level0_pct  >= 50      (upper half of the discharge curve)
//! battery_voltage0_mV >= 3700
//! thermal_cpu0_C      <= 60
//! thermal_status0     == 0       (opt-in)
//! battery_plugged0    == 0       (opt-in)
//! has_trace           == true    (opt-in)
//! ```
//!
//! The scenario repeatability table answers a different question: of the runs
//! that *did* pass, how consistent is the measured mean power within each
//! scenario? Scenarios with a large max/min ratio are collection problems,
//! not model problems.

use serde::{Deserialize, Serialize};

use crate::series;
use crate::types::RunSummary;

/// Threshold policy for run-level QC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcPolicy {
    /// Minimum start SOC, percent
    pub min_soc_pct: f64,
    /// Minimum start voltage, millivolts
    pub min_voltage_mv: f64,
    /// Maximum start CPU temperature, Celsius
    pub max_thermal_cpu_c: f64,
    /// Reject runs that start thermally throttled
    pub require_thermal_nominal: bool,
    /// Reject runs that start on the charger
    pub require_unplugged: bool,
    /// Reject runs without a power-counter trace
    pub require_trace: bool,
}

impl Default for QcPolicy {
    fn default() -> Self {
        Self {
            min_soc_pct: 50.0,
            min_voltage_mv: 3700.0,
            max_thermal_cpu_c: 60.0,
            require_thermal_nominal: false,
            require_unplugged: false,
            require_trace: false,
        }
    }
}

impl QcPolicy {
    /// Policy with all opt-in requirements enabled.
    pub fn strict() -> Self {
        Self {
            require_thermal_nominal: true,
            require_unplugged: true,
            require_trace: true,
            ..Self::default()
        }
    }

    /// Set the minimum start SOC.
    pub fn with_min_soc_pct(mut self, v: f64) -> Self {
        self.min_soc_pct = v;
        self
    }

    /// Set the minimum start voltage.
    pub fn with_min_voltage_mv(mut self, v: f64) -> Self {
        self.min_voltage_mv = v;
        self
    }

    /// Set the maximum start CPU temperature.
    pub fn with_max_thermal_cpu_c(mut self, v: f64) -> Self {
        self.max_thermal_cpu_c = v;
        self
    }

    /// Evaluate one run against the policy.
    pub fn evaluate(&self, run: &RunSummary) -> QcVerdict {
        let mut reasons: Vec<String> = Vec::new();

        if self.require_trace && !run.has_trace {
            reasons.push("no_trace".to_string());
        }

        if let Some(soc) = finite(run.battery_level0_pct) {
            if soc < self.min_soc_pct {
                reasons.push(format!("soc<{:?}", self.min_soc_pct));
            }
        }

        if let Some(v) = finite(run.battery_voltage0_mv) {
            if v < self.min_voltage_mv {
                reasons.push(format!("voltage<{:?}mV", self.min_voltage_mv));
            }
        }

        if let Some(t) = finite(run.thermal_cpu0_c) {
            if t > self.max_thermal_cpu_c {
                reasons.push(format!("thermal_cpu0>{:?}C", self.max_thermal_cpu_c));
            }
        }

        if self.require_thermal_nominal {
            if let Some(ts) = finite(run.thermal_status0) {
                if ts != 0.0 {
                    reasons.push("thermal_status!=0".to_string());
                }
            }
        }

        if self.require_unplugged {
            if let Some(bp) = finite(run.battery_plugged0) {
                if bp != 0.0 {
                    reasons.push("plugged".to_string());
                }
            }
        }

        QcVerdict {
            keep: reasons.is_empty(),
            reasons,
        }
    }

    /// Annotate a whole table in place, filling `qc_keep` and
    /// `qc_reject_reasons` on every row.
    pub fn apply(&self, runs: &mut [RunSummary]) {
        let mut rejected = 0usize;
        for run in runs.iter_mut() {
            let verdict = self.evaluate(run);
            run.qc_keep = verdict.keep;
            run.qc_reject_reasons = verdict.reasons.join(";");
            if !verdict.keep {
                rejected += 1;
                log::debug!(
                    "qc reject {}: {}",
                    run.run_name,
                    run.qc_reject_reasons
                );
            }
        }
        if rejected > 0 {
            log::warn!("qc rejected {}/{} runs", rejected, runs.len());
        }
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Keep/reject decision with the recorded reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct QcVerdict {
    /// True when the run is usable for fitting
    pub keep: bool,
    /// Why the run was rejected; empty when kept
    pub reasons: Vec<String>,
}

/// Within-scenario spread of per-run mean power.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRepeatability {
    /// Scenario label
    pub scenario: String,
    /// Number of runs with a trace mean
    pub n: usize,
    /// Mean of per-run mean power, milliwatts
    pub power_mean_mw: f64,
    /// Sample standard deviation, milliwatts
    pub power_std_mw: f64,
    /// Coefficient of variation
    pub cv: f64,
    /// max/min ratio of per-run means
    pub ratio_max_min: f64,
    /// Smallest per-run mean, milliwatts
    pub power_min_mw: f64,
    /// Largest per-run mean, milliwatts
    pub power_max_mw: f64,
}

/// Per-scenario repeatability over runs that carry a trace mean power.
///
/// Scenarios with fewer than two such runs are skipped; the output is sorted
/// worst-first by max/min ratio, then CV.
pub fn scenario_repeatability(runs: &[RunSummary]) -> Vec<ScenarioRepeatability> {
    let mut by_scenario: std::collections::BTreeMap<&str, Vec<f64>> =
        std::collections::BTreeMap::new();
    for run in runs {
        if let Some(p) = finite(run.trace_power_mean_mw) {
            by_scenario.entry(run.scenario.as_str()).or_default().push(p);
        }
    }

    let mut out: Vec<ScenarioRepeatability> = Vec::new();
    for (scenario, vals) in by_scenario {
        if vals.len() < 2 {
            continue;
        }
        let mean = series::mean_finite(vals.iter().copied()).unwrap_or(f64::NAN);
        let std = series::std_finite(&vals).unwrap_or(f64::NAN);
        let min = vals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        out.push(ScenarioRepeatability {
            scenario: scenario.to_string(),
            n: vals.len(),
            power_mean_mw: mean,
            power_std_mw: std,
            cv: if mean != 0.0 { std / mean } else { f64::NAN },
            ratio_max_min: if min > 0.0 { max / min } else { f64::NAN },
            power_min_mw: min,
            power_max_mw: max,
        });
    }

    out.sort_by(|a, b| {
        (b.ratio_max_min, b.cv)
            .partial_cmp(&(a.ratio_max_min, a.cv))
            .unwrap_or(core::cmp::Ordering::Equal)
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, soc: f64, mv: f64, tcpu: f64) -> RunSummary {
        RunSummary {
            run_name: name.to_string(),
            scenario: "S1".to_string(),
            battery_level0_pct: Some(soc),
            battery_voltage0_mv: Some(mv),
            thermal_cpu0_c: Some(tcpu),
            ..RunSummary::default()
        }
    }

    #[test]
    fn healthy_run_keeps() {
        let policy = QcPolicy::default();
        let v = policy.evaluate(&summary("r1", 85.0, 4100.0, 42.0));
        assert!(v.keep);
        assert!(v.reasons.is_empty());
    }

    #[test]
    fn low_soc_rejects_with_reason() {
        let policy = QcPolicy::default();
        let v = policy.evaluate(&summary("r1", 31.0, 4100.0, 42.0));
        assert!(!v.keep);
        assert_eq!(v.reasons, vec!["soc<50.0".to_string()]);
    }

    #[test]
    fn multiple_violations_collect_all_reasons() {
        let policy = QcPolicy::default();
        let v = policy.evaluate(&summary("r1", 31.0, 3500.0, 72.0));
        assert_eq!(
            v.reasons,
            vec![
                "soc<50.0".to_string(),
                "voltage<3700.0mV".to_string(),
                "thermal_cpu0>60.0C".to_string(),
            ]
        );
    }

    #[test]
    fn missing_covariates_never_reject() {
        let policy = QcPolicy::default();
        let run = RunSummary {
            run_name: "r1".to_string(),
            scenario: "S1".to_string(),
            ..RunSummary::default()
        };
        assert!(policy.evaluate(&run).keep);
    }

    #[test]
    fn strict_policy_checks_trace_and_plug() {
        let policy = QcPolicy::strict();
        let mut run = summary("r1", 85.0, 4100.0, 42.0);
        run.battery_plugged0 = Some(1.0);
        run.has_trace = false;
        let v = policy.evaluate(&run);
        assert_eq!(
            v.reasons,
            vec!["no_trace".to_string(), "plugged".to_string()]
        );
    }

    #[test]
    fn apply_annotates_rows() {
        let policy = QcPolicy::default();
        let mut runs = vec![summary("good", 85.0, 4100.0, 42.0), summary("bad", 20.0, 4100.0, 42.0)];
        policy.apply(&mut runs);
        assert!(runs[0].qc_keep);
        assert!(runs[0].qc_reject_reasons.is_empty());
        assert!(!runs[1].qc_keep);
        assert_eq!(runs[1].qc_reject_reasons, "soc<50.0");
    }

    #[test]
    fn repeatability_sorted_worst_first() {
        let mk = |scenario: &str, p: f64| RunSummary {
            run_name: format!("{scenario}-{p}"),
            scenario: scenario.to_string(),
            trace_power_mean_mw: Some(p),
            ..RunSummary::default()
        };
        let runs = vec![
            mk("A", 100.0),
            mk("A", 110.0),
            mk("B", 100.0),
            mk("B", 300.0),
            mk("C", 50.0), // single run: skipped
        ];
        let rep = scenario_repeatability(&runs);
        assert_eq!(rep.len(), 2);
        assert_eq!(rep[0].scenario, "B");
        assert!((rep[0].ratio_max_min - 3.0).abs() < 1e-12);
    }
}
