//! Telemetry data model: samples, runs and run-level summaries
//!
//! One experiment *run* is an ordered time series of [`Sample`]s collected on
//! the device, labelled with the scenario it belongs to. Runs group by
//! scenario for cross-validation partitioning. A [`RunSummary`] is the
//! run-level start-state row used by QC gating and run-level fitting; it
//! mirrors the `qc_run_summary.csv` schema.
//!
//! All optional observations are `Option<f64>` - a missing CSV field is a
//! missing observation, never a zero. Helpers that need gap-free columns go
//! through [`crate::series::fill_gaps`].

use serde::{Deserialize, Serialize};

use crate::series;

/// One timestamped observation within a run.
///
/// Time is relative to run start; `dt_s` is the interval length that this
/// sample accounts for (zero for the degenerate first/duplicate rows, which
/// integration and fitting skip).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since run start
    pub t_s: f64,
    /// Interval length accounted by this sample (seconds)
    pub dt_s: f64,
    /// Reported battery level, percent
    pub soc_pct: Option<f64>,
    /// Battery voltage, millivolts
    pub voltage_mv: Option<f64>,
    /// Battery temperature, Celsius
    pub temp_batt_c: Option<f64>,
    /// CPU/SoC temperature, Celsius
    pub temp_cpu_c: Option<f64>,
    /// Raw brightness setting (0..255)
    pub brightness: Option<f64>,
    /// Whether the display is considered ON for modeling
    pub screen_on: bool,
    /// Observed total power from the power-counter trace, milliwatts
    pub power_total_mw: Option<f64>,
    /// CPU power proxy from frequency-residency energy, milliwatts
    pub power_cpu_mw: Option<f64>,
    /// Screen power estimate, milliwatts (zero when screen is OFF)
    pub power_screen_mw: Option<f64>,
    /// Coulomb counter reading, micro-amp-hours
    pub charge_counter_uah: Option<f64>,
    /// GPS subsystem active
    pub gps_on: bool,
    /// Cellular radio active
    pub cellular_on: bool,
}

/// An ordered per-run time series with its scenario label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSeries {
    /// Unique run identifier (timestamped collection name)
    pub run_name: String,
    /// Experimental scenario this run belongs to
    pub scenario: String,
    /// Samples ordered by `t_s`
    pub samples: Vec<Sample>,
}

impl RunSeries {
    /// Create an empty series for a run.
    pub fn new(run_name: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            scenario: scenario.into(),
            samples: Vec::new(),
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the run holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Restore time ordering after out-of-order ingestion.
    pub fn sort_by_time(&mut self) {
        self.samples
            .sort_by(|a, b| a.t_s.partial_cmp(&b.t_s).unwrap_or(core::cmp::Ordering::Equal));
    }

    /// Total accounted duration in seconds.
    pub fn duration_s(&self) -> f64 {
        self.samples.iter().map(|s| s.dt_s.max(0.0)).sum()
    }

    /// Mean of the observed total power over samples where it is present.
    pub fn mean_observed_power_mw(&self) -> Option<f64> {
        series::mean_finite(self.samples.iter().filter_map(|s| s.power_total_mw))
    }

    /// First reported SOC as a fraction in [0, 1].
    pub fn initial_soc_frac(&self) -> Option<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.soc_pct)
            .find(|v| v.is_finite())
            .map(|pct| pct / 100.0)
    }

    /// Extract a column with gaps intact.
    pub fn column<F>(&self, get: F) -> Vec<Option<f64>>
    where
        F: Fn(&Sample) -> Option<f64>,
    {
        self.samples.iter().map(get).collect()
    }

    /// Extract a gap-free column: forward/backward fill, then the in-run
    /// median, then `fallback` when the column is entirely missing.
    pub fn filled_column<F>(&self, get: F, fallback: f64) -> Vec<f64>
    where
        F: Fn(&Sample) -> Option<f64>,
    {
        series::fill_gaps(&self.column(get), fallback)
    }

    /// Per-sample voltage in volts, gap-filled with a nominal 3.85 V cell.
    pub fn voltage_v_filled(&self) -> Vec<f64> {
        self.filled_column(|s| s.voltage_mv.map(|v| v / 1000.0), crate::soc::NOMINAL_CELL_V)
            .into_iter()
            .map(|v| if v.is_finite() && v > 0.0 { v } else { crate::soc::NOMINAL_CELL_V })
            .collect()
    }

    /// Copy of this run keeping only samples usable for power fitting:
    /// positive interval length and an observed total power.
    pub fn retain_fittable(&self) -> RunSeries {
        RunSeries {
            run_name: self.run_name.clone(),
            scenario: self.scenario.clone(),
            samples: self
                .samples
                .iter()
                .filter(|s| s.dt_s > 0.0 && s.power_total_mw.map_or(false, f64::is_finite))
                .cloned()
                .collect(),
        }
    }
}

/// Run-level start-state summary, one row per run.
///
/// `battery_level0_pct` and friends are the *first-sample* values; the
/// `trace_*` fields are whole-run means from the power-counter trace when one
/// was captured alongside the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_name: String,
    /// Experimental scenario this run belongs to
    pub scenario: String,
    /// SOC at run start, percent
    pub battery_level0_pct: Option<f64>,
    /// Voltage at run start, millivolts
    pub battery_voltage0_mv: Option<f64>,
    /// CPU temperature at run start, Celsius
    pub thermal_cpu0_c: Option<f64>,
    /// Battery temperature at run start, Celsius
    pub thermal_batt0_c: Option<f64>,
    /// Thermal throttling status at run start (0 = nominal)
    pub thermal_status0: Option<f64>,
    /// Charger attachment at run start (0 = unplugged)
    pub battery_plugged0: Option<f64>,
    /// Brightness setting at run start
    pub brightness0: Option<f64>,
    /// Whether a power-counter trace was captured for this run
    pub has_trace: bool,
    /// Mean total power over the trace, milliwatts
    pub trace_power_mean_mw: Option<f64>,
    /// Mean battery current over the trace, micro-amps
    pub trace_current_mean_ua: Option<f64>,
    /// Mean battery voltage over the trace, volts
    pub trace_voltage_mean_v: Option<f64>,
    /// Charge drawn over the trace, milli-amp-hours
    pub trace_discharge_mah: Option<f64>,
    /// Trace duration, seconds
    pub trace_duration_s: Option<f64>,
    /// QC verdict: true when the run is usable for fitting
    pub qc_keep: bool,
    /// Semicolon-joined QC rejection reasons, empty when kept
    pub qc_reject_reasons: String,
}

impl RunSummary {
    /// Start-state voltage in volts.
    pub fn battery_voltage0_v(&self) -> Option<f64> {
        self.battery_voltage0_mv.map(|v| v / 1000.0)
    }

    /// Start-state SOC as a fraction in [0, 1].
    pub fn battery_level0_frac(&self) -> Option<f64> {
        self.battery_level0_pct.map(|v| v / 100.0)
    }

    /// Mean trace current in amps (magnitude; sign conventions differ by kernel).
    pub fn trace_current_mean_a(&self) -> Option<f64> {
        self.trace_current_mean_ua.map(|ua| ua.abs() / 1e6)
    }
}
