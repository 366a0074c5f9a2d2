//! Internal-resistance (I²R) loss correction
//!
//! ## Overview
//!
//! The base power model reads subsystem power at the rails; it does not see
//! the Joule heating dissipated inside the cell itself. That loss grows with
//! the square of the discharge current and with the cell's internal
//! resistance, which itself rises as the cell empties and as it heats:
//!
//! ```text
//! R_int(SOC, T) = R0 + R1*(1 - SOC) + R2*max(0, T_cpu - T_ref)
//! P_loss        = I^2 * R_int * s
//! ```
//!
//! All coefficients are physical resistances, so they are constrained
//! non-negative; `s` is an optional non-negative per-fold scale that guards
//! against double-counting when the base model has already absorbed part of
//! the I²R effect into its other terms. Predicted loss is clamped to zero
//! from below for the same reason: a resistive term can only *add* power.
//!
//! Fitting (per LOSO fold, at run level) lives in `soclab-fit::i2r`; this
//! module owns the parameterization and the forward evaluation.

use serde::{Deserialize, Serialize};

/// Default reference temperature above which the thermal term engages.
pub const DEFAULT_TREF_C: f64 = 40.0;

/// Which terms of the resistance surface are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RintModel {
    /// Constant resistance
    R0,
    /// Constant plus depth-of-discharge term
    R0Rsoc,
    /// Constant, depth-of-discharge and positive-part thermal term
    R0RsocRtpos,
}

impl RintModel {
    /// Number of fitted coefficients.
    pub fn num_params(&self) -> usize {
        match self {
            RintModel::R0 => 1,
            RintModel::R0Rsoc => 2,
            RintModel::R0RsocRtpos => 3,
        }
    }

    /// Regression features for one run: multipliers of `I^2` per coefficient.
    pub fn features(&self, soc_frac: f64, t_cpu_c: f64, tref_c: f64) -> Vec<f64> {
        let mut f = vec![1.0];
        if matches!(self, RintModel::R0Rsoc | RintModel::R0RsocRtpos) {
            f.push(1.0 - soc_frac);
        }
        if matches!(self, RintModel::R0RsocRtpos) {
            f.push((t_cpu_c - tref_c).max(0.0));
        }
        f
    }
}

impl Default for RintModel {
    fn default() -> Self {
        RintModel::R0RsocRtpos
    }
}

/// Fitted resistance surface with its per-fold scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RintParams {
    /// Active parameterization
    pub model: RintModel,
    /// Coefficients in ohms (and ohms per unit feature); length matches
    /// `model.num_params()`, all non-negative
    pub coeffs: Vec<f64>,
    /// Reference temperature for the thermal term, Celsius
    pub tref_c: f64,
    /// Non-negative loss scale
    pub scale: f64,
}

impl RintParams {
    /// Zero-loss parameters (used for folds with too little data).
    pub fn zero(model: RintModel, tref_c: f64) -> Self {
        Self {
            coeffs: vec![0.0; model.num_params()],
            model,
            tref_c,
            scale: 1.0,
        }
    }

    /// Resistance at a given state, ohms.
    pub fn r_int_ohm(&self, soc_frac: f64, t_cpu_c: f64) -> f64 {
        self.model
            .features(soc_frac, t_cpu_c, self.tref_c)
            .iter()
            .zip(&self.coeffs)
            .map(|(f, c)| f * c)
            .sum()
    }

    /// Loss power in watts for a discharge current in amps.
    ///
    /// Clamped to be non-negative.
    pub fn p_loss_w(&self, current_a: f64, soc_frac: f64, t_cpu_c: f64) -> f64 {
        let i2 = current_a * current_a;
        (i2 * self.r_int_ohm(soc_frac, t_cpu_c) * self.scale).max(0.0)
    }

    /// True when every coefficient and the scale are non-negative.
    pub fn is_physical(&self) -> bool {
        self.scale >= 0.0 && self.coeffs.iter().all(|c| *c >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> RintParams {
        RintParams {
            model: RintModel::R0RsocRtpos,
            coeffs: vec![0.08, 0.05, 0.002],
            tref_c: DEFAULT_TREF_C,
            scale: 1.0,
        }
    }

    #[test]
    fn resistance_rises_as_cell_empties() {
        let p = params();
        assert!(p.r_int_ohm(0.2, 40.0) > p.r_int_ohm(0.9, 40.0));
    }

    #[test]
    fn thermal_term_only_above_tref() {
        let p = params();
        let cold = p.r_int_ohm(0.5, 30.0);
        let at_ref = p.r_int_ohm(0.5, 40.0);
        let hot = p.r_int_ohm(0.5, 50.0);
        assert_eq!(cold, at_ref);
        assert!((hot - at_ref - 0.002 * 10.0).abs() < 1e-12);
    }

    #[test]
    fn loss_scales_with_current_squared() {
        let p = params();
        let p1 = p.p_loss_w(0.5, 0.8, 40.0);
        let p2 = p.p_loss_w(1.0, 0.8, 40.0);
        assert!((p2 / p1 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn model_feature_counts() {
        assert_eq!(RintModel::R0.features(0.5, 50.0, 40.0), vec![1.0]);
        assert_eq!(RintModel::R0Rsoc.features(0.5, 50.0, 40.0), vec![1.0, 0.5]);
        assert_eq!(
            RintModel::R0RsocRtpos.features(0.5, 50.0, 40.0),
            vec![1.0, 0.5, 10.0]
        );
    }

    #[test]
    fn zero_params_predict_zero_loss() {
        let p = RintParams::zero(RintModel::R0Rsoc, DEFAULT_TREF_C);
        assert_eq!(p.p_loss_w(2.0, 0.1, 80.0), 0.0);
        assert!(p.is_physical());
    }

    proptest! {
        /// Physical parameters never produce a negative loss.
        #[test]
        fn loss_is_never_negative(
            r0 in 0.0f64..1.0,
            r1 in 0.0f64..1.0,
            r2 in 0.0f64..0.01,
            scale in 0.0f64..3.0,
            i in -3.0f64..3.0,
            soc in 0.0f64..1.0,
            t in 10.0f64..80.0,
        ) {
            let p = RintParams {
                model: RintModel::R0RsocRtpos,
                coeffs: vec![r0, r1, r2],
                tref_c: DEFAULT_TREF_C,
                scale,
            };
            prop_assert!(p.p_loss_w(i, soc, t) >= 0.0);
        }
    }
}
