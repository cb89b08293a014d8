//! Voltage- and temperature-dependent gating rates.
//!
//! All rate laws share one closed form,
//! `rate = thi * (A + B*V') / (C + H*exp((V' + D)/F))` with `V'` in millivolts
//! and `thi = 1000 * 3^((T - 6.3)/10)`, so results are in 1/s.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Absolute tolerance under which numerator and denominator are both treated
/// as zero and the analytic limit is returned instead.
pub const DEFAULT_SINGULARITY_TOLERANCE: f64 = 1e-13;

/// Shape constants of one rate law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConstants {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub f: f64,
    pub h: f64,
}

impl RateConstants {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, f: f64, h: f64) -> Self {
        Self { a, b, c, d, f, h }
    }
}

/// Q10 temperature scaling, including the ms -> s conversion.
pub fn q10_factor(celsius: f64) -> f64 {
    1e3 * 3.0_f64.powf((celsius - 6.3) / 10.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateFunction {
    thi: f64,
    constants: RateConstants,
    abs_tol: f64,
}

impl RateFunction {
    pub fn new(celsius: f64, constants: RateConstants) -> Self {
        Self {
            thi: q10_factor(celsius),
            constants,
            abs_tol: DEFAULT_SINGULARITY_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, abs_tol: f64) -> Self {
        self.abs_tol = abs_tol;
        self
    }

    pub fn constants(&self) -> RateConstants {
        self.constants
    }

    /// Rate in 1/s at membrane potential `v` (volts).
    pub fn eval(&self, v: f64) -> f64 {
        let RateConstants { a, b, c, d, f, h } = self.constants;
        let v_mv = v * 1e3;
        let exponential = ((v_mv + d) / f).exp();
        let num = a + b * v_mv;
        let denom = c + h * exponential;
        if num.abs() <= self.abs_tol && denom.abs() <= self.abs_tol {
            self.thi * f * b / (h * exponential)
        } else {
            self.thi * num / denom
        }
    }
}

/// Rates sampled on a regular voltage grid and linearly interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    v_min: f64,
    step: f64,
    values: Vec<f64>,
}

impl RateTable {
    pub fn new(function: &RateFunction, range: VoltageRange) -> Result<Self, ModelError> {
        range.validate()?;
        let intervals = ((range.max - range.min) / range.step).round() as usize;
        let values = (0..=intervals)
            .map(|i| function.eval(range.min + i as f64 * range.step))
            .collect();
        Ok(Self {
            v_min: range.min,
            step: range.step,
            values,
        })
    }

    /// `None` outside the tabulated range.
    pub fn lookup(&self, v: f64) -> Option<f64> {
        let position = (v - self.v_min) / self.step;
        let last = (self.values.len() - 1) as f64;
        if !(0.0..=last).contains(&position) {
            return None;
        }
        let lower = position.floor() as usize;
        if lower + 1 >= self.values.len() {
            return Some(self.values[lower]);
        }
        let frac = position - lower as f64;
        Some(self.values[lower] + frac * (self.values[lower + 1] - self.values[lower]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl VoltageRange {
    pub fn validate(&self) -> Result<(), ModelError> {
        let finite = self.min.is_finite() && self.max.is_finite() && self.step.is_finite();
        if !finite || self.step <= 0.0 || self.max <= self.min {
            return Err(ModelError::InvalidVoltageRange {
                min: self.min,
                max: self.max,
                step: self.step,
            });
        }
        Ok(())
    }
}

impl Default for VoltageRange {
    fn default() -> Self {
        Self {
            min: -100.0e-3,
            max: 50.0e-3,
            step: 1e-4,
        }
    }
}

/// A voltage-dependent rate as bound to a gating transition.
#[derive(Debug, Clone, PartialEq)]
pub enum VDepRate {
    Direct(RateFunction),
    /// Tabulated over a bounded range; falls back to the direct law outside it.
    Tabulated { function: RateFunction, table: RateTable },
    Constant(f64),
}

impl VDepRate {
    pub fn direct(celsius: f64, constants: RateConstants) -> Self {
        VDepRate::Direct(RateFunction::new(celsius, constants))
    }

    pub fn tabulated(
        celsius: f64,
        constants: RateConstants,
        range: VoltageRange,
    ) -> Result<Self, ModelError> {
        let function = RateFunction::new(celsius, constants);
        let table = RateTable::new(&function, range)?;
        Ok(VDepRate::Tabulated { function, table })
    }

    #[inline]
    pub fn rate(&self, v: f64) -> f64 {
        match self {
            VDepRate::Direct(function) => function.eval(v),
            VDepRate::Tabulated { function, table } => {
                table.lookup(v).unwrap_or_else(|| function.eval(v))
            }
            VDepRate::Constant(rate) => *rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hh::{ALPHA_H, ALPHA_M, ALPHA_N, BETA_H, BETA_M, BETA_N};

    const CELSIUS: f64 = 20.0;

    fn direct(constants: RateConstants, v: f64) -> f64 {
        let RateConstants { a, b, c, d, f, h } = constants;
        let v_mv = v * 1e3;
        q10_factor(CELSIUS) * (a + b * v_mv) / (c + h * ((v_mv + d) / f).exp())
    }

    #[test]
    fn q10_is_unity_scale_at_reference_temperature() {
        assert!((q10_factor(6.3) - 1e3).abs() < 1e-9);
        assert!((q10_factor(16.3) - 3e3).abs() < 1e-9);
    }

    #[test]
    fn alpha_n_singular_point_returns_limit() {
        let function = RateFunction::new(CELSIUS, ALPHA_N);
        let v = -55e-3;
        let thi = q10_factor(CELSIUS);
        let v_mv = v * 1e3;
        let limit = thi * ALPHA_N.f * ALPHA_N.b / (ALPHA_N.h * ((v_mv + ALPHA_N.d) / ALPHA_N.f).exp());
        let rate = function.eval(v);
        assert!(rate.is_finite());
        assert!((rate - limit).abs() < 1e-9 * limit);
        // classic HH: alpha_n(-55 mV) = 0.1 /ms
        assert!((rate - 0.1 * thi).abs() < 1e-6 * thi);
    }

    #[test]
    fn alpha_m_singular_point_returns_limit() {
        let function = RateFunction::new(CELSIUS, ALPHA_M);
        let thi = q10_factor(CELSIUS);
        let rate = function.eval(-40e-3);
        assert!(rate.is_finite());
        assert!((rate - thi).abs() < 1e-6 * thi);
    }

    #[test]
    fn singular_points_are_continuous() {
        for (constants, v0) in [(ALPHA_N, -55e-3), (ALPHA_M, -40e-3)] {
            let function = RateFunction::new(CELSIUS, constants);
            let at = function.eval(v0);
            for dv in [1e-7, -1e-7, 1e-6, -1e-6] {
                let near = function.eval(v0 + dv);
                assert!((near - at).abs() / at < 1e-3, "jump near {v0}: {at} vs {near}");
            }
        }
    }

    #[test]
    fn regular_points_match_direct_formula() {
        let laws = [ALPHA_N, BETA_N, ALPHA_M, BETA_M, ALPHA_H, BETA_H];
        for constants in laws {
            let function = RateFunction::new(CELSIUS, constants);
            for step in 0..=30 {
                let v = -100e-3 + step as f64 * 5.1e-3;
                let expected = direct(constants, v);
                let got = function.eval(v);
                assert!((got - expected).abs() <= 1e-12 * expected.abs().max(1.0));
            }
        }
    }

    #[test]
    fn hh_rates_are_non_negative_over_operating_range() {
        let laws = [ALPHA_N, BETA_N, ALPHA_M, BETA_M, ALPHA_H, BETA_H];
        for constants in laws {
            let function = RateFunction::new(CELSIUS, constants);
            for step in 0..=1500 {
                let v = -100e-3 + step as f64 * 1e-4;
                let rate = function.eval(v);
                assert!(rate.is_finite() && rate >= 0.0, "{constants:?} at {v}: {rate}");
            }
        }
    }

    #[test]
    fn table_interpolates_and_falls_back_outside_range() {
        let range = VoltageRange::default();
        let rate = VDepRate::tabulated(CELSIUS, BETA_M, range).expect("table");
        let function = RateFunction::new(CELSIUS, BETA_M);
        for v in [-0.1, -0.07234, -0.0123, 0.0, 0.05] {
            let tabulated = rate.rate(v);
            let exact = function.eval(v);
            assert!((tabulated - exact).abs() / exact < 1e-4);
        }
        assert_eq!(rate.rate(0.2), function.eval(0.2));
        assert_eq!(rate.rate(-0.3), function.eval(-0.3));
    }

    #[test]
    fn invalid_range_is_rejected() {
        let range = VoltageRange {
            min: 0.05,
            max: -0.1,
            step: 1e-4,
        };
        assert!(matches!(
            VDepRate::tabulated(CELSIUS, BETA_M, range),
            Err(ModelError::InvalidVoltageRange { .. })
        ));
    }
}
