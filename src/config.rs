//! Run configuration, loadable from JSON. Defaults reproduce the canonical
//! 20 °C squid-axon stimulation protocol.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::field::{MembraneParameters, SolverParameters};
use crate::gating::GatingMethod;
use crate::rate::VoltageRange;
use crate::sim::SimulationSettings;

/// Parameters of one ion channel population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Single-channel conductance (S).
    pub conductance: f64,
    /// Channels per m^2 of membrane.
    pub density: f64,
    /// Reversal potential (V).
    pub reversal: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectionParameters {
    /// Total clamp current (A) spread over the stimulated face.
    pub current: f64,
}

impl Default for InjectionParameters {
    fn default() -> Self {
        Self { current: 50e-12 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Temperature (°C).
    pub celsius: f64,
    pub potassium: ChannelParameters,
    pub sodium: ChannelParameters,
    pub leak: ChannelParameters,
    pub membrane: MembraneParameters,
    /// Field and kinetics exchange interval (s).
    pub field_dt: f64,
    /// Simulated duration (s).
    pub end_time: f64,
    /// Sampling interval (s).
    pub report_dt: f64,
    pub injection: InjectionParameters,
    pub seed: u64,
    /// Tabulate rates over this range; direct evaluation if absent.
    pub voltage_range: Option<VoltageRange>,
    pub gating_method: GatingMethod,
    pub solver: SolverParameters,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            celsius: 20.0,
            potassium: ChannelParameters {
                conductance: 20e-12,
                density: 18e12,
                reversal: -77e-3,
            },
            sodium: ChannelParameters {
                conductance: 20e-12,
                density: 60e12,
                reversal: 50e-3,
            },
            leak: ChannelParameters {
                conductance: 0.3e-12,
                density: 10e12,
                reversal: -54.4e-3,
            },
            membrane: MembraneParameters::default(),
            field_dt: 1e-5,
            end_time: 4e-3,
            report_dt: 1e-4,
            injection: InjectionParameters::default(),
            seed: 1234,
            voltage_range: Some(VoltageRange::default()),
            gating_method: GatingMethod::Ssa,
            solver: SolverParameters::default(),
        }
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} must be finite and positive"),
        })
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} must be finite"),
        })
    }
}

impl ChannelParameters {
    fn validate(&self, conductance: &'static str, density: &'static str, reversal: &'static str) -> Result<(), ConfigError> {
        for (field, value) in [(conductance, self.conductance), (density, self.density)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} must be finite and non-negative"),
                });
            }
        }
        finite(reversal, self.reversal)
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&contents)?;
        info!("Loaded simulation config from {:?}", path);
        Ok(config)
    }

    /// Load from JSON file or return defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(ConfigError::Io { .. }) => {
                warn!(
                    "Simulation config {:?} not readable, using defaults",
                    path.as_ref()
                );
                Self::default()
            }
            Err(e) => {
                warn!("Invalid simulation config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        finite("celsius", self.celsius)?;
        self.potassium.validate(
            "potassium.conductance",
            "potassium.density",
            "potassium.reversal",
        )?;
        self.sodium
            .validate("sodium.conductance", "sodium.density", "sodium.reversal")?;
        self.leak
            .validate("leak.conductance", "leak.density", "leak.reversal")?;
        positive("membrane.capacitance", self.membrane.capacitance)?;
        positive("membrane.resistivity", self.membrane.resistivity)?;
        finite("membrane.resting_potential", self.membrane.resting_potential)?;
        positive("field_dt", self.field_dt)?;
        positive("report_dt", self.report_dt)?;
        if !(self.end_time.is_finite() && self.end_time >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "end_time",
                reason: format!("{} must be finite and non-negative", self.end_time),
            });
        }
        if self.field_dt > self.report_dt {
            return Err(ConfigError::Invalid {
                field: "field_dt",
                reason: format!(
                    "field step {} exceeds the reporting interval {}",
                    self.field_dt, self.report_dt
                ),
            });
        }
        finite("injection.current", self.injection.current)?;
        positive("solver.tolerance", self.solver.tolerance)?;
        if self.solver.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "solver.max_iterations",
                reason: "must be at least 1".to_owned(),
            });
        }
        if let Some(range) = &self.voltage_range {
            range.validate().map_err(|e| ConfigError::Invalid {
                field: "voltage_range",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Engine settings for `Simulation::new`.
    pub fn settings(&self) -> SimulationSettings {
        SimulationSettings {
            membrane: self.membrane,
            solver: self.solver,
            field_dt: self.field_dt,
            gating_method: self.gating_method,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimulationConfig::default();
        config.validate().expect("valid");
        assert_eq!(config.seed, 1234);
        assert_eq!(config.gating_method, GatingMethod::Ssa);
        assert!((config.sodium.density - 60e12).abs() < 1.0);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{ "celsius": 6.3, "gating_method": "tau_leap", "voltage_range": null,
                 "potassium": { "conductance": 1e-11, "density": 1e12, "reversal": -0.08 } }"#,
        )
        .expect("config");
        assert_eq!(config.celsius, 6.3);
        assert_eq!(config.gating_method, GatingMethod::TauLeap);
        assert_eq!(config.voltage_range, None);
        assert_eq!(config.potassium.reversal, -0.08);
        assert_eq!(config.sodium, SimulationConfig::default().sodium);
    }

    #[test]
    fn json_round_trip_keeps_values() {
        let mut config = SimulationConfig::default();
        config.injection.current = 1e-10;
        let json = config.to_json_string().expect("json");
        assert_eq!(SimulationConfig::from_json_str(&json).expect("parse"), config);
    }

    #[test]
    fn invalid_values_name_the_field() {
        let negative = r#"{ "leak": { "conductance": -1e-12, "density": 1e12, "reversal": 0.0 } }"#;
        match SimulationConfig::from_json_str(negative) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "leak.conductance"),
            other => panic!("unexpected {other:?}"),
        }
        let coarse = r#"{ "field_dt": 1e-3, "report_dt": 1e-4 }"#;
        assert!(matches!(
            SimulationConfig::from_json_str(coarse),
            Err(ConfigError::Invalid { field: "field_dt", .. })
        ));
        assert!(matches!(
            SimulationConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("stoch_axon_rs_missing_config.json");
        assert!(matches!(
            SimulationConfig::load(&path),
            Err(ConfigError::Io { .. })
        ));
        assert_eq!(SimulationConfig::load_or_default(&path), SimulationConfig::default());
    }
}
