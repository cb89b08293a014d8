//! Hodgkin-Huxley channels on a tetrahedral axon segment.
//!
//! K: four identical n-subunits. Na: three m-subunits and one h-subunit.
//! Leak: one permanently conducting state. The stimulated end is the face
//! at minimal z; every other surface triangle carries channels.

use std::sync::Arc;

use log::{info, warn};

use crate::channels::{ChannelId, ChannelStateId, ChannelType, CurrentId, SubUnitStateId};
use crate::config::SimulationConfig;
use crate::error::{ModelError, SimulationError};
use crate::mesh::TetMesh;
use crate::model::{Model, ModelBuilder};
use crate::rate::{RateConstants, VDepRate};
use crate::recording::{Probe, ResultSink};
use crate::sim::Simulation;

pub const ALPHA_N: RateConstants = RateConstants::new(-0.55, -0.01, -1.0, 55.0, -10.0, 1.0);
pub const BETA_N: RateConstants = RateConstants::new(1.0, 0.0, 0.0, 65.0, 80.0, 8.0);
pub const ALPHA_M: RateConstants = RateConstants::new(-4.0, -0.1, -1.0, 40.0, -10.0, 1.0);
pub const BETA_M: RateConstants = RateConstants::new(1.0, 0.0, 0.0, 65.0, 18.0, 0.25);
pub const ALPHA_H: RateConstants = RateConstants::new(1.0, 0.0, 0.0, 65.0, 20.0, 1.0 / 0.07);
pub const BETA_H: RateConstants = RateConstants::new(1.0, 0.0, 1.0, 35.0, -10.0, 1.0);

/// Resting K population by number of open n-subunits.
pub const K_FACS: [f64; 5] = [0.21768, 0.40513, 0.28093, 0.08647, 0.00979];

/// Resting Na population by `[open h][open m]`.
pub const NA_FACS: [[f64; 4]; 2] = [
    [0.34412, 0.05733, 0.00327, 6.0e-05],
    [0.50558, 0.08504, 0.00449, 0.00010],
];

pub const POTASSIUM_CURRENT: &str = "I_K";
pub const SODIUM_CURRENT: &str = "I_Na";
pub const LEAK_CURRENT: &str = "I_leak";

/// The built HH model with the ids callers need.
#[derive(Debug, Clone)]
pub struct HhModel {
    pub model: Model,
    pub potassium: ChannelId,
    pub sodium: ChannelId,
    pub leak: ChannelId,
    pub k_open: SubUnitStateId,
    pub na_m_open: SubUnitStateId,
    pub na_h_open: SubUnitStateId,
    pub potassium_current: CurrentId,
    pub sodium_current: CurrentId,
    pub leak_current: CurrentId,
}

fn rate(config: &SimulationConfig, constants: RateConstants) -> Result<VDepRate, ModelError> {
    match config.voltage_range {
        Some(range) => VDepRate::tabulated(config.celsius, constants, range),
        None => Ok(VDepRate::direct(config.celsius, constants)),
    }
}

pub fn build_model(config: &SimulationConfig) -> Result<HhModel, ModelError> {
    let mut builder = ModelBuilder::new();

    let (k_su, k) = builder.add_subunit("KSU", &["Kc", "Ko"]);
    let potassium = builder.add_channel("VGKC", &[k_su; 4]);
    builder.add_gating(
        potassium,
        k[0],
        k[1],
        rate(config, ALPHA_N)?,
        rate(config, BETA_N)?,
    );

    let (m_su, m) = builder.add_subunit("NamSU", &["Na_mc", "Na_mo"]);
    let (h_su, h) = builder.add_subunit("NahSU", &["Na_hi", "Na_ha"]);
    let sodium = builder.add_channel("VGNaC", &[m_su, m_su, m_su, h_su]);
    builder
        .add_gating(
            sodium,
            h[0],
            h[1],
            rate(config, ALPHA_H)?,
            rate(config, BETA_H)?,
        )
        .add_gating(
            sodium,
            m[0],
            m[1],
            rate(config, ALPHA_M)?,
            rate(config, BETA_M)?,
        );

    let (l_su, l) = builder.add_subunit("LeakSU", &["lsus"]);
    let leak = builder.add_channel("Leak", &[l_su]);

    let potassium_current = builder.add_ohmic_current(
        POTASSIUM_CURRENT,
        potassium,
        &[k[1]; 4],
        config.potassium.conductance,
        config.potassium.reversal,
    );
    let sodium_current = builder.add_ohmic_current(
        SODIUM_CURRENT,
        sodium,
        &[m[1], m[1], m[1], h[1]],
        config.sodium.conductance,
        config.sodium.reversal,
    );
    let leak_current = builder.add_ohmic_current(
        LEAK_CURRENT,
        leak,
        &[l[0]],
        config.leak.conductance,
        config.leak.reversal,
    );

    Ok(HhModel {
        model: builder.build()?,
        potassium,
        sodium,
        leak,
        k_open: k[1],
        na_m_open: m[1],
        na_h_open: h[1],
        potassium_current,
        sodium_current,
        leak_current,
    })
}

/// Splits a lumped population table evenly over the ordered states that
/// share each occupancy.
fn per_state_fractions<F>(channel: &ChannelType, lumped: F) -> Vec<f64>
where
    F: Fn(ChannelStateId) -> f64,
{
    channel
        .states()
        .map(|state| lumped(state) / channel.multiplicity(state) as f64)
        .collect()
}

impl HhModel {
    fn channel_type(&self, id: ChannelId) -> Result<&ChannelType, ModelError> {
        self.model
            .channel(id)
            .ok_or(ModelError::UnknownChannel { channel: id.0 })
    }

    pub fn potassium_fractions(&self) -> Result<Vec<f64>, ModelError> {
        let channel = self.channel_type(self.potassium)?;
        Ok(per_state_fractions(channel, |state| {
            K_FACS[channel.count(state, self.k_open)]
        }))
    }

    pub fn sodium_fractions(&self) -> Result<Vec<f64>, ModelError> {
        let channel = self.channel_type(self.sodium)?;
        Ok(per_state_fractions(channel, |state| {
            NA_FACS[channel.count(state, self.na_h_open)][channel.count(state, self.na_m_open)]
        }))
    }
}

/// Surface triangles lying in the plane of minimal z.
pub fn bottom_face(mesh: &TetMesh) -> Vec<usize> {
    let (min, max) = mesh.bounding_box();
    let tolerance = 1e-9 * (max[2] - min[2]).abs().max(f64::MIN_POSITIVE);
    mesh.triangles_where(|center| (center[2] - min[2]).abs() <= tolerance)
}

/// A stimulated HH axon segment ready to run.
pub struct HhAxon {
    hh: HhModel,
    sim: Simulation,
    stimulus_vertices: Vec<usize>,
}

impl HhAxon {
    /// Places HH channels on every surface triangle except the bottom face,
    /// initialises populations from the resting tables and clamps the
    /// configured current onto the bottom-face vertices.
    pub fn new(mesh: TetMesh, config: &SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let hh = build_model(config)?;

        let bottom = bottom_face(&mesh);
        let membrane: Vec<usize> = (0..mesh.triangle_count())
            .filter(|t| !bottom.contains(t))
            .collect();
        let stimulus_vertices = mesh.triangle_vertices(&bottom);
        info!(
            "axon: {} injection vertices, {} bottom-face triangles, {} membrane triangles",
            stimulus_vertices.len(),
            bottom.len(),
            membrane.len()
        );
        if stimulus_vertices.is_empty() {
            warn!("axon mesh has no bottom face to stimulate");
        }

        let k_fractions = hh.potassium_fractions()?;
        let na_fractions = hh.sodium_fractions()?;
        let mut sim = Simulation::new(
            Arc::new(hh.model.clone()),
            mesh,
            &membrane,
            &config.settings(),
        )?;
        sim.inject(hh.sodium, config.sodium.density, &na_fractions)?;
        sim.inject(hh.potassium, config.potassium.density, &k_fractions)?;
        sim.inject(hh.leak, config.leak.density, &[1.0])?;
        sim.set_clamp(&stimulus_vertices, config.injection.current)?;

        Ok(Self {
            hh,
            sim,
            stimulus_vertices,
        })
    }

    pub fn model(&self) -> &HhModel {
        &self.hh
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn stimulus_vertices(&self) -> &[usize] {
        &self.stimulus_vertices
    }

    /// Changes the total stimulus current; takes effect from the next step.
    pub fn set_stimulus(&mut self, current: f64) -> Result<(), SimulationError> {
        let vertices = self.stimulus_vertices.clone();
        self.sim.set_clamp(&vertices, current)
    }

    /// Tetrahedron potentials at points spaced `spacing` apart on the
    /// central z axis, starting at the stimulated face.
    pub fn axial_probes(&self, spacing: f64) -> Vec<Probe> {
        let (min, max) = self.sim.mesh().bounding_box();
        let x = 0.5 * (min[0] + max[0]);
        let y = 0.5 * (min[1] + max[1]);
        if !(spacing > 0.0) {
            return Vec::new();
        }
        let count = ((max[2] - min[2]) / spacing).ceil() as usize;
        (0..count)
            .map(|k| min[2] + k as f64 * spacing)
            .filter(|&z| z < max[2])
            .map(|z| Probe::PointPotential([x, y, z]))
            .collect()
    }

    /// Na and K current of every membrane triangle.
    pub fn current_probes(&self) -> Vec<Probe> {
        let membrane = self.sim.membrane();
        [SODIUM_CURRENT, POTASSIUM_CURRENT]
            .iter()
            .flat_map(|current| {
                membrane.iter().map(move |&triangle| Probe::TriangleCurrent {
                    triangle,
                    current: (*current).to_owned(),
                })
            })
            .collect()
    }

    pub fn record<S: ResultSink + ?Sized>(
        &mut self,
        probes: &[Probe],
        interval: f64,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        self.sim.set_recording(probes, interval, sink)
    }

    pub fn run<S: ResultSink + ?Sized>(&mut self, end: f64, sink: &mut S) -> Result<(), SimulationError> {
        self.sim.run(end, sink)
    }

    /// Channels of one type in the conducting state over the whole membrane.
    pub fn open_channels(&self, current: CurrentId) -> u64 {
        self.hh
            .model
            .current(current)
            .map(|c| self.sim.state_total(c.channel, c.open_state))
            .unwrap_or(0)
    }
}
