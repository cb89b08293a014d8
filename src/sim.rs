//! Operator-split coupling of channel kinetics and the potential field.
//!
//! Each field step first advances the kinetics at the potential of the step
//! start, then solves the field with the resulting open counts held fixed.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::channels::{ChannelId, ChannelStateId, CurrentId};
use crate::error::{FieldError, GatingError, SimulationError};
use crate::field::{FieldCoupler, MembraneConductance, MembraneParameters, SolverParameters};
use crate::gating::{GatingMethod, StochasticGatingEngine};
use crate::mesh::TetMesh;
use crate::model::Model;
use crate::recording::{Probe, ProbeInfo, ResultSink};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    pub membrane: MembraneParameters,
    pub solver: SolverParameters,
    /// Field and kinetics exchange interval (s).
    pub field_dt: f64,
    pub gating_method: GatingMethod,
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            membrane: MembraneParameters::default(),
            solver: SolverParameters::default(),
            field_dt: 1e-5,
            gating_method: GatingMethod::Ssa,
            seed: 1234,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Vertex(usize),
    Element(usize),
    Tet([usize; 4]),
    Current { element: usize, current: CurrentId },
}

#[derive(Debug, Clone)]
struct Recording {
    targets: Vec<Target>,
    interval: f64,
    next: u64,
}

pub struct Simulation {
    model: Arc<Model>,
    mesh: TetMesh,
    engine: StochasticGatingEngine,
    field: FieldCoupler,
    /// Mesh triangle id -> membrane element index.
    elements: HashMap<usize, usize>,
    areas: Vec<f64>,
    field_dt: f64,
    time: f64,
    steps: u64,
    recording: Option<Recording>,
    voltages: Vec<f64>,
    conductances: Vec<MembraneConductance>,
    sample: Vec<f64>,
}

impl Simulation {
    /// Binds `model` to the `membrane` triangles of `mesh`. Every membrane
    /// triangle becomes one gating element.
    pub fn new(
        model: Arc<Model>,
        mesh: TetMesh,
        membrane: &[usize],
        settings: &SimulationSettings,
    ) -> Result<Self, SimulationError> {
        if !(settings.field_dt.is_finite() && settings.field_dt > 0.0) {
            return Err(SimulationError::FieldSetup(FieldError::InvalidTimestep(
                settings.field_dt,
            )));
        }
        let field = FieldCoupler::new(&mesh, membrane, &settings.membrane, settings.solver)
            .map_err(SimulationError::FieldSetup)?;
        let engine = StochasticGatingEngine::new(
            Arc::clone(&model),
            membrane.len(),
            settings.gating_method,
            settings.seed,
        );
        let elements = membrane
            .iter()
            .enumerate()
            .map(|(element, &triangle)| (triangle, element))
            .collect();
        let areas: Vec<f64> = membrane.iter().map(|&t| mesh.triangle_area(t)).collect();
        info!(
            "simulation: {} membrane triangles ({:.3e} m^2), {} vertices, field dt {:e} s, {:?}",
            membrane.len(),
            areas.iter().sum::<f64>(),
            mesh.vertex_count(),
            settings.field_dt,
            settings.gating_method
        );
        Ok(Self {
            model,
            mesh,
            engine,
            field,
            elements,
            areas,
            field_dt: settings.field_dt,
            time: 0.0,
            steps: 0,
            recording: None,
            voltages: Vec::new(),
            conductances: Vec::new(),
            sample: Vec::new(),
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn mesh(&self) -> &TetMesh {
        &self.mesh
    }

    pub fn engine(&self) -> &StochasticGatingEngine {
        &self.engine
    }

    pub fn field(&self) -> &FieldCoupler {
        &self.field
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn field_dt(&self) -> f64 {
        self.field_dt
    }

    /// Membrane triangle ids in element order.
    pub fn membrane(&self) -> &[usize] {
        self.field.membrane()
    }

    pub fn element_of(&self, triangle: usize) -> Option<usize> {
        self.elements.get(&triangle).copied()
    }

    fn ensure_not_started(&self) -> Result<(), SimulationError> {
        if self.steps > 0 {
            return Err(SimulationError::AlreadyRunning { time: self.time });
        }
        Ok(())
    }

    /// Distributes `density * area * fractions[state]` channels over every
    /// membrane element. Returns the number of channels placed.
    pub fn inject(
        &mut self,
        channel: ChannelId,
        density: f64,
        fractions: &[f64],
    ) -> Result<u64, SimulationError> {
        self.ensure_not_started()?;
        let added = self
            .engine
            .inject_density(&self.areas, channel, density, fractions)?;
        let name = self
            .model
            .channel(channel)
            .map(|c| c.name.as_str())
            .unwrap_or_default();
        if added == 0 {
            warn!("no {name} channels placed (density {density:e} /m^2)");
        } else {
            info!("placed {added} {name} channels");
        }
        Ok(added)
    }

    pub fn set_count(
        &mut self,
        triangle: usize,
        channel: ChannelId,
        state: ChannelStateId,
        count: u32,
    ) -> Result<(), SimulationError> {
        self.ensure_not_started()?;
        let element = self.element_of(triangle).ok_or(GatingError::UnknownElement {
            element: triangle,
            count: self.elements.len(),
        })?;
        self.engine.set_count(element, channel, state, count)?;
        Ok(())
    }

    pub fn set_potential(&mut self, v: f64) -> Result<(), SimulationError> {
        self.ensure_not_started()?;
        self.field.set_potential(v);
        Ok(())
    }

    /// Replaces all clamps with `current` (A) split evenly over `vertices`.
    /// May be called between runs.
    pub fn set_clamp(&mut self, vertices: &[usize], current: f64) -> Result<(), SimulationError> {
        if let Some(&vertex) = vertices.iter().find(|&&v| v >= self.mesh.vertex_count()) {
            return Err(SimulationError::FieldSetup(FieldError::UnknownVertex {
                vertex,
            }));
        }
        self.field.clear_clamps();
        if vertices.is_empty() {
            warn!("current clamp has no target vertices");
            return Ok(());
        }
        let share = current / vertices.len() as f64;
        for &vertex in vertices {
            self.field
                .set_vertex_clamp(vertex, share)
                .map_err(SimulationError::FieldSetup)?;
        }
        info!(
            "clamp {current:e} A over {} vertices at t = {:e} s",
            vertices.len(),
            self.time
        );
        Ok(())
    }

    /// Validates and installs the probes; sampling starts at the next
    /// multiple of `interval`. Sends the probe metadata to `sink`.
    pub fn set_recording<S: ResultSink + ?Sized>(
        &mut self,
        probes: &[Probe],
        interval: f64,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        if !(interval.is_finite() && interval > 0.0) {
            return Err(SimulationError::InvalidReportInterval(interval));
        }
        let mut targets = Vec::with_capacity(probes.len());
        let mut infos = Vec::with_capacity(probes.len());
        for probe in probes {
            let (target, info) = self.resolve(probe)?;
            targets.push(target);
            infos.push(info);
        }
        let next = (self.time / interval - 1e-9).ceil().max(0.0) as u64;
        self.recording = Some(Recording {
            targets,
            interval,
            next,
        });
        sink.begin(&infos);
        Ok(())
    }

    fn resolve(&self, probe: &Probe) -> Result<(Target, ProbeInfo), SimulationError> {
        let unknown = || SimulationError::UnknownProbeTarget(format!("{probe:?}"));
        let membrane = |triangle: usize| {
            self.element_of(triangle).ok_or_else(unknown)
        };
        let resolved = match probe {
            Probe::VertexPotential(vertex) => {
                if *vertex >= self.mesh.vertex_count() {
                    return Err(unknown());
                }
                (
                    Target::Vertex(*vertex),
                    ProbeInfo {
                        label: format!("V(vertex {vertex})"),
                        position: self.mesh.vertex(*vertex),
                        area: None,
                    },
                )
            }
            Probe::TrianglePotential(triangle) => (
                Target::Element(membrane(*triangle)?),
                ProbeInfo {
                    label: format!("V(tri {triangle})"),
                    position: self.mesh.triangle_center(*triangle),
                    area: Some(self.mesh.triangle_area(*triangle)),
                },
            ),
            Probe::TetPotential(tet) => {
                if *tet >= self.mesh.tet_count() {
                    return Err(unknown());
                }
                (
                    Target::Tet(self.mesh.tet(*tet)),
                    ProbeInfo {
                        label: format!("V(tet {tet})"),
                        position: self.mesh.tet_center(*tet),
                        area: None,
                    },
                )
            }
            Probe::PointPotential(point) => {
                let tet = self.mesh.find_tet(point).ok_or_else(unknown)?;
                (
                    Target::Tet(self.mesh.tet(tet)),
                    ProbeInfo {
                        label: format!("V({:e}, {:e}, {:e})", point[0], point[1], point[2]),
                        position: *point,
                        area: None,
                    },
                )
            }
            Probe::TriangleCurrent { triangle, current } => {
                let element = membrane(*triangle)?;
                let id = self.model.current_by_name(current).ok_or_else(unknown)?;
                (
                    Target::Current {
                        element,
                        current: id,
                    },
                    ProbeInfo {
                        label: format!("{current}(tri {triangle})"),
                        position: self.mesh.triangle_center(*triangle),
                        area: Some(self.mesh.triangle_area(*triangle)),
                    },
                )
            }
        };
        Ok(resolved)
    }

    fn sample_value(&self, target: Target) -> f64 {
        match target {
            Target::Vertex(vertex) => self.field.potentials()[vertex],
            Target::Element(element) => self.field.membrane_potential(element),
            Target::Tet(corners) => self.field.mean_potential(&corners),
            Target::Current { element, current } => {
                let v = self.field.membrane_potential(element);
                self.engine
                    .element_current(element, current, v)
                    .unwrap_or(f64::NAN)
            }
        }
    }

    fn record_due<S: ResultSink + ?Sized>(&mut self, sink: &mut S) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        let mut next = recording.next;
        let tolerance = 1e-6 * self.field_dt;
        while next as f64 * recording.interval <= self.time + tolerance {
            let mut sample = std::mem::take(&mut self.sample);
            sample.clear();
            sample.extend(recording.targets.iter().map(|&t| self.sample_value(t)));
            sink.record(self.time, &sample);
            debug!("sample at t = {:e} s ({} values)", self.time, sample.len());
            self.sample = sample;
            next += 1;
        }
        self.recording = Some(Recording { next, ..recording });
    }

    /// One coupled step of length `dt`.
    pub fn step(&mut self, dt: f64) -> Result<(), SimulationError> {
        self.field.membrane_potentials(&mut self.voltages);
        self.engine.advance(&self.voltages, dt)?;
        self.engine.membrane_conductances(&mut self.conductances);
        let time = self.time + dt;
        self.field
            .advance(dt, &self.conductances)
            .map_err(|source| SimulationError::Field { time, source })?;
        self.time = time;
        self.steps += 1;
        Ok(())
    }

    /// Runs until `end` (s), sampling into `sink`. The last step is shortened
    /// to land on `end`. Can be called repeatedly with increasing end times.
    pub fn run<S: ResultSink + ?Sized>(
        &mut self,
        end: f64,
        sink: &mut S,
    ) -> Result<(), SimulationError> {
        let tolerance = 1e-6 * self.field_dt;
        if !(end.is_finite() && end >= self.time - tolerance) {
            return Err(SimulationError::EndBeforeNow {
                end,
                time: self.time,
            });
        }
        info!("run from {:e} s to {:e} s", self.time, end);
        loop {
            self.record_due(sink);
            let left = end - self.time;
            if left <= tolerance {
                break;
            }
            let dt = if left < self.field_dt + tolerance {
                left
            } else {
                self.field_dt
            };
            self.step(dt)?;
        }
        info!("run finished at {:e} s after {} field steps", self.time, self.steps);
        Ok(())
    }

    /// Triangle potential by mesh triangle id, for membrane triangles.
    pub fn triangle_potential(&self, triangle: usize) -> Option<f64> {
        self.element_of(triangle)
            .map(|element| self.field.membrane_potential(element))
    }

    pub fn vertex_potential(&self, vertex: usize) -> Option<f64> {
        self.field.vertex_potential(vertex)
    }

    pub fn tet_potential(&self, tet: usize) -> Option<f64> {
        (tet < self.mesh.tet_count()).then(|| self.field.mean_potential(&self.mesh.tet(tet)))
    }

    pub fn state_total(&self, channel: ChannelId, state: ChannelStateId) -> u64 {
        self.engine.state_total(channel, state)
    }
}
