//! Stochastic ion-channel gating coupled to a finite-volume membrane
//! potential solver on tetrahedral meshes.

pub mod channels;
pub mod config;
pub mod error;
pub mod field;
pub mod gating;
pub mod hh;
pub mod mesh;
pub mod model;
pub mod rate;
pub mod recording;
pub mod sim;
pub mod sparse;

#[cfg(feature = "python")]
mod python;

pub use channels::{ChannelId, ChannelStateId, CurrentId, SubUnitId, SubUnitStateId};
pub use config::SimulationConfig;
pub use error::{ConfigError, FieldError, GatingError, MeshError, ModelError, SimulationError};
pub use field::{FieldCoupler, MembraneParameters, SolverParameters};
pub use gating::{GatingMethod, StochasticGatingEngine};
pub use hh::HhAxon;
pub use mesh::TetMesh;
pub use model::{Model, ModelBuilder};
pub use rate::{RateConstants, RateFunction, VDepRate, VoltageRange};
pub use recording::{MemoryRecorder, Probe, ResultSink};
pub use sim::{Simulation, SimulationSettings};
