//! Sampling targets and result sinks.

use crate::mesh::Point;

/// Something to sample at every reporting time.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    VertexPotential(usize),
    /// Mean potential of a membrane triangle (mesh triangle id).
    TrianglePotential(usize),
    TetPotential(usize),
    /// Potential of the tetrahedron containing a point.
    PointPotential(Point),
    /// Outward current (A) of a named ohmic current on a membrane triangle.
    TriangleCurrent { triangle: usize, current: String },
}

/// Metadata attached to a resolved probe; opaque to the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub label: String,
    pub position: Point,
    /// Membrane area (m^2) for triangle probes.
    pub area: Option<f64>,
}

pub trait ResultSink {
    /// Called once per `set_recording` with the resolved probe metadata.
    fn begin(&mut self, _probes: &[ProbeInfo]) {}

    /// One sample row, values in probe order.
    fn record(&mut self, time: f64, values: &[f64]);
}

/// Keeps every sample in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    probes: Vec<ProbeInfo>,
    times: Vec<f64>,
    rows: Vec<Vec<f64>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probes(&self) -> &[ProbeInfo] {
        &self.probes
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time series of one probe.
    pub fn series(&self, probe: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|row| row.get(probe).copied()).collect()
    }

    pub fn series_by_label(&self, label: &str) -> Option<Vec<f64>> {
        let index = self.probes.iter().position(|p| p.label == label)?;
        Some(self.series(index))
    }
}

impl ResultSink for MemoryRecorder {
    fn begin(&mut self, probes: &[ProbeInfo]) {
        self.probes = probes.to_vec();
        self.times.clear();
        self.rows.clear();
    }

    fn record(&mut self, time: f64, values: &[f64]) {
        self.times.push(time);
        self.rows.push(values.to_vec());
    }
}

/// Discards samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn record(&mut self, _time: f64, _values: &[f64]) {}
}
