use pyo3::prelude::*;

/// Python bindings for driving an HH axon simulation.
#[pymodule]
mod stoch_axon_rs {
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    use crate::config::SimulationConfig;
    use crate::error::SimulationError;
    use crate::hh::HhAxon;
    use crate::mesh::TetMesh;
    use crate::recording::MemoryRecorder;

    fn to_py_err(error: SimulationError) -> PyErr {
        match error {
            SimulationError::Field { .. } => PyRuntimeError::new_err(error.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }

    fn parse_config(config_json: Option<&str>) -> PyResult<SimulationConfig> {
        match config_json {
            Some(json) => SimulationConfig::from_json_str(json)
                .map_err(|e| PyValueError::new_err(e.to_string())),
            None => Ok(SimulationConfig::default()),
        }
    }

    /// An HH axon segment stimulated at its minimal-z face.
    #[pyclass]
    struct AxonSimulation {
        axon: HhAxon,
        recorder: MemoryRecorder,
        config: SimulationConfig,
    }

    impl AxonSimulation {
        fn build(mesh: TetMesh, config: SimulationConfig) -> PyResult<Self> {
            let axon = HhAxon::new(mesh, &config).map_err(to_py_err)?;
            Ok(Self {
                axon,
                recorder: MemoryRecorder::new(),
                config,
            })
        }
    }

    #[pymethods]
    impl AxonSimulation {
        /// Vertices in metres, tetrahedra as vertex index quadruples.
        #[new]
        #[pyo3(signature = (vertices, tets, config_json=None))]
        fn new(
            vertices: Vec<[f64; 3]>,
            tets: Vec<[usize; 4]>,
            config_json: Option<&str>,
        ) -> PyResult<Self> {
            let config = parse_config(config_json)?;
            let mesh = TetMesh::new(vertices, tets).map_err(|e| to_py_err(e.into()))?;
            Self::build(mesh, config)
        }

        /// Box of `cells` cubes of size `spacing`, origin at zero.
        #[staticmethod]
        #[pyo3(signature = (cells, spacing, config_json=None))]
        fn cuboid(cells: [usize; 3], spacing: [f64; 3], config_json: Option<&str>) -> PyResult<Self> {
            let config = parse_config(config_json)?;
            let mesh = TetMesh::cuboid(cells, spacing, [0.0; 3]).map_err(|e| to_py_err(e.into()))?;
            Self::build(mesh, config)
        }

        /// Records axial potentials every `spacing` metres, plus per-triangle
        /// Na and K currents when `currents` is set.
        #[pyo3(signature = (spacing, currents=false, interval=None))]
        fn record(&mut self, spacing: f64, currents: bool, interval: Option<f64>) -> PyResult<()> {
            let mut probes = self.axon.axial_probes(spacing);
            if currents {
                probes.extend(self.axon.current_probes());
            }
            let interval = interval.unwrap_or(self.config.report_dt);
            self.axon
                .record(&probes, interval, &mut self.recorder)
                .map_err(to_py_err)
        }

        fn set_stimulus(&mut self, current: f64) -> PyResult<()> {
            self.axon.set_stimulus(current).map_err(to_py_err)
        }

        /// Runs to `end` seconds (the configured end time by default).
        #[pyo3(signature = (end=None))]
        fn run(&mut self, end: Option<f64>) -> PyResult<()> {
            let end = end.unwrap_or(self.config.end_time);
            self.axon.run(end, &mut self.recorder).map_err(to_py_err)
        }

        #[getter]
        fn time(&self) -> f64 {
            self.axon.simulation().time()
        }

        fn times(&self) -> Vec<f64> {
            self.recorder.times().to_vec()
        }

        fn samples(&self) -> Vec<Vec<f64>> {
            self.recorder.rows().to_vec()
        }

        fn labels(&self) -> Vec<String> {
            self.recorder.probes().iter().map(|p| p.label.clone()).collect()
        }

        fn positions(&self) -> Vec<[f64; 3]> {
            self.recorder.probes().iter().map(|p| p.position).collect()
        }

        fn areas(&self) -> Vec<Option<f64>> {
            self.recorder.probes().iter().map(|p| p.area).collect()
        }

        fn vertex_potentials(&self) -> Vec<f64> {
            self.axon.simulation().field().potentials().to_vec()
        }

        /// Conducting channels of a named ohmic current over the membrane.
        fn open_channels(&self, current: &str) -> PyResult<u64> {
            let id = self
                .axon
                .model()
                .model
                .current_by_name(current)
                .ok_or_else(|| PyValueError::new_err(format!("unknown current `{current}`")))?;
            Ok(self.axon.open_channels(id))
        }
    }
}
