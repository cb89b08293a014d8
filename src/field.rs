//! Membrane potential on the volume mesh.
//!
//! Vertex-centred finite volumes: each vertex owns a dual control volume,
//! neighbouring vertices couple through the linear-element conductances of
//! the tetrahedra they share, and membrane triangles contribute a third of
//! their capacitance and channel conductance to each of their vertices.
//! Each field step solves
//!
//! `(C/dt + K + G) V' = C/dt V + G E + I_clamp`
//!
//! i.e. conductances are frozen for the step and the driving force is
//! implicit.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::FieldError;
use crate::mesh::{Point, TetMesh, cross, dot};
use crate::sparse::{CsrMatrix, PcgWorkspace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MembraneParameters {
    /// Specific membrane capacitance (F/m^2).
    pub capacitance: f64,
    /// Bulk resistivity of the conduction volume (ohm.m).
    pub resistivity: f64,
    /// Initial potential of every vertex (V).
    pub resting_potential: f64,
}

impl Default for MembraneParameters {
    fn default() -> Self {
        Self {
            capacitance: 1.0e-2,
            resistivity: 1.0,
            resting_potential: -65e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverParameters {
    /// Relative residual at which the linear solve stops.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 10_000,
        }
    }
}

/// Summed channel conductance of one membrane triangle: `g` in S and
/// `g_e = sum(g_i * E_i)` in A.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MembraneConductance {
    pub g: f64,
    pub g_e: f64,
}

impl MembraneConductance {
    pub fn add(&mut self, g: f64, reversal: f64) {
        self.g += g;
        self.g_e += g * reversal;
    }

    /// Outward-positive membrane current (A) at potential `v`.
    pub fn current(&self, v: f64) -> f64 {
        self.g * v - self.g_e
    }
}

#[derive(Debug, Clone)]
pub struct FieldCoupler {
    matrix: CsrMatrix,
    stiffness_diag: Vec<f64>,
    capacitance: Vec<f64>,
    membrane: Vec<usize>,
    membrane_vertices: Vec<[usize; 3]>,
    potentials: Vec<f64>,
    clamp: Vec<f64>,
    rhs: Vec<f64>,
    next: Vec<f64>,
    work: PcgWorkspace,
    solver: SolverParameters,
    step: u64,
}

/// Gradients of the four linear shape functions of a tetrahedron.
fn shape_gradients(p: [Point; 4]) -> [Point; 4] {
    let mut gradients = [[0.0; 3]; 4];
    for (i, gradient) in gradients.iter_mut().enumerate() {
        let [j, k, l] = [(i + 1) % 4, (i + 2) % 4, (i + 3) % 4];
        let e1 = [p[k][0] - p[j][0], p[k][1] - p[j][1], p[k][2] - p[j][2]];
        let e2 = [p[l][0] - p[j][0], p[l][1] - p[j][1], p[l][2] - p[j][2]];
        let normal = cross(&e1, &e2);
        let to_i = [p[i][0] - p[j][0], p[i][1] - p[j][1], p[i][2] - p[j][2]];
        // scaled so the function is 1 at vertex i and 0 on the opposite face
        let scale = 1.0 / dot(&normal, &to_i);
        *gradient = normal.map(|x| x * scale);
    }
    gradients
}

fn find_root(parent: &mut [usize], mut v: usize) -> usize {
    while parent[v] != v {
        parent[v] = parent[parent[v]];
        v = parent[v];
    }
    v
}

impl FieldCoupler {
    pub fn new(
        mesh: &TetMesh,
        membrane: &[usize],
        params: &MembraneParameters,
        solver: SolverParameters,
    ) -> Result<Self, FieldError> {
        if !(params.capacitance.is_finite() && params.capacitance > 0.0) {
            return Err(FieldError::InvalidCapacitance(params.capacitance));
        }
        if !(params.resistivity.is_finite() && params.resistivity > 0.0) {
            return Err(FieldError::InvalidResistivity(params.resistivity));
        }
        if membrane.is_empty() {
            return Err(FieldError::NoMembrane);
        }
        if let Some(&triangle) = membrane.iter().find(|&&t| t >= mesh.triangle_count()) {
            return Err(FieldError::UnknownTriangle { triangle });
        }
        if let Some(triangle) = membrane.iter().copied().duplicates().next() {
            return Err(FieldError::DuplicateTriangle { triangle });
        }

        let n = mesh.vertex_count();
        let conductivity = 1.0 / params.resistivity;
        let mut triplets = Vec::with_capacity(mesh.tet_count() * 24);
        for (tet, corners) in mesh.tets().iter().enumerate() {
            let gradients = shape_gradients(corners.map(|v| mesh.vertex(v)));
            let weight = conductivity * mesh.tet_volume(tet);
            for i in 0..4 {
                for j in (i + 1)..4 {
                    let k = weight * dot(&gradients[i], &gradients[j]);
                    let (a, b) = (corners[i], corners[j]);
                    triplets.push((a, b, k));
                    triplets.push((b, a, k));
                    triplets.push((a, a, -k));
                    triplets.push((b, b, -k));
                }
            }
        }
        let matrix = CsrMatrix::from_triplets(n, &triplets);
        let stiffness_diag = (0..n).map(|v| matrix.diagonal(v)).collect();

        let mut capacitance = vec![0.0; n];
        let membrane_vertices: Vec<[usize; 3]> =
            membrane.iter().map(|&t| mesh.triangle(t)).collect();
        for (&t, vertices) in membrane.iter().zip(&membrane_vertices) {
            let share = params.capacitance * mesh.triangle_area(t) / 3.0;
            for &v in vertices {
                capacitance[v] += share;
            }
        }

        // every connected region needs membrane, otherwise its potential
        // is undetermined
        let mut parent: Vec<usize> = (0..n).collect();
        for (a, b) in mesh.edges() {
            let (ra, rb) = (find_root(&mut parent, a), find_root(&mut parent, b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
        let mut anchored = vec![false; n];
        for v in 0..n {
            if capacitance[v] > 0.0 {
                let root = find_root(&mut parent, v);
                anchored[root] = true;
            }
        }
        for v in 0..n {
            if !anchored[find_root(&mut parent, v)] {
                return Err(FieldError::FloatingRegion { vertex: v });
            }
        }

        Ok(Self {
            matrix,
            stiffness_diag,
            capacitance,
            membrane: membrane.to_vec(),
            membrane_vertices,
            potentials: vec![params.resting_potential; n],
            clamp: vec![0.0; n],
            rhs: vec![0.0; n],
            next: vec![0.0; n],
            work: PcgWorkspace::default(),
            solver,
            step: 0,
        })
    }

    pub fn membrane(&self) -> &[usize] {
        &self.membrane
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn potentials(&self) -> &[f64] {
        &self.potentials
    }

    pub fn vertex_potential(&self, vertex: usize) -> Option<f64> {
        self.potentials.get(vertex).copied()
    }

    pub fn set_potential(&mut self, v: f64) {
        self.potentials.iter_mut().for_each(|p| *p = v);
    }

    /// Mean potential over a set of vertices.
    pub fn mean_potential(&self, vertices: &[usize]) -> f64 {
        vertices.iter().map(|&v| self.potentials[v]).sum::<f64>() / vertices.len() as f64
    }

    /// Potential of the `index`-th membrane triangle.
    pub fn membrane_potential(&self, index: usize) -> f64 {
        self.mean_potential(&self.membrane_vertices[index])
    }

    pub fn membrane_potentials(&self, out: &mut Vec<f64>) {
        out.clear();
        out.extend((0..self.membrane.len()).map(|i| self.membrane_potential(i)));
    }

    /// Sets the injected current (A, positive depolarises) at one vertex.
    pub fn set_vertex_clamp(&mut self, vertex: usize, current: f64) -> Result<(), FieldError> {
        let slot = self
            .clamp
            .get_mut(vertex)
            .ok_or(FieldError::UnknownVertex { vertex })?;
        *slot = current;
        Ok(())
    }

    pub fn clear_clamps(&mut self) {
        self.clamp.iter_mut().for_each(|c| *c = 0.0);
    }

    pub fn total_clamp(&self) -> f64 {
        self.clamp.iter().sum()
    }

    /// Advances the potential by `dt` with the given per-membrane-triangle
    /// conductances held constant.
    pub fn advance(
        &mut self,
        dt: f64,
        conductances: &[MembraneConductance],
    ) -> Result<(), FieldError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FieldError::InvalidTimestep(dt));
        }
        if conductances.len() != self.membrane.len() {
            return Err(FieldError::ConductanceCountMismatch {
                expected: self.membrane.len(),
                got: conductances.len(),
            });
        }
        let step = self.step + 1;

        let mut diag: Vec<f64> = self.stiffness_diag.clone();
        for v in 0..diag.len() {
            let c_dt = self.capacitance[v] / dt;
            diag[v] += c_dt;
            self.rhs[v] = c_dt * self.potentials[v] + self.clamp[v];
        }
        for (vertices, conductance) in self.membrane_vertices.iter().zip(conductances) {
            for &v in vertices {
                diag[v] += conductance.g / 3.0;
                self.rhs[v] += conductance.g_e / 3.0;
            }
        }
        for (v, value) in diag.into_iter().enumerate() {
            self.matrix.set_diagonal(v, value);
        }

        self.next.copy_from_slice(&self.potentials);
        self.matrix
            .solve_pcg(
                &self.rhs,
                &mut self.next,
                self.solver.tolerance,
                self.solver.max_iterations,
                &mut self.work,
            )
            .map_err(|failure| FieldError::Diverged {
                step,
                iterations: failure.iterations,
                residual: failure.residual,
            })?;
        if let Some(vertex) = self.next.iter().position(|v| !v.is_finite()) {
            return Err(FieldError::NonFinitePotential { step, vertex });
        }
        std::mem::swap(&mut self.potentials, &mut self.next);
        self.step = step;
        Ok(())
    }
}
