//! Tetrahedral mesh topology and geometry.
//!
//! Only the queries the engine needs: element volumes, boundary triangles and
//! their areas, vertex selection and point location. Mesh file formats are
//! left to the caller; `TetMesh::cuboid` builds structured test geometry.

use itertools::Itertools;
use log::info;
use std::collections::HashMap;

use crate::error::MeshError;

pub type Point = [f64; 3];

fn sub(a: &Point, b: &Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn dot(a: &Point, b: &Point) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: &Point, b: &Point) -> Point {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn square(x: f64) -> f64 {
    x * x
}

pub fn distance(a: &Point, b: &Point) -> f64 {
    (square(a[0] - b[0]) + square(a[1] - b[1]) + square(a[2] - b[2])).sqrt()
}

/// Signed volume of tetrahedron (a, b, c, d).
fn signed_volume(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    dot(&sub(b, a), &cross(&sub(c, a), &sub(d, a))) / 6.0
}

fn triangle_area(a: &Point, b: &Point, c: &Point) -> f64 {
    let n = cross(&sub(b, a), &sub(c, a));
    0.5 * dot(&n, &n).sqrt()
}

fn centroid<const N: usize>(points: [&Point; N]) -> Point {
    let mut c = [0.0; 3];
    for p in points {
        for axis in 0..3 {
            c[axis] += p[axis];
        }
    }
    c.map(|x| x / N as f64)
}

#[derive(Debug, Clone)]
pub struct TetMesh {
    vertices: Vec<Point>,
    tets: Vec<[usize; 4]>,
    tet_volumes: Vec<f64>,
    /// Boundary triangles (faces owned by exactly one tetrahedron).
    triangles: Vec<[usize; 3]>,
    triangle_tets: Vec<usize>,
    triangle_areas: Vec<f64>,
}

impl TetMesh {
    pub fn new(vertices: Vec<Point>, tets: Vec<[usize; 4]>) -> Result<Self, MeshError> {
        if tets.is_empty() {
            return Err(MeshError::Empty);
        }
        if let Some(vertex) = vertices
            .iter()
            .position(|p| p.iter().any(|x| !x.is_finite()))
        {
            return Err(MeshError::NonFiniteVertex { vertex });
        }

        let mut tet_volumes = Vec::with_capacity(tets.len());
        for (tet, corners) in tets.iter().enumerate() {
            if let Some(&vertex) = corners.iter().find(|&&v| v >= vertices.len()) {
                return Err(MeshError::VertexOutOfRange {
                    tet,
                    vertex,
                    vertex_count: vertices.len(),
                });
            }
            let [a, b, c, d] = corners.map(|v| &vertices[v]);
            let volume = signed_volume(a, b, c, d).abs();
            let scale = distance(a, b)
                .max(distance(a, c))
                .max(distance(a, d))
                .powi(3);
            if !(volume > 1e-12 * scale) {
                return Err(MeshError::DegenerateTet { tet, volume });
            }
            tet_volumes.push(volume);
        }

        // sorted face -> (owner count, first owner, face as seen by the owner)
        let mut faces: HashMap<[usize; 3], (usize, usize, [usize; 3])> = HashMap::new();
        for (tet, corners) in tets.iter().enumerate() {
            for skip in 0..4 {
                let face: Vec<usize> = (0..4).filter(|&i| i != skip).map(|i| corners[i]).collect();
                let oriented = [face[0], face[1], face[2]];
                let mut key = oriented;
                key.sort_unstable();
                faces
                    .entry(key)
                    .and_modify(|entry| entry.0 += 1)
                    .or_insert((1, tet, oriented));
            }
        }
        if let Some((face, (count, _, _))) = faces.iter().find(|(_, entry)| entry.0 > 2) {
            return Err(MeshError::NonManifoldFace {
                face: *face,
                count: *count,
            });
        }
        let boundary: Vec<([usize; 3], usize, [usize; 3])> = faces
            .into_iter()
            .filter(|(_, (count, _, _))| *count == 1)
            .map(|(key, (_, tet, oriented))| (key, tet, oriented))
            .sorted_by_key(|(key, _, _)| *key)
            .collect();

        let triangles: Vec<[usize; 3]> = boundary.iter().map(|(_, _, face)| *face).collect();
        let triangle_tets = boundary.iter().map(|(_, tet, _)| *tet).collect();
        let triangle_areas = triangles
            .iter()
            .map(|t| triangle_area(&vertices[t[0]], &vertices[t[1]], &vertices[t[2]]))
            .collect();

        info!(
            "Mesh: {} vertices, {} tetrahedra, {} surface triangles",
            vertices.len(),
            tets.len(),
            triangles.len()
        );

        Ok(Self {
            vertices,
            tets,
            tet_volumes,
            triangles,
            triangle_tets,
            triangle_areas,
        })
    }

    /// Box of `cells` cubes with edge lengths `spacing`, each cube split into
    /// six tetrahedra around its main diagonal (conforming across cubes).
    pub fn cuboid(cells: [usize; 3], spacing: [f64; 3], origin: Point) -> Result<Self, MeshError> {
        if cells.contains(&0) || spacing.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(MeshError::InvalidGrid { cells, spacing });
        }
        let [nx, ny, nz] = cells;
        let index = |i: usize, j: usize, k: usize| (k * (ny + 1) + j) * (nx + 1) + i;

        let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    vertices.push([
                        origin[0] + i as f64 * spacing[0],
                        origin[1] + j as f64 * spacing[1],
                        origin[2] + k as f64 * spacing[2],
                    ]);
                }
            }
        }

        let mut tets = Vec::with_capacity(nx * ny * nz * 6);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let corner = |bits: [usize; 3]| index(i + bits[0], j + bits[1], k + bits[2]);
                    for axes in (0..3).permutations(3) {
                        let mut bits = [0usize; 3];
                        let mut path = [0usize; 4];
                        path[0] = corner(bits);
                        for (step, &axis) in axes.iter().enumerate() {
                            bits[axis] = 1;
                            path[step + 1] = corner(bits);
                        }
                        tets.push(path);
                    }
                }
            }
        }
        Self::new(vertices, tets)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn tet_count(&self) -> usize {
        self.tets.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn vertex(&self, vertex: usize) -> Point {
        self.vertices[vertex]
    }

    pub fn tet(&self, tet: usize) -> [usize; 4] {
        self.tets[tet]
    }

    pub fn tets(&self) -> &[[usize; 4]] {
        &self.tets
    }

    pub fn tet_volume(&self, tet: usize) -> f64 {
        self.tet_volumes[tet]
    }

    pub fn tet_center(&self, tet: usize) -> Point {
        centroid(self.tets[tet].map(|v| &self.vertices[v]))
    }

    pub fn triangle(&self, triangle: usize) -> [usize; 3] {
        self.triangles[triangle]
    }

    pub fn triangle_area(&self, triangle: usize) -> f64 {
        self.triangle_areas[triangle]
    }

    pub fn triangle_center(&self, triangle: usize) -> Point {
        centroid(self.triangles[triangle].map(|v| &self.vertices[v]))
    }

    /// The tetrahedron a boundary triangle belongs to.
    pub fn triangle_tet(&self, triangle: usize) -> usize {
        self.triangle_tets[triangle]
    }

    pub fn total_volume(&self) -> f64 {
        self.tet_volumes.iter().sum()
    }

    pub fn bounding_box(&self) -> (Point, Point) {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for p in &self.vertices {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        (min, max)
    }

    /// Surface triangles whose centre satisfies `predicate`.
    pub fn triangles_where<F>(&self, predicate: F) -> Vec<usize>
    where
        F: Fn(&Point) -> bool,
    {
        (0..self.triangles.len())
            .filter(|&t| predicate(&self.triangle_center(t)))
            .collect()
    }

    /// Sorted, de-duplicated vertices of the given triangles.
    pub fn triangle_vertices(&self, triangles: &[usize]) -> Vec<usize> {
        triangles
            .iter()
            .flat_map(|&t| self.triangles[t])
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Tetrahedron containing `point`, if any.
    pub fn find_tet(&self, point: &Point) -> Option<usize> {
        const TOLERANCE: f64 = 1e-9;
        self.tets.iter().position(|corners| {
            let [a, b, c, d] = corners.map(|v| &self.vertices[v]);
            let total = signed_volume(a, b, c, d);
            let parts = [
                signed_volume(point, b, c, d),
                signed_volume(a, point, c, d),
                signed_volume(a, b, point, d),
                signed_volume(a, b, c, point),
            ];
            parts.iter().all(|part| part / total >= -TOLERANCE)
        })
    }

    /// Every tetrahedron edge once, as sorted vertex pairs.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        self.tets
            .iter()
            .flat_map(|t| {
                (0..4)
                    .tuple_combinations()
                    .map(move |(i, j)| (t[i].min(t[j]), t[i].max(t[j])))
            })
            .sorted_unstable()
            .dedup()
            .collect()
    }
}
