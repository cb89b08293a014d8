//! Compressed sparse row storage and a Jacobi-preconditioned conjugate
//! gradient for the symmetric positive definite field system.

#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
    diag: Vec<usize>,
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f64,
}

/// The solve stopped without reaching the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveFailure {
    pub iterations: usize,
    pub residual: f64,
}

impl CsrMatrix {
    /// Assembles an `n x n` matrix from (row, col, value) triplets; duplicates
    /// are summed and every diagonal entry is materialised.
    pub fn from_triplets(n: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut rows: Vec<Vec<(usize, f64)>> = (0..n).map(|i| vec![(i, 0.0)]).collect();
        for &(row, col, value) in triplets {
            rows[row].push((col, value));
        }

        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        let mut diag = Vec::with_capacity(n);
        row_ptr.push(0);
        for (i, mut row) in rows.into_iter().enumerate() {
            row.sort_by_key(|(col, _)| *col);
            for (col, value) in row {
                if col_idx.len() > row_ptr[i] && col_idx[col_idx.len() - 1] == col {
                    if let Some(last) = values.last_mut() {
                        *last += value;
                    }
                    continue;
                }
                if col == i {
                    diag.push(col_idx.len());
                }
                col_idx.push(col);
                values.push(value);
            }
            row_ptr.push(col_idx.len());
        }

        Self {
            n,
            row_ptr,
            col_idx,
            values,
            diag,
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn diagonal(&self, row: usize) -> f64 {
        self.values[self.diag[row]]
    }

    pub fn set_diagonal(&mut self, row: usize, value: f64) {
        let slot = self.diag[row];
        self.values[slot] = value;
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        match self.col_idx[range.clone()].binary_search(&col) {
            Ok(offset) => self.values[range.start + offset],
            Err(_) => 0.0,
        }
    }

    /// `y = A x`
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        for (row, out) in y.iter_mut().enumerate().take(self.n) {
            let mut sum = 0.0;
            for slot in self.row_ptr[row]..self.row_ptr[row + 1] {
                sum += self.values[slot] * x[self.col_idx[slot]];
            }
            *out = sum;
        }
    }

    /// Solves `A x = b` starting from the contents of `x`. Stops when the
    /// residual norm drops below `tolerance * |b|`.
    pub fn solve_pcg(
        &self,
        b: &[f64],
        x: &mut [f64],
        tolerance: f64,
        max_iterations: usize,
        work: &mut PcgWorkspace,
    ) -> Result<SolveStats, SolveFailure> {
        let n = self.n;
        work.resize(n);
        let PcgWorkspace { r, z, p, q } = work;

        let b_norm = norm(b);
        if b_norm == 0.0 {
            x.iter_mut().for_each(|v| *v = 0.0);
            return Ok(SolveStats {
                iterations: 0,
                residual: 0.0,
            });
        }
        let target = tolerance * b_norm;

        self.mul_vec(x, q);
        for i in 0..n {
            r[i] = b[i] - q[i];
        }
        let mut residual = norm(r);
        if residual <= target {
            return Ok(SolveStats {
                iterations: 0,
                residual: residual / b_norm,
            });
        }
        self.precondition(r, z);
        p.copy_from_slice(z);
        let mut rz = dot(r, z);

        for iteration in 1..=max_iterations {
            self.mul_vec(p, q);
            let pq = dot(p, q);
            if !(pq > 0.0) || !pq.is_finite() {
                return Err(SolveFailure {
                    iterations: iteration,
                    residual: residual / b_norm,
                });
            }
            let alpha = rz / pq;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * q[i];
            }
            residual = norm(r);
            if !residual.is_finite() {
                return Err(SolveFailure {
                    iterations: iteration,
                    residual,
                });
            }
            if residual <= target {
                return Ok(SolveStats {
                    iterations: iteration,
                    residual: residual / b_norm,
                });
            }
            self.precondition(r, z);
            let rz_next = dot(r, z);
            let beta = rz_next / rz;
            rz = rz_next;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
        }
        Err(SolveFailure {
            iterations: max_iterations,
            residual: residual / b_norm,
        })
    }

    fn precondition(&self, r: &[f64], z: &mut [f64]) {
        for (i, out) in z.iter_mut().enumerate() {
            let d = self.values[self.diag[i]];
            *out = if d > 0.0 { r[i] / d } else { r[i] };
        }
    }
}

/// Scratch vectors reused across solves.
#[derive(Debug, Clone, Default)]
pub struct PcgWorkspace {
    r: Vec<f64>,
    z: Vec<f64>,
    p: Vec<f64>,
    q: Vec<f64>,
}

impl PcgWorkspace {
    fn resize(&mut self, n: usize) {
        for v in [&mut self.r, &mut self.z, &mut self.p, &mut self.q] {
            v.resize(n, 0.0);
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_1d(n: usize, shift: f64) -> CsrMatrix {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0 + shift));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(n, &triplets)
    }

    #[test]
    fn duplicates_are_summed() {
        let m = CsrMatrix::from_triplets(2, &[(0, 1, 1.0), (0, 1, 2.5), (1, 1, 4.0), (1, 1, 1.0)]);
        assert_eq!(m.get(0, 1), 3.5);
        assert_eq!(m.diagonal(1), 5.0);
        assert_eq!(m.diagonal(0), 0.0);
        assert_eq!(m.nnz(), 3);
    }

    #[test]
    fn pcg_solves_spd_system() {
        let n = 50;
        let m = laplacian_1d(n, 0.1);
        let expected: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut b = vec![0.0; n];
        m.mul_vec(&expected, &mut b);
        let mut x = vec![0.0; n];
        let mut work = PcgWorkspace::default();
        let stats = m
            .solve_pcg(&b, &mut x, 1e-12, 500, &mut work)
            .expect("converged");
        assert!(stats.residual <= 1e-12);
        for (got, want) in x.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn pcg_reports_failure_when_iterations_run_out() {
        let n = 200;
        let m = laplacian_1d(n, 0.0);
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let mut work = PcgWorkspace::default();
        let failure = m
            .solve_pcg(&b, &mut x, 1e-14, 3, &mut work)
            .expect_err("too few iterations");
        assert_eq!(failure.iterations, 3);
        assert!(failure.residual > 1e-14);
    }

    #[test]
    fn indefinite_matrix_is_detected() {
        let m = CsrMatrix::from_triplets(2, &[(0, 0, 1.0), (1, 1, -1.0)]);
        let mut x = vec![0.0; 2];
        let mut work = PcgWorkspace::default();
        assert!(m.solve_pcg(&[1.0, 1.0], &mut x, 1e-10, 10, &mut work).is_err());
    }
}
