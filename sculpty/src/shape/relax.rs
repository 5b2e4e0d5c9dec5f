//! Interior mesh relaxation following a boundary update.

use sprs::{FillInReduction, SymmetryCheck};
use sprs_ldl::Ldl;

use crate::mesh::Mesh;
use crate::params::SlimParams;
use crate::Error;

/// Outcome of a relaxation.
#[derive(Clone, Debug, PartialEq)]
pub struct Relaxed {
    pub vertices: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// Sum of squared distances between constrained vertices and their targets.
    pub error: f64,
}

/// Moves interior vertices so the mesh follows new boundary positions with little distortion.
pub trait MeshRelaxation {
    /// Relaxes `vertices` so that each vertex in `constrained` lands on the
    /// matching point of `targets` (flat, `dim` entries per vertex).
    fn relax(&mut self, vertices: &[f64], constrained: &[usize], targets: &[f64]) -> Result<Relaxed, Error>;

    /// Rebuilds the operator after the topology changed.
    fn reinitialize(&mut self, mesh: &Mesh);
}

/// Harmonic extension of the boundary displacement.
///
/// Solves `(L + p P) d = p P t` for the displacement `d`, where `L` is the
/// uniform graph Laplacian of the mesh edges, `P` selects constrained
/// vertices and `t` is their target displacement. The penalty `p` grows by
/// `exp_factor` until the constraints are met to `tol`.
#[derive(Clone, Debug)]
pub struct HarmonicRelaxation {
    dim: usize,
    num_vertices: usize,
    edges: Vec<[usize; 2]>,
    params: SlimParams,
}

impl HarmonicRelaxation {
    pub fn new(mesh: &Mesh, params: SlimParams) -> Self {
        HarmonicRelaxation {
            dim: mesh.dim,
            num_vertices: mesh.num_vertices(),
            edges: mesh.edges(),
            params,
        }
    }

    fn system(&self, constrained: &[usize], p: f64) -> sprs::CsMat<f64> {
        let n = self.num_vertices;
        let mut mat = sprs::TriMat::with_capacity((n, n), 4 * self.edges.len() + n);
        for &[a, b] in &self.edges {
            mat.add_triplet(a, a, 1.0);
            mat.add_triplet(b, b, 1.0);
            mat.add_triplet(a, b, -1.0);
            mat.add_triplet(b, a, -1.0);
        }
        for &v in constrained {
            mat.add_triplet(v, v, p);
        }
        mat.to_csc()
    }
}

impl MeshRelaxation for HarmonicRelaxation {
    fn relax(&mut self, vertices: &[f64], constrained: &[usize], targets: &[f64]) -> Result<Relaxed, Error> {
        let dim = self.dim;
        let n = self.num_vertices;
        if vertices.len() != n * dim || targets.len() != constrained.len() * dim {
            return Err(Error::SizeMismatch);
        }
        let max_iter = self.params.max_iter_for(dim);
        let mut p = self.params.soft_p;
        let mut relaxed = Relaxed {
            vertices: vertices.to_vec(),
            converged: false,
            iterations: 0,
            error: f64::INFINITY,
        };

        while relaxed.iterations < max_iter {
            let ldl = Ldl::new()
                .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
                .check_symmetry(SymmetryCheck::DontCheckSymmetry)
                .numeric(self.system(constrained, p).view())
                .map_err(|_| Error::LinearSolveFailed)?;
            for d in 0..dim {
                let mut rhs = vec![0.0; n];
                for (k, &v) in constrained.iter().enumerate() {
                    rhs[v] = p * (targets[k * dim + d] - vertices[v * dim + d]);
                }
                let disp = ldl.solve(&rhs[..]);
                for (v, u) in disp.into_iter().enumerate() {
                    relaxed.vertices[v * dim + d] = vertices[v * dim + d] + u;
                }
            }
            relaxed.iterations += 1;
            relaxed.error = constrained
                .iter()
                .enumerate()
                .map(|(k, &v)| {
                    (0..dim)
                        .map(|d| {
                            let e = relaxed.vertices[v * dim + d] - targets[k * dim + d];
                            e * e
                        })
                        .sum::<f64>()
                })
                .sum();
            if !relaxed.error.is_finite() {
                return Err(Error::LinearSolveFailed);
            }
            if relaxed.iterations >= self.params.min_iter && relaxed.error < self.params.tol {
                relaxed.converged = true;
                break;
            }
            p *= self.params.exp_factor;
        }

        if relaxed.converged {
            // Land exactly on the constraints.
            for (k, &v) in constrained.iter().enumerate() {
                relaxed.vertices[v * dim..(v + 1) * dim]
                    .copy_from_slice(&targets[k * dim..(k + 1) * dim]);
            }
        } else {
            log::warn!(
                "Mesh relaxation did not converge after {} iterations (error {:.3e})",
                relaxed.iterations,
                relaxed.error
            );
        }
        Ok(relaxed)
    }

    fn reinitialize(&mut self, mesh: &Mesh) {
        *self = HarmonicRelaxation::new(mesh, self.params.clone());
    }
}
