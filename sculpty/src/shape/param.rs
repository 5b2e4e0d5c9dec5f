//! Design variable encoding for shape optimization.
//!
//! The design vector is the flattened vertex array. Tied duplicates and
//! fixed vertices stay in the vector so geometry remains consistent, but no
//! gradient flows into them.

use crate::contact::ContactGate;
use crate::mesh::Mesh;
use crate::params::ShapeOptParams;

#[derive(Clone, Debug, PartialEq)]
pub struct ShapeParametrization {
    dim: usize,
    free_dims: Vec<bool>,
    /// Per vertex flag.
    fixed: Vec<bool>,
    /// `[representative, duplicate]` pairs.
    tied: Vec<[usize; 2]>,
}

impl ShapeParametrization {
    pub fn new(
        dim: usize,
        num_vertices: usize,
        fixed_nodes: &[usize],
        tied: Vec<[usize; 2]>,
        free_dims: Vec<bool>,
    ) -> Self {
        assert_eq!(free_dims.len(), dim, "one free flag per axis expected");
        let mut fixed = vec![false; num_vertices];
        for &v in fixed_nodes {
            fixed[v] = true;
        }
        ShapeParametrization {
            dim,
            free_dims,
            fixed,
            tied,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.fixed.len() * self.dim
    }

    pub fn tied_nodes(&self) -> &[[usize; 2]] {
        &self.tied
    }

    pub fn fixed_nodes(&self) -> Vec<usize> {
        self.fixed
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| if f { Some(i) } else { None })
            .collect()
    }

    pub fn is_fixed(&self, vertex: usize) -> bool {
        self.fixed[vertex]
    }

    /// Vertex positions for the design vector `x`, with every duplicate snapped onto its representative.
    pub fn x_to_param(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.num_variables(), "design vector size mismatch");
        let dim = self.dim;
        let mut v = x.to_vec();
        for &[rep, dup] in &self.tied {
            for d in 0..dim {
                v[dup * dim + d] = v[rep * dim + d];
            }
        }
        v
    }

    pub fn param_to_x(&self, vertices: &[f64]) -> Vec<f64> {
        assert_eq!(vertices.len(), self.num_variables(), "vertex array size mismatch");
        vertices.to_vec()
    }

    /// Pulls a per vertex gradient back to the design vector.
    pub fn dparam_to_dx(&self, grad: &[f64]) -> Vec<f64> {
        assert_eq!(grad.len(), self.num_variables(), "gradient size mismatch");
        let dim = self.dim;
        let mut dx = grad.to_vec();
        for (v, g) in dx.chunks_exact_mut(dim).enumerate() {
            for (d, g) in g.iter_mut().enumerate() {
                if self.fixed[v] || !self.free_dims[d] {
                    *g = 0.0;
                }
            }
        }
        for &[rep, dup] in &self.tied {
            for d in 0..dim {
                dx[rep * dim + d] += dx[dup * dim + d];
                dx[dup * dim + d] = 0.0;
            }
        }
        dx
    }
}

/// Pairs of coincident vertices.
///
/// Vertex `i` is tied to the first `j < i` closer than `threshold`, giving the pair `[i, j]`.
pub fn build_tied_nodes(vertices: &[f64], dim: usize, threshold: f64) -> Vec<[usize; 2]> {
    let points: Vec<&[f64]> = vertices.chunks_exact(dim).collect();
    let t2 = threshold * threshold;
    points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            points[..i]
                .iter()
                .position(|q| p.iter().zip(q.iter()).map(|(a, b)| (a - b) * (a - b)).sum::<f64>() < t2)
                .map(|j| [i, j])
        })
        .collect()
}

/// Vertices excluded from the design space, sorted.
///
/// `contact` is consulted only when `fix_contact_surface` is set.
pub fn build_fixed_nodes(
    mesh: &Mesh,
    params: &ShapeOptParams,
    contact: Option<&ContactGate>,
) -> Vec<usize> {
    let mut fixed = Vec::new();
    let boundary = mesh.boundary_facets();

    if !params.volume_selection.is_empty() {
        for (cell, body) in mesh.cell_iter().zip(mesh.body_ids.iter()) {
            if !params.volume_selection.contains(body) {
                fixed.extend_from_slice(cell);
            }
        }
    } else if !params.surface_selection.is_empty() {
        for facet in &boundary {
            let selected = mesh
                .facet_tag(facet)
                .map_or(false, |t| params.surface_selection.contains(&t));
            if !selected {
                fixed.extend_from_slice(facet);
            }
        }
    }

    let mut tagged = |ids: &[i32]| {
        for facet in &boundary {
            if mesh.facet_tag(facet).map_or(false, |t| ids.contains(&t)) {
                fixed.extend_from_slice(facet);
            }
        }
    };
    if params.fix_dirichlet {
        tagged(&params.dirichlet_boundary_ids[..]);
    }
    tagged(&params.neumann_boundary_ids[..]);

    if params.fix_contact_surface {
        if let Some(gate) = contact {
            fixed.extend(gate.vertices_within(&mesh.vertices, params.fix_contact_surface_tol));
        }
    }

    fixed.sort_unstable();
    fixed.dedup();
    fixed
}
