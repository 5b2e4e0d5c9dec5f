//! Nodal shape functions, quadrature and precomputed per-element geometry.
//!
//! Elements are the linear simplices (triangles and tetrahedra) and the
//! multilinear tensor product elements (quads and hexahedra) on the unit
//! reference cell `[0, 1]^d`.

use serde::{Deserialize, Serialize};

use crate::dual::DiffScalar;
use crate::Error;

/// A 3x3 matrix stored as rows. Planar problems only use the leading 2x2 block.
pub type Mat3<T> = [[T; 3]; 3];

pub(crate) fn mat3_zero<T: DiffScalar>() -> Mat3<T> {
    std::array::from_fn(|_| std::array::from_fn(|_| T::zero()))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Triangle,
    Quad,
    Tetrahedron,
    Hexahedron,
}

const TRI_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const QUAD_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
const TET_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
const HEX_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

const TET_FACES: [&[usize]; 4] = [&[0, 2, 1], &[0, 1, 3], &[0, 3, 2], &[1, 2, 3]];
const HEX_FACES: [&[usize]; 6] = [
    &[0, 3, 2, 1],
    &[4, 5, 6, 7],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
];
const TRI_FACETS: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const QUAD_FACETS: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];

/// Neighbours of each corner ordered so that a positively oriented cell has
/// a positive corner Jacobian.
const QUAD_CORNERS: [[usize; 2]; 4] = [[1, 3], [2, 0], [3, 1], [0, 2]];
const HEX_CORNERS: [[usize; 3]; 8] = [
    [1, 3, 4],
    [2, 0, 5],
    [3, 1, 6],
    [0, 2, 7],
    [7, 5, 0],
    [4, 6, 1],
    [5, 7, 2],
    [6, 4, 3],
];

impl ElementKind {
    pub fn dim(self) -> usize {
        match self {
            ElementKind::Triangle | ElementKind::Quad => 2,
            ElementKind::Tetrahedron | ElementKind::Hexahedron => 3,
        }
    }

    pub fn num_nodes(self) -> usize {
        match self {
            ElementKind::Triangle => 3,
            ElementKind::Quad => 4,
            ElementKind::Tetrahedron => 4,
            ElementKind::Hexahedron => 8,
        }
    }

    pub fn is_simplex(self) -> bool {
        matches!(self, ElementKind::Triangle | ElementKind::Tetrahedron)
    }

    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            ElementKind::Triangle => &TRI_EDGES,
            ElementKind::Quad => &QUAD_EDGES,
            ElementKind::Tetrahedron => &TET_EDGES,
            ElementKind::Hexahedron => &HEX_EDGES,
        }
    }

    /// Boundary facets in local numbering, oriented outward for positively oriented cells.
    pub fn facets(self) -> &'static [&'static [usize]] {
        match self {
            ElementKind::Triangle => &TRI_FACETS,
            ElementKind::Quad => &QUAD_FACETS,
            ElementKind::Tetrahedron => &TET_FACES,
            ElementKind::Hexahedron => &HEX_FACES,
        }
    }

    /// For each corner, the corners it shares an edge with.
    pub(crate) fn corner_neighbours(self, corner: usize) -> &'static [usize] {
        match self {
            ElementKind::Quad => &QUAD_CORNERS[corner],
            ElementKind::Hexahedron => &HEX_CORNERS[corner],
            _ => &[],
        }
    }

    /// Shape function values at the reference point `xi`.
    pub fn shape_values(self, xi: &[f64; 3]) -> Vec<f64> {
        let [x, y, z] = *xi;
        match self {
            ElementKind::Triangle => vec![1.0 - x - y, x, y],
            ElementKind::Tetrahedron => vec![1.0 - x - y - z, x, y, z],
            ElementKind::Quad => vec![(1.0 - x) * (1.0 - y), x * (1.0 - y), x * y, (1.0 - x) * y],
            ElementKind::Hexahedron => vec![
                (1.0 - x) * (1.0 - y) * (1.0 - z),
                x * (1.0 - y) * (1.0 - z),
                x * y * (1.0 - z),
                (1.0 - x) * y * (1.0 - z),
                (1.0 - x) * (1.0 - y) * z,
                x * (1.0 - y) * z,
                x * y * z,
                (1.0 - x) * y * z,
            ],
        }
    }

    /// Shape function gradients with respect to reference coordinates at `xi`.
    pub fn reference_gradients(self, xi: &[f64; 3]) -> Vec<[f64; 3]> {
        let [x, y, z] = *xi;
        match self {
            ElementKind::Triangle => vec![[-1.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            ElementKind::Tetrahedron => vec![
                [-1.0, -1.0, -1.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            ElementKind::Quad => vec![
                [-(1.0 - y), -(1.0 - x), 0.0],
                [1.0 - y, -x, 0.0],
                [y, x, 0.0],
                [-y, 1.0 - x, 0.0],
            ],
            ElementKind::Hexahedron => vec![
                [-(1.0 - y) * (1.0 - z), -(1.0 - x) * (1.0 - z), -(1.0 - x) * (1.0 - y)],
                [(1.0 - y) * (1.0 - z), -x * (1.0 - z), -x * (1.0 - y)],
                [y * (1.0 - z), x * (1.0 - z), -x * y],
                [-y * (1.0 - z), (1.0 - x) * (1.0 - z), -(1.0 - x) * y],
                [-(1.0 - y) * z, -(1.0 - x) * z, (1.0 - x) * (1.0 - y)],
                [(1.0 - y) * z, -x * z, x * (1.0 - y)],
                [y * z, x * z, x * y],
                [-y * z, (1.0 - x) * z, (1.0 - x) * y],
            ],
        }
    }

    /// Reference coordinates of the element nodes.
    pub fn reference_nodes(self) -> Vec<[f64; 3]> {
        match self {
            ElementKind::Triangle => vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            ElementKind::Tetrahedron => vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            ElementKind::Quad => vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            ElementKind::Hexahedron => vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 1.0, 1.0],
            ],
        }
    }

    /// Default quadrature: one point for linear simplices, tensor Gauss rules otherwise.
    pub fn quadrature(self) -> Quadrature {
        match self {
            ElementKind::Triangle => Quadrature {
                points: vec![[1.0 / 3.0, 1.0 / 3.0, 0.0]],
                weights: vec![0.5],
            },
            ElementKind::Tetrahedron => Quadrature {
                points: vec![[0.25, 0.25, 0.25]],
                weights: vec![1.0 / 6.0],
            },
            ElementKind::Quad => Quadrature::gauss_tensor(2),
            ElementKind::Hexahedron => Quadrature::gauss_tensor(3),
        }
    }
}

/// Quadrature points in reference coordinates with their weights.
#[derive(Clone, Debug, PartialEq)]
pub struct Quadrature {
    pub points: Vec<[f64; 3]>,
    pub weights: Vec<f64>,
}

impl Quadrature {
    /// Two point Gauss-Legendre tensor rule on `[0, 1]^dim`.
    fn gauss_tensor(dim: usize) -> Quadrature {
        let h = 0.5 / 3.0_f64.sqrt();
        let pts = [0.5 - h, 0.5 + h];
        let mut points = Vec::new();
        let mut weights = Vec::new();
        let nz = if dim == 3 { 2 } else { 1 };
        for k in 0..nz {
            for j in 0..2 {
                for i in 0..2 {
                    let z = if dim == 3 { pts[k] } else { 0.0 };
                    points.push([pts[i], pts[j], z]);
                    weights.push(if dim == 3 { 0.125 } else { 0.25 });
                }
            }
        }
        Quadrature { points, weights }
    }

    /// Sample points without weights, for post-processing queries.
    pub fn samples(points: Vec<[f64; 3]>) -> Quadrature {
        let weights = vec![0.0; points.len()];
        Quadrature { points, weights }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Determinant and inverse of the leading `dim`x`dim` block.
pub(crate) fn det_inverse<T: DiffScalar>(m: &Mat3<T>, dim: usize) -> (T, Mat3<T>) {
    let mut inv = mat3_zero::<T>();
    if dim == 2 {
        let det = m[0][0].clone() * m[1][1].clone() - m[0][1].clone() * m[1][0].clone();
        let r = det.clone().recip();
        inv[0][0] = m[1][1].clone() * r.clone();
        inv[0][1] = -(m[0][1].clone() * r.clone());
        inv[1][0] = -(m[1][0].clone() * r.clone());
        inv[1][1] = m[0][0].clone() * r;
        (det, inv)
    } else {
        let cof = |i0: usize, i1: usize, j0: usize, j1: usize| {
            m[i0][j0].clone() * m[i1][j1].clone() - m[i0][j1].clone() * m[i1][j0].clone()
        };
        let c00 = cof(1, 2, 1, 2);
        let c01 = cof(1, 2, 2, 0);
        let c02 = cof(1, 2, 0, 1);
        let det = m[0][0].clone() * c00.clone()
            + m[0][1].clone() * c01.clone()
            + m[0][2].clone() * c02.clone();
        let r = det.clone().recip();
        inv[0][0] = c00 * r.clone();
        inv[1][0] = c01 * r.clone();
        inv[2][0] = c02 * r.clone();
        inv[0][1] = cof(0, 2, 2, 1) * r.clone();
        inv[1][1] = cof(0, 2, 0, 2) * r.clone();
        inv[2][1] = cof(0, 2, 1, 0) * r.clone();
        inv[0][2] = cof(0, 1, 1, 2) * r.clone();
        inv[1][2] = cof(0, 1, 2, 0) * r.clone();
        inv[2][2] = cof(0, 1, 0, 1) * r;
        (det, inv)
    }
}

/// Determinant of the leading `dim`x`dim` block.
pub(crate) fn det<T: DiffScalar>(m: &Mat3<T>, dim: usize) -> T {
    if dim == 2 {
        m[0][0].clone() * m[1][1].clone() - m[0][1].clone() * m[1][0].clone()
    } else {
        m[0][0].clone() * (m[1][1].clone() * m[2][2].clone() - m[1][2].clone() * m[2][1].clone())
            - m[0][1].clone()
                * (m[1][0].clone() * m[2][2].clone() - m[1][2].clone() * m[2][0].clone())
            + m[0][2].clone()
                * (m[1][0].clone() * m[2][1].clone() - m[1][1].clone() * m[2][0].clone())
    }
}

/// Geometry of one element at one reference point.
pub struct PointGeometry<T> {
    /// Signed Jacobian determinant of the reference to physical map.
    pub jac_det: T,
    /// Physical gradient of each shape function.
    pub grads: Vec<[T; 3]>,
}

/// Maps reference gradients at `xi` to physical gradients for the element with
/// nodes `nodes` (node major, `dim` coordinates per node).
///
/// Generic over the scalar so the geometry can be differentiated with respect
/// to node positions.
#[allow(non_snake_case)]
pub fn element_geometry<T: DiffScalar>(
    kind: ElementKind,
    nodes: &[T],
    xi: &[f64; 3],
) -> PointGeometry<T> {
    let dim = kind.dim();
    let ref_grads = kind.reference_gradients(xi);
    debug_assert_eq!(nodes.len(), ref_grads.len() * dim);

    // J_ij = Σ_a X_ai ∂N_a/∂ξ_j
    let mut J = mat3_zero::<T>();
    for (a, g) in ref_grads.iter().enumerate() {
        for i in 0..dim {
            for j in 0..dim {
                if g[j] != 0.0 {
                    J[i][j] = J[i][j].clone() + nodes[a * dim + i].clone().scale(g[j]);
                }
            }
        }
    }
    let (jac_det, J_inv) = det_inverse(&J, dim);

    // ∇_X N_a = J⁻ᵀ ∇_ξ N_a
    let grads = ref_grads
        .iter()
        .map(|g| {
            std::array::from_fn(|i| {
                let mut acc = T::zero();
                if i < dim {
                    for j in 0..dim {
                        if g[j] != 0.0 {
                            acc = acc + J_inv[j][i].clone().scale(g[j]);
                        }
                    }
                }
                acc
            })
        })
        .collect();
    PointGeometry { jac_det, grads }
}

/// Precomputed geometric quantities of one element at its quadrature points.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementValues {
    pub kind: ElementKind,
    /// Reference coordinates of the evaluation points.
    pub points: Vec<[f64; 3]>,
    /// Quadrature weight times the absolute Jacobian determinant.
    pub da: Vec<f64>,
    /// Shape function values per point and node.
    pub values: Vec<Vec<f64>>,
    /// Physical shape function gradients per point and node.
    pub grads: Vec<Vec<[f64; 3]>>,
}

impl ElementValues {
    /// Precomputes the element geometry for the element with the given node positions.
    ///
    /// Returns `Error::DegenerateReferenceElement` if the Jacobian vanishes at
    /// any point; the element index is filled in by the caller.
    pub fn compute(
        kind: ElementKind,
        nodes: &[f64],
        quadrature: &Quadrature,
    ) -> Result<ElementValues, Error> {
        let n = quadrature.len();
        let mut da = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);
        let mut grads = Vec::with_capacity(n);
        for (xi, &w) in quadrature.points.iter().zip(quadrature.weights.iter()) {
            let geo = element_geometry::<f64>(kind, nodes, xi);
            if geo.jac_det.abs() < 1e-14 || !geo.jac_det.is_finite() {
                return Err(Error::DegenerateReferenceElement { degens: vec![0] });
            }
            da.push(w * geo.jac_det.abs());
            values.push(kind.shape_values(xi));
            grads.push(geo.grads);
        }
        Ok(ElementValues {
            kind,
            points: quadrature.points.clone(),
            da,
            values,
            grads,
        })
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.kind.num_nodes()
    }

    pub fn dim(&self) -> usize {
        self.kind.dim()
    }

    /// Number of local degrees of freedom.
    pub fn num_dofs(&self) -> usize {
        self.num_nodes() * self.dim()
    }
}
