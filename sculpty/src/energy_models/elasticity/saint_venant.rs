//! Saint Venant-Kirchhoff element energy.
//!
//! The element energy is written once against [`DiffScalar`]; gradients and
//! Hessians come from evaluating it with dual scalars sized by the number of
//! local degrees of freedom.

use na::allocator::Allocator;
use na::{DMatrix, DefaultAllocator, Dim};

use super::ElasticityTensor;
use crate::basis::{det, element_geometry, mat3_zero, ElementKind, ElementValues, Mat3, Quadrature};
use crate::dual::{with_capacity, DScalar1, DScalar2, DiffScalar, DofCapacity};

/// Stresses at one sample point of an element.
#[derive(Clone, Debug, PartialEq)]
pub struct StressSample {
    /// Reference coordinates of the sample.
    pub point: [f64; 3],
    pub second_pk: Mat3<f64>,
    pub first_pk: Mat3<f64>,
    pub cauchy: Mat3<f64>,
    pub von_mises: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SaintVenantElasticity {
    tensor: ElasticityTensor,
}

/// `∇u_ij = Σ_a u_ai ∂N_a/∂X_j` with `u` in node major order.
fn displacement_gradient<T: DiffScalar>(grads: &[[f64; 3]], u: &[T], dim: usize) -> Mat3<T> {
    let mut grad_u = mat3_zero::<T>();
    for (a, g) in grads.iter().enumerate() {
        for i in 0..dim {
            for j in 0..dim {
                if g[j] != 0.0 {
                    grad_u[i][j] = grad_u[i][j].clone() + u[a * dim + i].clone().scale(g[j]);
                }
            }
        }
    }
    grad_u
}

fn gradient_with<D: Dim>(
    model: &SaintVenantElasticity,
    vals: &ElementValues,
    u: &[f64],
) -> Vec<f64>
where
    DefaultAllocator: Allocator<f64, D>,
{
    let vars = DScalar1::<D>::variables(u);
    model.element_energy(vals, &vars).gradient(u.len())
}

fn hessian_with<D: Dim>(
    model: &SaintVenantElasticity,
    vals: &ElementValues,
    u: &[f64],
) -> DMatrix<f64>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, D, D>,
{
    let n = u.len();
    let vars = DScalar2::<D>::variables(u);
    let energy = model.element_energy(vals, &vars);
    DMatrix::from_fn(n, n, |i, j| energy.hessian_entry(i, j))
}

fn shape_gradient_with<D: Dim>(
    model: &SaintVenantElasticity,
    kind: ElementKind,
    nodes: &[f64],
    u: &[f64],
    quadrature: &Quadrature,
) -> Vec<f64>
where
    DefaultAllocator: Allocator<f64, D>,
{
    let vars = DScalar1::<D>::variables(nodes);
    model
        .element_energy_wrt_nodes(kind, &vars, u, quadrature)
        .gradient(nodes.len())
}

impl SaintVenantElasticity {
    pub fn new(tensor: ElasticityTensor) -> Self {
        SaintVenantElasticity { tensor }
    }

    pub fn tensor(&self) -> &ElasticityTensor {
        &self.tensor
    }

    /// Strain energy of one element given its local displacements `u` (node major).
    pub fn element_energy<T: DiffScalar>(&self, vals: &ElementValues, u: &[T]) -> T {
        let dim = vals.dim();
        debug_assert_eq!(u.len(), vals.num_dofs());
        let mut energy = T::zero();
        for (grads, &da) in vals.grads.iter().zip(vals.da.iter()) {
            let grad_u = displacement_gradient(grads, u, dim);
            energy = energy + self.tensor.energy_density(&grad_u).scale(da);
        }
        energy
    }

    /// Gradient of the element energy with respect to the local displacements.
    pub fn element_gradient(&self, vals: &ElementValues, u: &[f64]) -> Vec<f64> {
        with_capacity!(DofCapacity::for_dofs(u.len()), gradient_with(self, vals, u))
    }

    /// Dense Hessian of the element energy with respect to the local displacements.
    pub fn element_hessian(&self, vals: &ElementValues, u: &[f64]) -> DMatrix<f64> {
        with_capacity!(DofCapacity::for_dofs(u.len()), hessian_with(self, vals, u))
    }

    /// Strain energy of the element with node positions `nodes` under the fixed
    /// displacement `u`. The geometry is recomputed from `nodes` so the result
    /// can be differentiated with respect to the shape.
    pub fn element_energy_wrt_nodes<T: DiffScalar>(
        &self,
        kind: ElementKind,
        nodes: &[T],
        u: &[f64],
        quadrature: &Quadrature,
    ) -> T {
        let dim = kind.dim();
        let mut energy = T::zero();
        for (xi, &w) in quadrature.points.iter().zip(quadrature.weights.iter()) {
            let geo = element_geometry(kind, nodes, xi);
            let mut grad_u = mat3_zero::<T>();
            for (a, g) in geo.grads.iter().enumerate() {
                for i in 0..dim {
                    for j in 0..dim {
                        grad_u[i][j] = grad_u[i][j].clone() + g[j].clone().scale(u[a * dim + i]);
                    }
                }
            }
            let da = geo.jac_det.abs().scale(w);
            energy = energy + self.tensor.energy_density(&grad_u) * da;
        }
        energy
    }

    /// Gradient of the element energy with respect to its node positions at fixed displacement.
    pub fn element_shape_gradient(
        &self,
        kind: ElementKind,
        nodes: &[f64],
        u: &[f64],
        quadrature: &Quadrature,
    ) -> Vec<f64> {
        with_capacity!(
            DofCapacity::for_dofs(nodes.len()),
            shape_gradient_with(self, kind, nodes, u, quadrature)
        )
    }

    /// Whether the deformation gradient `I + ∇u` has a positive determinant at every point.
    pub fn is_valid(&self, vals: &ElementValues, u: &[f64]) -> bool {
        let dim = vals.dim();
        vals.grads.iter().all(|grads| {
            let mut f = displacement_gradient(grads, u, dim);
            for (i, row) in f.iter_mut().enumerate().take(dim) {
                row[i] += 1.0;
            }
            det(&f, dim) > 0.0
        })
    }

    /// Stress tensors and the von Mises stress at the points of `vals`.
    ///
    /// Returns `None` if the deformed element is degenerate or inverted at
    /// any point, where the Cauchy stress is undefined.
    #[allow(non_snake_case)]
    pub fn stresses(&self, vals: &ElementValues, u: &[f64]) -> Option<Vec<StressSample>> {
        let dim = vals.dim();
        vals.grads
            .iter()
            .zip(vals.points.iter())
            .map(|(grads, point)| {
                let grad_u = displacement_gradient(grads, u, dim);
                let E = super::green_strain(&grad_u, dim);
                let S = self.tensor.second_pk_stress(&E);
                let mut F = grad_u;
                for (i, row) in F.iter_mut().enumerate().take(dim) {
                    row[i] += 1.0;
                }
                let J = det(&F, dim);
                if J <= 0.0 || !J.is_finite() {
                    return None;
                }
                let P = matmul(&F, &S, dim);
                let mut cauchy = [[0.0; 3]; 3];
                for i in 0..dim {
                    for j in 0..dim {
                        cauchy[i][j] = (0..dim).map(|k| P[i][k] * F[j][k]).sum::<f64>() / J;
                    }
                }
                Some(StressSample {
                    point: *point,
                    second_pk: S,
                    first_pk: P,
                    von_mises: von_mises(&cauchy, dim),
                    cauchy,
                })
            })
            .collect()
    }
}

fn matmul(a: &Mat3<f64>, b: &Mat3<f64>, dim: usize) -> Mat3<f64> {
    let mut out = [[0.0; 3]; 3];
    for i in 0..dim {
        for j in 0..dim {
            out[i][j] = (0..dim).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Von Mises equivalent of a symmetric stress tensor.
pub fn von_mises(s: &Mat3<f64>, dim: usize) -> f64 {
    if dim == 2 {
        (s[0][0] * s[0][0] - s[0][0] * s[1][1] + s[1][1] * s[1][1] + 3.0 * s[0][1] * s[0][1]).sqrt()
    } else {
        let d01 = s[0][0] - s[1][1];
        let d12 = s[1][1] - s[2][2];
        let d20 = s[2][2] - s[0][0];
        (0.5 * (d01 * d01 + d12 * d12 + d20 * d20)
            + 3.0 * (s[0][1] * s[0][1] + s[1][2] * s[1][2] + s[2][0] * s[2][0]))
            .sqrt()
    }
}
