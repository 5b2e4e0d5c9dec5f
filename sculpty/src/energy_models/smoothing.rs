//! Laplacian fairness energy over the boundary of a mesh.
//!
//! For each boundary vertex `i` with boundary neighbours `N(i)` let
//! `L_i = Σ_{j∈N(i)} (x_i - x_j)`. The plain energy is `Σ_i ‖L_i‖²`. The scale
//! invariant energy is `Σ_i (‖L_i‖ / Σ_{j∈N(i)} ‖x_i - x_j‖)^p`, which does not
//! change under uniform scaling of the shape.

use na::allocator::Allocator;
use na::{DefaultAllocator, Dim};

use crate::dual::{with_capacity, DScalar1, DiffScalar, DofCapacity};
use crate::mesh::Mesh;
use crate::{Energy, EnergyGradient};

#[derive(Clone, Debug)]
pub struct BoundarySmoother {
    dim: usize,
    /// Boundary vertices and their boundary neighbours.
    stars: Vec<(usize, Vec<usize>)>,
    pub scale_invariant: bool,
    pub power: f64,
}

fn star_energy<T: DiffScalar>(x: &[T], dim: usize, scale_invariant: bool, power: f64) -> T {
    let k = x.len() / dim - 1;
    let mut lap: [T; 3] = std::array::from_fn(|_| T::zero());
    let mut len_sum = T::zero();
    for j in 1..=k {
        let mut d2 = T::zero();
        for d in 0..dim {
            let diff = x[d].clone() - x[j * dim + d].clone();
            lap[d] = lap[d].clone() + diff.clone();
            d2 = d2 + diff.clone() * diff;
        }
        if scale_invariant {
            len_sum = len_sum + d2.sqrt();
        }
    }
    let mut sq = T::zero();
    for l in lap.iter().take(dim) {
        sq = sq + l.clone() * l.clone();
    }
    if !scale_invariant {
        return sq;
    }
    if sq.real() <= 1e-28 || len_sum.real() <= 0.0 {
        // Flat star. The energy and, for p > 1, its gradient vanish.
        return T::zero();
    }
    (sq.sqrt() * len_sum.recip()).powf(power)
}

fn star_gradient_with<D: Dim>(x: &[f64], dim: usize, scale_invariant: bool, power: f64) -> Vec<f64>
where
    DefaultAllocator: Allocator<f64, D>,
{
    let vars = DScalar1::<D>::variables(x);
    star_energy(&vars, dim, scale_invariant, power).gradient(x.len())
}

impl BoundarySmoother {
    pub fn new(mesh: &Mesh, scale_invariant: bool, power: f64) -> Self {
        let n = mesh.num_vertices();
        let mut nbrs: Vec<Vec<usize>> = vec![Vec::new(); n];
        for facet in mesh.boundary_facets() {
            let m = facet.len();
            // Facets in 2D are single edges; in 3D walk the facet loop.
            let num_edges = if m == 2 { 1 } else { m };
            for e in 0..num_edges {
                let (a, b) = (facet[e], facet[(e + 1) % m]);
                if !nbrs[a].contains(&b) {
                    nbrs[a].push(b);
                }
                if !nbrs[b].contains(&a) {
                    nbrs[b].push(a);
                }
            }
        }
        let stars = nbrs
            .into_iter()
            .enumerate()
            .filter(|(_, nb)| !nb.is_empty())
            .collect();
        BoundarySmoother {
            dim: mesh.dim,
            stars,
            scale_invariant,
            power,
        }
    }

    fn star_coords(&self, center: usize, nbrs: &[usize], vertices: &[f64]) -> Vec<f64> {
        let dim = self.dim;
        std::iter::once(center)
            .chain(nbrs.iter().cloned())
            .flat_map(|v| vertices[v * dim..(v + 1) * dim].iter().cloned())
            .collect()
    }

    fn energy_with(&self, vertices: &[f64], scale_invariant: bool) -> f64 {
        self.stars
            .iter()
            .map(|(c, nb)| {
                star_energy(
                    &self.star_coords(*c, nb, vertices),
                    self.dim,
                    scale_invariant,
                    self.power,
                )
            })
            .sum()
    }

    fn add_gradient_with(&self, vertices: &[f64], scale_invariant: bool, grad: &mut [f64]) {
        let dim = self.dim;
        for (c, nb) in self.stars.iter() {
            let x = self.star_coords(*c, nb, vertices);
            let local = with_capacity!(
                DofCapacity::for_dofs(x.len()),
                star_gradient_with(&x, dim, scale_invariant, self.power)
            );
            for (a, v) in std::iter::once(*c).chain(nb.iter().cloned()).enumerate() {
                for d in 0..dim {
                    grad[v * dim + d] += local[a * dim + d];
                }
            }
        }
    }

    /// Plain Laplacian energy.
    pub fn smoothing_energy(&self, vertices: &[f64]) -> f64 {
        self.energy_with(vertices, false)
    }

    pub fn smoothing_gradient(&self, vertices: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; vertices.len()];
        self.add_gradient_with(vertices, false, &mut grad);
        grad
    }

    /// Scale invariant energy with exponent `power`.
    pub fn weighted_smoothing_energy(&self, vertices: &[f64]) -> f64 {
        self.energy_with(vertices, true)
    }

    pub fn weighted_smoothing_gradient(&self, vertices: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; vertices.len()];
        self.add_gradient_with(vertices, true, &mut grad);
        grad
    }
}

/// Evaluates the configured variant.
impl Energy for BoundarySmoother {
    fn energy(&self, vertices: &[f64]) -> f64 {
        self.energy_with(vertices, self.scale_invariant)
    }
}

impl EnergyGradient for BoundarySmoother {
    fn add_energy_gradient(&self, vertices: &[f64], grad: &mut [f64]) {
        self.add_gradient_with(vertices, self.scale_invariant, grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_models::test_utils::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    fn perturbed(mesh: &Mesh, seed: u64) -> Vec<f64> {
        mesh.vertices
            .iter()
            .zip(random_displacement(mesh.num_dofs(), 0.05, seed))
            .map(|(x, p)| x + p)
            .collect()
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mesh = unit_square_tri_mesh(3);
        let v = perturbed(&mesh, 21);
        for scale_invariant in [false, true] {
            let s = BoundarySmoother::new(&mesh, scale_invariant, 2.0);
            let grad = s.energy_gradient(&v);
            gradient_tester(|x| s.energy(x), &grad, &v, 1e-7, 1e-5);
        }
    }

    #[test]
    fn scale_invariance() {
        let mesh = unit_square_tri_mesh(2);
        let v = perturbed(&mesh, 22);
        let s = BoundarySmoother::new(&mesh, true, 2.0);
        let scaled: Vec<f64> = v.iter().map(|x| 3.0 * x).collect();
        assert_relative_eq!(
            s.weighted_smoothing_energy(&v),
            s.weighted_smoothing_energy(&scaled),
            max_relative = 1e-12
        );
        assert_relative_eq!(
            9.0 * s.smoothing_energy(&v),
            s.smoothing_energy(&scaled),
            max_relative = 1e-12
        );
    }

    #[test]
    fn straight_sides_are_smooth_in_the_interior() {
        // Only the four corners of an undisturbed square contribute.
        let mesh = unit_square_tri_mesh(4);
        let s = BoundarySmoother::new(&mesh, false, 2.0);
        let corner = 0.25_f64 * 0.25 * 2.0;
        assert_relative_eq!(s.smoothing_energy(&mesh.vertices), 4.0 * corner, epsilon = 1e-12);
    }

    #[test]
    fn tet_surface_stars() {
        let mesh = unit_cube_tet_mesh();
        let s = BoundarySmoother::new(&mesh, true, 2.0);
        assert_eq!(s.stars.len(), 8);
        let v = perturbed(&mesh, 23);
        let grad = s.energy_gradient(&v);
        gradient_tester(|x| s.energy(x), &grad, &v, 1e-7, 1e-5);
    }
}
