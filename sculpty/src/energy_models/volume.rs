//! Total mesh volume with a soft two sided bound.

use na::allocator::Allocator;
use na::{DefaultAllocator, Dim};

use crate::basis::{element_geometry, ElementKind, Quadrature};
use crate::dual::{with_capacity, DScalar1, DiffScalar, DofCapacity};
use crate::mesh::Mesh;
use crate::{Energy, EnergyGradient};

/// Penalizes the total volume (area in 2D) leaving `[min_volume, max_volume]` quadratically.
#[derive(Clone, Debug)]
pub struct VolumeFunctional {
    kind: ElementKind,
    dim: usize,
    cells: Vec<usize>,
    quadrature: Quadrature,
    pub min_volume: f64,
    pub max_volume: f64,
}

fn element_measure<T: DiffScalar>(kind: ElementKind, nodes: &[T], quadrature: &Quadrature) -> T {
    let mut measure = T::zero();
    for (xi, &w) in quadrature.points.iter().zip(quadrature.weights.iter()) {
        let geo = element_geometry(kind, nodes, xi);
        measure = measure + geo.jac_det.scale(w);
    }
    measure
}

fn measure_gradient_with<D: Dim>(kind: ElementKind, nodes: &[f64], quadrature: &Quadrature) -> Vec<f64>
where
    DefaultAllocator: Allocator<f64, D>,
{
    let vars = DScalar1::<D>::variables(nodes);
    element_measure(kind, &vars, quadrature).gradient(nodes.len())
}

impl VolumeFunctional {
    pub fn new(mesh: &Mesh, min_volume: f64, max_volume: f64) -> Self {
        VolumeFunctional {
            kind: mesh.kind,
            dim: mesh.dim,
            cells: mesh.cells.clone(),
            quadrature: mesh.kind.quadrature(),
            min_volume,
            max_volume,
        }
    }

    fn cell_nodes(&self, cell: &[usize], vertices: &[f64]) -> Vec<f64> {
        cell.iter()
            .flat_map(|&v| vertices[v * self.dim..(v + 1) * self.dim].iter().cloned())
            .collect()
    }

    /// Signed total volume.
    pub fn volume(&self, vertices: &[f64]) -> f64 {
        self.cells
            .chunks_exact(self.kind.num_nodes())
            .map(|cell| element_measure(self.kind, &self.cell_nodes(cell, vertices), &self.quadrature))
            .sum()
    }

    /// Amount by which the volume lies outside the bounds, negative below the minimum.
    fn violation(&self, volume: f64) -> f64 {
        if volume > self.max_volume {
            volume - self.max_volume
        } else if volume < self.min_volume {
            volume - self.min_volume
        } else {
            0.0
        }
    }

    pub fn volume_gradient(&self, vertices: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; vertices.len()];
        for cell in self.cells.chunks_exact(self.kind.num_nodes()) {
            let nodes = self.cell_nodes(cell, vertices);
            let local = with_capacity!(
                DofCapacity::for_dofs(nodes.len()),
                measure_gradient_with(self.kind, &nodes, &self.quadrature)
            );
            for (a, &v) in cell.iter().enumerate() {
                for d in 0..self.dim {
                    grad[v * self.dim + d] += local[a * self.dim + d];
                }
            }
        }
        grad
    }
}

impl Energy for VolumeFunctional {
    fn energy(&self, vertices: &[f64]) -> f64 {
        let v = self.violation(self.volume(vertices));
        v * v
    }
}

impl EnergyGradient for VolumeFunctional {
    fn add_energy_gradient(&self, vertices: &[f64], grad: &mut [f64]) {
        let v = self.violation(self.volume(vertices));
        if v == 0.0 {
            return;
        }
        for (g, dv) in grad.iter_mut().zip(self.volume_gradient(vertices)) {
            *g += 2.0 * v * dv;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_models::test_utils::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    #[test]
    fn measures() {
        let square = unit_square_tri_mesh(3);
        let f = VolumeFunctional::new(&square, 0.0, 10.0);
        assert_relative_eq!(f.volume(&square.vertices), 1.0, epsilon = 1e-12);
        let cube = unit_cube_tet_mesh();
        let f = VolumeFunctional::new(&cube, 0.0, 10.0);
        assert_relative_eq!(f.volume(&cube.vertices), 1.0, epsilon = 1e-12);
        let hex = unit_cube_hex();
        let f = VolumeFunctional::new(&hex, 0.0, 10.0);
        assert_relative_eq!(f.volume(&hex.vertices), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn inside_bounds_is_free() {
        let mesh = unit_square_tri_mesh(2);
        let f = VolumeFunctional::new(&mesh, 0.5, 2.0);
        assert_eq!(f.energy(&mesh.vertices), 0.0);
        assert!(f.energy_gradient(&mesh.vertices).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn violation_gradient() {
        let mesh = unit_square_tri_mesh(2);
        let f = VolumeFunctional::new(&mesh, 0.0, 0.8);
        let mut v = mesh.vertices.clone();
        for (x, p) in v.iter_mut().zip(random_displacement(mesh.num_dofs(), 0.02, 3)) {
            *x += p;
        }
        assert_relative_eq!(f.energy(&v).sqrt(), f.volume(&v) - 0.8, epsilon = 1e-12);
        let grad = f.energy_gradient(&v);
        gradient_tester(|x| f.energy(x), &grad, &v, 1e-7, 1e-5);
    }
}
