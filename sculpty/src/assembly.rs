//! Global assembly of the elastic energy over a mesh.
//!
//! Elements are independent, so every pass runs over cells in parallel and
//! accumulates into thread local buffers that are merged afterwards.

use rayon::prelude::*;

use crate::basis::ElementValues;
use crate::energy_models::elasticity::{ElasticityTensor, SaintVenantElasticity, StressSample};
use crate::mesh::Mesh;
use crate::{Energy, EnergyGradient, EnergyHessian, Error, Triplet};

/// Saint Venant-Kirchhoff energy of a whole mesh as a function of the full displacement vector.
#[derive(Clone, Debug)]
pub struct ElasticAssembler {
    model: SaintVenantElasticity,
    dim: usize,
    num_dofs: usize,
    /// Global DOF indices of each element, node major.
    element_dofs: Vec<Vec<usize>>,
    element_values: Vec<ElementValues>,
}

impl ElasticAssembler {
    /// Precomputes element geometry on the rest configuration of `mesh`.
    pub fn new(mesh: &Mesh, tensor: ElasticityTensor) -> Result<Self, Error> {
        if tensor.dim() != mesh.dim {
            return Err(Error::UnsupportedDimension { dim: tensor.dim() });
        }
        let element_values = mesh.element_values()?;
        let element_dofs = (0..mesh.num_cells())
            .map(|e| mesh.cell_dofs(e).collect())
            .collect();
        Ok(ElasticAssembler {
            model: SaintVenantElasticity::new(tensor),
            dim: mesh.dim,
            num_dofs: mesh.num_dofs(),
            element_dofs,
            element_values,
        })
    }

    pub fn model(&self) -> &SaintVenantElasticity {
        &self.model
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_elements(&self) -> usize {
        self.element_values.len()
    }

    fn local(&self, e: usize, u: &[f64]) -> Vec<f64> {
        self.element_dofs[e].iter().map(|&i| u[i]).collect()
    }

    /// Energy of each element.
    pub fn element_energies(&self, u: &[f64]) -> Vec<f64> {
        (0..self.num_elements())
            .into_par_iter()
            .map(|e| {
                self.model
                    .element_energy(&self.element_values[e], &self.local(e, u))
            })
            .collect()
    }

    /// Whether every element keeps a positive deformation gradient determinant under `u`.
    pub fn is_valid(&self, u: &[f64]) -> bool {
        (0..self.num_elements())
            .into_par_iter()
            .all(|e| self.model.is_valid(&self.element_values[e], &self.local(e, u)))
    }

    /// Stresses at the quadrature points of element `e`.
    ///
    /// Fails with `Error::InvertedMesh` if the deformed element is degenerate or inverted.
    pub fn stresses(&self, e: usize, u: &[f64]) -> Result<Vec<StressSample>, Error> {
        self.model
            .stresses(&self.element_values[e], &self.local(e, u))
            .ok_or(Error::InvertedMesh { elements: vec![e] })
    }

    /// Stresses at the quadrature points of every element.
    ///
    /// The error lists every element without well defined stresses.
    pub fn all_stresses(&self, u: &[f64]) -> Result<Vec<Vec<StressSample>>, Error> {
        let samples: Vec<Option<Vec<StressSample>>> = (0..self.num_elements())
            .into_par_iter()
            .map(|e| self.model.stresses(&self.element_values[e], &self.local(e, u)))
            .collect();
        let inverted: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(e, _)| e)
            .collect();
        if !inverted.is_empty() {
            return Err(Error::InvertedMesh { elements: inverted });
        }
        Ok(samples.into_iter().flatten().collect())
    }
}

impl Energy for ElasticAssembler {
    fn energy(&self, u: &[f64]) -> f64 {
        debug_assert_eq!(u.len(), self.num_dofs);
        (0..self.num_elements())
            .into_par_iter()
            .map(|e| {
                self.model
                    .element_energy(&self.element_values[e], &self.local(e, u))
            })
            .sum()
    }
}

impl EnergyGradient for ElasticAssembler {
    fn add_energy_gradient(&self, u: &[f64], grad: &mut [f64]) {
        debug_assert_eq!(u.len(), self.num_dofs);
        let n = self.num_dofs;
        let total = (0..self.num_elements())
            .into_par_iter()
            .fold(
                || vec![0.0; n],
                |mut acc, e| {
                    let g = self
                        .model
                        .element_gradient(&self.element_values[e], &self.local(e, u));
                    for (&dof, gi) in self.element_dofs[e].iter().zip(g) {
                        acc[dof] += gi;
                    }
                    acc
                },
            )
            .reduce(
                || vec![0.0; n],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
                    a
                },
            );
        grad.iter_mut().zip(total).for_each(|(g, t)| *g += t);
    }
}

impl EnergyHessian for ElasticAssembler {
    fn add_energy_hessian_triplets(&self, u: &[f64], scale: f64, triplets: &mut Vec<Triplet>) {
        debug_assert_eq!(u.len(), self.num_dofs);
        let per_element: Vec<Vec<Triplet>> = (0..self.num_elements())
            .into_par_iter()
            .map(|e| {
                let h = self
                    .model
                    .element_hessian(&self.element_values[e], &self.local(e, u));
                let dofs = &self.element_dofs[e];
                let mut local = Vec::with_capacity(dofs.len() * dofs.len());
                for (a, &row) in dofs.iter().enumerate() {
                    for (b, &col) in dofs.iter().enumerate() {
                        local.push(Triplet::new(row, col, scale * h[(a, b)]));
                    }
                }
                local
            })
            .collect();
        triplets.extend(per_element.into_iter().flatten());
    }
}
