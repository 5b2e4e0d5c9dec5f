//! Target functionals driving the shape optimization.

use crate::energy_models::elasticity::ElasticityTensor;
use crate::fem::{dirichlet_from_tag, minimize, ElasticProblem, SolverParams, Status};
use crate::mesh::Mesh;
use crate::{Energy, Error};

/// A scalar quantity of interest depending on the vertex positions of a mesh.
pub trait TargetFunctional {
    /// Moves the mesh to `vertices` and updates any state solved on it.
    fn set_vertices(&mut self, vertices: &[f64]) -> Result<(), Error>;

    /// Value at the current vertices.
    fn energy(&self) -> f64;

    /// Derivative of [`TargetFunctional::energy`] with respect to the vertex positions.
    fn shape_gradient(&self) -> Vec<f64>;

    /// Rebuilds every structure derived from the mesh topology.
    fn reinitialize(&mut self, mesh: &Mesh) -> Result<(), Error>;
}

/// Prescribed displacement on facets carrying a tag.
#[derive(Clone, Debug, PartialEq)]
pub struct TaggedDirichlet {
    pub tag: i32,
    /// Displacement per axis, `None` leaves the axis free.
    pub values: Vec<Option<f64>>,
}

/// Strain energy of the equilibrium displacement under tagged Dirichlet conditions.
///
/// The equilibrium is re-solved every time the vertices move. Since the free
/// part of the residual vanishes at equilibrium and prescribed values do not
/// depend on the shape, the shape gradient is the partial derivative of the
/// element energies with respect to node positions.
#[derive(Debug)]
pub struct ElasticEnergyTarget {
    mesh: Mesh,
    tensor: ElasticityTensor,
    dirichlet: Vec<TaggedDirichlet>,
    solver: SolverParams,
    problem: ElasticProblem,
    /// Full equilibrium displacement.
    displacement: Vec<f64>,
}

impl ElasticEnergyTarget {
    pub fn new(
        mesh: Mesh,
        tensor: ElasticityTensor,
        dirichlet: Vec<TaggedDirichlet>,
        solver: SolverParams,
    ) -> Result<Self, Error> {
        let problem = Self::build_problem(&mesh, &tensor, &dirichlet)?;
        let mut target = ElasticEnergyTarget {
            displacement: vec![0.0; mesh.num_dofs()],
            mesh,
            tensor,
            dirichlet,
            solver,
            problem,
        };
        target.solve()?;
        Ok(target)
    }

    fn build_problem(
        mesh: &Mesh,
        tensor: &ElasticityTensor,
        dirichlet: &[TaggedDirichlet],
    ) -> Result<ElasticProblem, Error> {
        let bc = dirichlet
            .iter()
            .flat_map(|d| dirichlet_from_tag(mesh, d.tag, &d.values))
            .collect();
        ElasticProblem::new(mesh, tensor.clone(), bc)
    }

    /// Solves for equilibrium warm started from the previous displacement.
    fn solve(&mut self) -> Result<(), Error> {
        let mut x = self.problem.to_active(&self.displacement);
        let result = minimize(&mut self.problem, &mut x, &self.solver)?;
        if result.status != Status::Success {
            return Err(Error::NLSolveError { result });
        }
        self.displacement = self.problem.full_displacement(&x);
        Ok(())
    }

    pub fn displacement(&self) -> &[f64] {
        &self.displacement
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }
}

impl TargetFunctional for ElasticEnergyTarget {
    fn set_vertices(&mut self, vertices: &[f64]) -> Result<(), Error> {
        if vertices.len() != self.mesh.vertices.len() {
            return Err(Error::SizeMismatch);
        }
        let mut moved = self.mesh.clone();
        moved.vertices = vertices.to_vec();
        let problem = Self::build_problem(&moved, &self.tensor, &self.dirichlet)?;
        let previous = std::mem::replace(&mut self.problem, problem);
        if let Err(e) = self.solve() {
            self.problem = previous;
            return Err(e);
        }
        self.mesh = moved;
        Ok(())
    }

    fn energy(&self) -> f64 {
        self.problem.assembler().energy(&self.displacement)
    }

    fn shape_gradient(&self) -> Vec<f64> {
        let model = self.problem.assembler().model();
        let kind = self.mesh.kind;
        let quadrature = kind.quadrature();
        let mut grad = vec![0.0; self.mesh.num_dofs()];
        for e in 0..self.mesh.num_cells() {
            let nodes = self.mesh.cell_nodes(e, &self.mesh.vertices);
            let u = self.mesh.cell_nodes(e, &self.displacement);
            let g = model.element_shape_gradient(kind, &nodes, &u, &quadrature);
            for (dof, g) in self.mesh.cell_dofs(e).zip(g) {
                grad[dof] += g;
            }
        }
        grad
    }

    fn reinitialize(&mut self, mesh: &Mesh) -> Result<(), Error> {
        let problem = Self::build_problem(mesh, &self.tensor, &self.dirichlet)?;
        let previous_problem = std::mem::replace(&mut self.problem, problem);
        let previous_displacement =
            std::mem::replace(&mut self.displacement, vec![0.0; mesh.num_dofs()]);
        if let Err(e) = self.solve() {
            self.problem = previous_problem;
            self.displacement = previous_displacement;
            return Err(e);
        }
        self.mesh = mesh.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    fn stretched(mesh: Mesh) -> ElasticEnergyTarget {
        let dirichlet = vec![
            TaggedDirichlet {
                tag: LEFT,
                values: vec![Some(0.0), Some(0.0)],
            },
            TaggedDirichlet {
                tag: RIGHT,
                values: vec![Some(0.02), None],
            },
        ];
        let solver = SolverParams {
            grad_tol: 1e-11,
            ..Default::default()
        };
        ElasticEnergyTarget::new(mesh, soft_material(2), dirichlet, solver).unwrap()
    }

    #[test]
    fn tension_stores_energy() {
        let target = stretched(unit_square_tri_mesh(2));
        assert!(target.energy() > 0.0);
        // Left side stays put, right side moves by the prescribed amount.
        assert_eq!(target.displacement()[0], 0.0);
        assert_relative_eq!(target.displacement()[4], 0.02, epsilon = 1e-14);
    }

    #[test]
    fn shape_gradient_matches_finite_differences() {
        let mesh = unit_square_tri_mesh(2);
        let mut target = stretched(mesh.clone());
        let v0 = mesh.vertices.clone();
        let grad = target.shape_gradient();
        // The middle vertex is interior, perturb it and one free boundary vertex.
        for &dof in &[8, 9, 2, 3] {
            let h = 1e-5;
            let mut v = v0.clone();
            v[dof] += h;
            target.set_vertices(&v).unwrap();
            let ep = target.energy();
            v[dof] -= 2.0 * h;
            target.set_vertices(&v).unwrap();
            let em = target.energy();
            let fd = (ep - em) / (2.0 * h);
            assert_relative_eq!(grad[dof], fd, max_relative = 1e-4, epsilon = 1e-8);
        }
    }

    #[test]
    fn failed_reinitialize_keeps_the_previous_mesh() {
        let mut target = stretched(unit_square_tri_mesh(2));
        let energy = target.energy();
        let displacement = target.displacement().to_vec();
        // No iterations allowed, so the stretched equilibrium is out of reach.
        target.solver.max_iter = 0;
        assert!(target.reinitialize(&unit_square_tri_mesh(3)).is_err());
        assert_eq!(target.mesh().num_vertices(), 9);
        assert_eq!(target.displacement(), &displacement[..]);
        assert_eq!(target.energy(), energy);
    }
}
