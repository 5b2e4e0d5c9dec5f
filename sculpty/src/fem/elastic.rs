//! Static equilibrium of a Saint Venant-Kirchhoff body as a minimization problem.

use super::problem::{ObjectiveCache, OptimizationProblem};
use crate::assembly::ElasticAssembler;
use crate::contact::{CollisionBackend, ContactGate};
use crate::dof::{CoordinateMode, DofMap};
use crate::energy_models::elasticity::ElasticityTensor;
use crate::mesh::Mesh;
use crate::params::ContactParams;
use crate::{dot, lerp, triplets_to_csr, Energy, EnergyGradient, EnergyHessian, Error};

/// Maximum number of step halvings used to recover element validity.
const MAX_HALVINGS: usize = 64;

/// Prescribed displacements on every node of the facets tagged `tag`.
///
/// `values[d]` is the displacement along axis `d`; `None` leaves that axis free.
pub fn dirichlet_from_tag(mesh: &Mesh, tag: i32, values: &[Option<f64>]) -> Vec<(usize, f64)> {
    let mut nodes: Vec<usize> = mesh
        .boundary_facets()
        .into_iter()
        .filter(|f| mesh.facet_tag(f) == Some(tag))
        .flatten()
        .collect();
    nodes.sort_unstable();
    nodes.dedup();
    nodes
        .into_iter()
        .flat_map(|v| {
            values
                .iter()
                .take(mesh.dim)
                .enumerate()
                .filter_map(move |(d, val)| val.map(|val| (v * mesh.dim + d, val)))
        })
        .collect()
}

/// Total potential `Ψ(u) - f·u (+ κ B(x + u))` of a body with Dirichlet conditions.
///
/// Variables are displacements from the rest configuration. In reduced mode
/// prescribed DOFs are eliminated, in full mode every DOF is a variable and
/// the caller keeps the prescribed entries fixed.
#[derive(Debug)]
pub struct ElasticProblem {
    assembler: ElasticAssembler,
    rest: Vec<f64>,
    dof_map: DofMap,
    /// Prescribed values ordered like `dof_map.boundary()`.
    boundary_values: Vec<f64>,
    external_force: Option<Vec<f64>>,
    mode: CoordinateMode,
    contact: Option<ContactGate>,
    cache: ObjectiveCache,
}

impl ElasticProblem {
    /// Builds the problem on the rest configuration of `mesh`.
    ///
    /// Repeated DOFs in `dirichlet` keep their first value.
    pub fn new(
        mesh: &Mesh,
        tensor: ElasticityTensor,
        mut dirichlet: Vec<(usize, f64)>,
    ) -> Result<Self, Error> {
        let assembler = ElasticAssembler::new(mesh, tensor)?;
        let n = mesh.num_dofs();
        if let Some(&(dof, _)) = dirichlet.iter().find(|(dof, _)| *dof >= n) {
            return Err(Error::InvalidParameter {
                name: format!("dirichlet dof {}", dof),
            });
        }
        dirichlet.sort_by_key(|&(dof, _)| dof);
        dirichlet.dedup_by_key(|&mut (dof, _)| dof);
        let dof_map = DofMap::new(n, dirichlet.iter().map(|&(dof, _)| dof));
        let boundary_values = dirichlet.into_iter().map(|(_, v)| v).collect();
        Ok(ElasticProblem {
            assembler,
            rest: mesh.vertices.clone(),
            dof_map,
            boundary_values,
            external_force: None,
            mode: CoordinateMode::default(),
            contact: None,
            cache: ObjectiveCache::new(),
        })
    }

    /// Adds a constant external force given per full DOF.
    pub fn with_external_force(mut self, force: Vec<f64>) -> Result<Self, Error> {
        if force.len() != self.rest.len() {
            return Err(Error::SizeMismatch);
        }
        self.external_force = Some(force);
        self.cache.clear();
        Ok(self)
    }

    /// Enables the contact barrier if `params.enabled` is set.
    pub fn with_contact(self, mesh: &Mesh, params: ContactParams) -> Result<Self, Error> {
        let gate = if params.enabled {
            Some(ContactGate::new(mesh, params)?)
        } else {
            None
        };
        self.set_contact_gate(mesh, gate)
    }

    /// Enables the contact barrier with queries answered by `backend`.
    ///
    /// Unlike [`ElasticProblem::with_contact`] this works for any mesh
    /// dimension the backend supports.
    pub fn with_contact_backend(
        self,
        mesh: &Mesh,
        params: ContactParams,
        backend: Box<dyn CollisionBackend>,
    ) -> Result<Self, Error> {
        let gate = if params.enabled {
            Some(ContactGate::with_backend(mesh, params, backend))
        } else {
            None
        };
        self.set_contact_gate(mesh, gate)
    }

    fn set_contact_gate(mut self, mesh: &Mesh, gate: Option<ContactGate>) -> Result<Self, Error> {
        if mesh.num_dofs() != self.rest.len() {
            return Err(Error::SizeMismatch);
        }
        self.contact = gate.map(|mut gate| {
            gate.reset_constraint_set(&self.rest);
            gate
        });
        self.cache.clear();
        Ok(self)
    }

    pub fn coordinate_mode(&self) -> CoordinateMode {
        self.mode
    }

    pub fn set_coordinate_mode(&mut self, mode: CoordinateMode) {
        self.mode = mode;
        self.cache.clear();
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    pub fn assembler(&self) -> &ElasticAssembler {
        &self.assembler
    }

    pub fn contact(&self) -> Option<&ContactGate> {
        self.contact.as_ref()
    }

    pub fn rest_positions(&self) -> &[f64] {
        &self.rest
    }

    pub fn boundary_values(&self) -> &[f64] {
        &self.boundary_values
    }

    /// Full displacement vector corresponding to the variables `x`.
    pub fn full_displacement(&self, x: &[f64]) -> Vec<f64> {
        match self.mode {
            CoordinateMode::Full => x.to_vec(),
            CoordinateMode::Reduced => self.dof_map.reduced_to_full(x, &self.boundary_values),
        }
    }

    /// Maps a full space vector into the active coordinates.
    pub fn to_active(&self, full: &[f64]) -> Vec<f64> {
        match self.mode {
            CoordinateMode::Full => full.to_vec(),
            CoordinateMode::Reduced => self.dof_map.full_to_reduced(full),
        }
    }

    /// Deformed positions for the variables `x`.
    pub fn positions(&self, x: &[f64]) -> Vec<f64> {
        self.rest
            .iter()
            .zip(self.full_displacement(x))
            .map(|(&r, u)| r + u)
            .collect()
    }

    /// Keeps the contact constraint set in sync with `x` ahead of barrier queries.
    fn sync_contact(&mut self, x: &[f64]) {
        if self.contact.is_none() {
            return;
        }
        let pos = self.positions(x);
        if let Some(gate) = self.contact.as_mut() {
            gate.update_constraint_set(&pos);
        }
    }

    fn compute_value(&self, x: &[f64]) -> f64 {
        let u = self.full_displacement(x);
        let mut value = self.assembler.energy(&u);
        if let Some(f) = &self.external_force {
            value -= dot(f, &u);
        }
        if let Some(gate) = &self.contact {
            value += gate.barrier_energy(&self.positions(x));
        }
        value
    }

    fn compute_gradient(&self, x: &[f64]) -> Vec<f64> {
        let u = self.full_displacement(x);
        let mut grad = self.assembler.energy_gradient(&u);
        if let Some(f) = &self.external_force {
            grad.iter_mut().zip(f).for_each(|(g, f)| *g -= f);
        }
        if let Some(gate) = &self.contact {
            let b = gate.barrier_gradient(&self.positions(x));
            grad.iter_mut().zip(b).for_each(|(g, b)| *g += b);
        }
        self.to_active(&grad)
    }
}

impl OptimizationProblem for ElasticProblem {
    fn num_variables(&self) -> usize {
        match self.mode {
            CoordinateMode::Full => self.dof_map.full_size(),
            CoordinateMode::Reduced => self.dof_map.reduced_size(),
        }
    }

    /// The rest configuration with prescribed displacements applied.
    fn initial_point(&self) -> Vec<f64> {
        let n = self.dof_map.reduced_size();
        let full = self.dof_map.reduced_to_full(&vec![0.0; n], &self.boundary_values);
        self.to_active(&full)
    }

    fn value(&mut self, x: &[f64]) -> f64 {
        if let Some(v) = self.cache.value(x) {
            return v;
        }
        self.sync_contact(x);
        let v = self.compute_value(x);
        self.cache.set_value(x, v);
        v
    }

    fn gradient(&mut self, x: &[f64]) -> Vec<f64> {
        if let Some(g) = self.cache.gradient(x) {
            return g.to_vec();
        }
        self.sync_contact(x);
        let g = self.compute_gradient(x);
        self.cache.set_gradient(x, g.clone());
        g
    }

    fn hessian(&mut self, x: &[f64]) -> Option<sprs::CsMat<f64>> {
        self.sync_contact(x);
        let u = self.full_displacement(x);
        let n = u.len();
        let mut triplets = Vec::new();
        self.assembler
            .add_energy_hessian_triplets(&u, 1.0, &mut triplets);
        if let Some(gate) = &self.contact {
            gate.add_barrier_hessian_triplets(&self.positions(x), 1.0, &mut triplets);
        }
        let full = triplets_to_csr(n, n, &triplets);
        Some(match self.mode {
            CoordinateMode::Full => full,
            CoordinateMode::Reduced => self.dof_map.reduce_hessian(&full),
        })
    }

    fn is_step_valid(&self, _x0: &[f64], x1: &[f64]) -> bool {
        self.assembler.is_valid(&self.full_displacement(x1))
    }

    fn is_step_collision_free(&self, x0: &[f64], x1: &[f64]) -> bool {
        match &self.contact {
            Some(gate) => gate.is_step_collision_free(&self.positions(x0), &self.positions(x1)),
            None => true,
        }
    }

    fn max_step_size(&self, x0: &[f64], x1: &[f64]) -> f64 {
        let mut alpha = 1.0;
        let mut halvings = 0;
        while !self.is_step_valid(x0, &lerp(x0, x1, alpha)) {
            halvings += 1;
            if halvings > MAX_HALVINGS {
                return 0.0;
            }
            alpha *= 0.5;
        }
        match &self.contact {
            Some(gate) => {
                let end = lerp(x0, x1, alpha);
                alpha * gate.collision_free_stepsize(&self.positions(x0), &self.positions(&end))
            }
            None => alpha,
        }
    }

    fn line_search_begin(&mut self, x0: &[f64], x1: &[f64]) {
        if self.contact.is_none() {
            return;
        }
        let (p0, p1) = (self.positions(x0), self.positions(x1));
        if let Some(gate) = self.contact.as_mut() {
            gate.line_search_begin(&p0, &p1);
        }
    }

    fn line_search_end(&mut self) {
        if let Some(gate) = self.contact.as_mut() {
            gate.line_search_end();
        }
    }

    fn solution_changed(&mut self, x: &[f64]) {
        if !self.cache.is_current(x) {
            self.cache.reset(x);
        }
        self.sync_contact(x);
    }

    fn post_step(&mut self, iter: usize, x: &[f64]) {
        if let Some(gate) = &self.contact {
            log::debug!(
                "Iteration {}: minimum contact distance {:.3e}",
                iter,
                gate.minimum_distance(&self.positions(x))
            );
        }
    }

    fn init_lagging(&mut self, x: &[f64]) {
        if self.contact.is_none() {
            return;
        }
        let pos = self.positions(x);
        if let Some(gate) = self.contact.as_mut() {
            gate.reset_constraint_set(&pos);
        }
        self.cache.clear();
    }

    fn update_lagging(&mut self, x: &[f64]) {
        self.init_lagging(x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_models::test_utils::*;
    use crate::fem::{minimize, SolverParams, Status};
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    fn stretched_square(eps: f64) -> ElasticProblem {
        let mesh = unit_square_tri_mesh(2);
        let mut bc = dirichlet_from_tag(&mesh, LEFT, &[Some(0.0), Some(0.0)]);
        bc.extend(dirichlet_from_tag(&mesh, RIGHT, &[Some(eps), Some(0.0)]));
        ElasticProblem::new(&mesh, soft_material(2), bc).unwrap()
    }

    #[test]
    fn dirichlet_nodes_from_tags() {
        let mesh = unit_square_tri_mesh(2);
        let bc = dirichlet_from_tag(&mesh, LEFT, &[Some(0.0), None]);
        // Three nodes on the left side, x only.
        assert_eq!(bc.len(), 3);
        assert!(bc.iter().all(|&(dof, _)| dof % 2 == 0));
    }

    #[test]
    fn reduced_gradient_matches_finite_differences() {
        let mut problem = stretched_square(0.05);
        let x = problem
            .initial_point()
            .iter()
            .zip(random_displacement(problem.num_variables(), 0.02, 3))
            .map(|(a, b)| a + b)
            .collect::<Vec<_>>();
        let grad = problem.gradient(&x);
        assert_eq!(grad.len(), problem.num_variables());
        let eval = stretched_square(0.05);
        gradient_tester(|x| eval.compute_value(x), &grad, &x, 1e-6, 1e-5);
    }

    #[test]
    fn hessian_is_symmetric_and_reduced() {
        let mut problem = stretched_square(0.05);
        let x = problem.initial_point();
        let h = problem.hessian(&x).unwrap();
        let n = problem.num_variables();
        assert_eq!(h.rows(), n);
        for row in 0..n {
            for col in 0..n {
                let a = h.get(row, col).copied().unwrap_or(0.0);
                let b = h.get(col, row).copied().unwrap_or(0.0);
                assert_relative_eq!(a, b, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn full_mode_sees_every_dof() {
        let mut problem = stretched_square(0.0);
        problem.set_coordinate_mode(CoordinateMode::Full);
        assert_eq!(problem.num_variables(), 18);
        let x = vec![0.0; 18];
        assert_eq!(problem.value(&x), 0.0);
        assert_eq!(problem.hessian(&x).unwrap().rows(), 18);
    }

    #[test]
    fn inverting_step_is_rejected() {
        let mesh = one_triangle();
        let problem = ElasticProblem::new(&mesh, soft_material(2), Vec::new()).unwrap();
        let x0 = vec![0.0; 6];
        let mut x1 = x0.clone();
        x1[5] = -2.0;
        assert!(!problem.is_step_valid(&x0, &x1));
        let small = random_displacement(6, 1e-3, 2);
        assert!(problem.is_step_valid(&x0, &small));
        let alpha = problem.max_step_size(&x0, &x1);
        assert!(alpha > 0.0 && alpha < 1.0);
        assert!(problem.is_step_valid(&x0, &lerp(&x0, &x1, alpha)));
    }

    #[test]
    fn external_force_enters_linearly() {
        let mesh = one_triangle();
        let force = vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        let mut problem = ElasticProblem::new(&mesh, soft_material(2), Vec::new())
            .unwrap()
            .with_external_force(force)
            .unwrap();
        problem.set_coordinate_mode(CoordinateMode::Full);
        // A rigid translation stores no strain energy.
        let x = vec![0.1, 0.2, 0.1, 0.2, 0.1, 0.2];
        assert_relative_eq!(problem.value(&x), -(0.1 + 0.4), epsilon = 1e-12);
        let g = problem.gradient(&x);
        assert_relative_eq!(g[0], -1.0, epsilon = 1e-10);
        assert_relative_eq!(g[3], -2.0, epsilon = 1e-10);
    }

    #[test]
    fn equilibrium_under_tension() {
        let mut problem = stretched_square(0.01);
        let mut x = problem.initial_point();
        let result = minimize(&mut problem, &mut x, &SolverParams::default()).unwrap();
        assert_eq!(result.status, Status::Success);
        assert!(result.objective > 0.0);
        let u = problem.full_displacement(&x);
        // The free middle column moves roughly half way.
        assert!(u[2] > 0.0 && u[2] < 0.01);
    }
}
