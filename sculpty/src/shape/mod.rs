//! Shape optimization.
//!
//! [`ShapeProblem`] treats the vertex positions of a mesh as design variables
//! and minimizes a weighted sum of a target functional, a volume bound, a
//! boundary fairness energy and a contact barrier. Steps that invert
//! elements or pass through contact are rejected, accepted steps are
//! followed by an interior relaxation and the topology may be regenerated
//! when element quality degrades.

pub mod param;
pub mod relax;
pub mod remesh;
pub mod target;

pub use param::{build_fixed_nodes, build_tied_nodes, ShapeParametrization};
pub use relax::{HarmonicRelaxation, MeshRelaxation, Relaxed};
pub use remesh::{
    ExternalRemesher, MeditLoader, MeshLoader, MeshRegenerator, RemeshMonitor, RemeshPhase,
};
pub use target::{ElasticEnergyTarget, TaggedDirichlet, TargetFunctional};

use std::sync::Arc;

use crate::contact::{CollisionBackend, ContactGate};
use crate::energy_models::smoothing::BoundarySmoother;
use crate::energy_models::volume::VolumeFunctional;
use crate::fem::{ObjectiveCache, OptimizationProblem, RemeshOutcome};
use crate::io::{write_medit, write_obj};
use crate::mesh::Mesh;
use crate::params::ShapeOptParams;
use crate::{lerp, norm, Energy, EnergyGradient, Error};

const MAX_HALVINGS: usize = 64;
const MAX_RELAXATION_ATTEMPTS: usize = 12;

pub struct ShapeProblem {
    params: ShapeOptParams,
    /// Mesh at the last evaluated design.
    mesh: Mesh,
    target: Box<dyn TargetFunctional>,
    volume: Option<VolumeFunctional>,
    smoother: Option<BoundarySmoother>,
    smoothing_weight: f64,
    relaxer: Box<dyn MeshRelaxation>,
    contact: Option<ContactGate>,
    /// Backend used for every gate this problem builds, the built in one if `None`.
    contact_backend: Option<Arc<dyn CollisionBackend>>,
    parametrization: ShapeParametrization,
    cache: ObjectiveCache,
    mesh_flipped: bool,
    target_failed: bool,
    iter: usize,
    monitor: RemeshMonitor,
    regenerator: Box<dyn MeshRegenerator>,
    loader: Box<dyn MeshLoader>,
}

impl std::fmt::Debug for ShapeProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeProblem")
            .field("num_vertices", &self.mesh.num_vertices())
            .field("num_cells", &self.mesh.num_cells())
            .field("smoothing_weight", &self.smoothing_weight)
            .field("contact", &self.contact)
            .field("mesh_flipped", &self.mesh_flipped)
            .field("iter", &self.iter)
            .field("monitor", &self.monitor)
            .finish()
    }
}

fn build_parametrization(
    mesh: &Mesh,
    params: &ShapeOptParams,
    contact: Option<&ContactGate>,
) -> ShapeParametrization {
    let fixed = build_fixed_nodes(mesh, params, contact);
    let tied = build_tied_nodes(&mesh.vertices, mesh.dim, params.correspondence_threshold);
    log::debug!("{} fixed and {} tied vertices", fixed.len(), tied.len());
    ShapeParametrization::new(
        mesh.dim,
        mesh.num_vertices(),
        &fixed,
        tied,
        params.free_dimensions(mesh.dim),
    )
}

fn build_contact(
    mesh: &Mesh,
    params: &ShapeOptParams,
    backend: Option<&Arc<dyn CollisionBackend>>,
) -> Result<Option<ContactGate>, Error> {
    if !params.contact.enabled {
        return Ok(None);
    }
    let mut gate = match backend {
        Some(backend) => {
            ContactGate::with_shared_backend(mesh, params.contact.clone(), Arc::clone(backend))
        }
        None => ContactGate::new(mesh, params.contact.clone())?,
    };
    gate.reset_constraint_set(&mesh.vertices);
    Ok(Some(gate))
}

fn build_volume(mesh: &Mesh, params: &ShapeOptParams) -> Option<VolumeFunctional> {
    params
        .volume
        .as_ref()
        .map(|v| VolumeFunctional::new(mesh, v.min, v.max))
}

fn build_smoother(mesh: &Mesh, params: &ShapeOptParams) -> Option<BoundarySmoother> {
    params
        .boundary_smoothing
        .as_ref()
        .map(|s| BoundarySmoother::new(mesh, s.scale_invariant, s.power))
}

impl ShapeProblem {
    pub fn new(
        mesh: Mesh,
        target: Box<dyn TargetFunctional>,
        params: ShapeOptParams,
    ) -> Result<Self, Error> {
        Self::build(mesh, target, params, None)
    }

    /// Creates a problem whose contact queries are answered by `backend`.
    ///
    /// The backend is kept across remeshing. It is unused unless
    /// `params.contact.enabled` is set.
    pub fn with_contact_backend(
        mesh: Mesh,
        target: Box<dyn TargetFunctional>,
        params: ShapeOptParams,
        backend: Box<dyn CollisionBackend>,
    ) -> Result<Self, Error> {
        Self::build(mesh, target, params, Some(Arc::from(backend)))
    }

    fn build(
        mesh: Mesh,
        target: Box<dyn TargetFunctional>,
        params: ShapeOptParams,
        contact_backend: Option<Arc<dyn CollisionBackend>>,
    ) -> Result<Self, Error> {
        let inverted = mesh.inverted_cells(&mesh.vertices);
        if !inverted.is_empty() {
            return Err(Error::InvertedMesh { elements: inverted });
        }
        if params.boundary_smoothing.is_none() {
            log::warn!("Boundary smoothing is disabled");
        }
        if params.volume.is_none() {
            log::info!("No volume bounds on the shape");
        }

        let contact = build_contact(&mesh, &params, contact_backend.as_ref())?;
        let parametrization = build_parametrization(&mesh, &params, contact.as_ref());
        let executable = params
            .remesh
            .as_ref()
            .map(|r| r.executable.clone())
            .unwrap_or_default();

        Ok(ShapeProblem {
            volume: build_volume(&mesh, &params),
            smoother: build_smoother(&mesh, &params),
            smoothing_weight: params.boundary_smoothing.as_ref().map_or(0.0, |s| s.weight),
            relaxer: Box::new(HarmonicRelaxation::new(
                &mesh,
                params.smoothing_parameters.clone(),
            )),
            regenerator: Box::new(ExternalRemesher { executable }),
            loader: Box::new(MeditLoader),
            cache: ObjectiveCache::new(),
            mesh_flipped: false,
            target_failed: false,
            iter: 0,
            monitor: RemeshMonitor::default(),
            contact,
            contact_backend,
            parametrization,
            target,
            params,
            mesh,
        })
    }

    /// Replaces the interior relaxation used after accepted steps.
    pub fn with_relaxation(mut self, relaxer: Box<dyn MeshRelaxation>) -> Self {
        self.relaxer = relaxer;
        self
    }

    pub fn with_remesher(mut self, regenerator: Box<dyn MeshRegenerator>) -> Self {
        self.regenerator = regenerator;
        self
    }

    pub fn with_mesh_loader(mut self, loader: Box<dyn MeshLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn params(&self) -> &ShapeOptParams {
        &self.params
    }

    pub fn parametrization(&self) -> &ShapeParametrization {
        &self.parametrization
    }

    pub fn contact(&self) -> Option<&ContactGate> {
        self.contact.as_ref()
    }

    pub fn target(&self) -> &dyn TargetFunctional {
        self.target.as_ref()
    }

    pub fn smoothing_weight(&self) -> f64 {
        self.smoothing_weight
    }

    pub fn is_mesh_flipped(&self) -> bool {
        self.mesh_flipped
    }

    pub fn remesh_monitor(&self) -> &RemeshMonitor {
        &self.monitor
    }

    /// Moves the mesh and every dependent quantity to the design `x`.
    fn update_state(&mut self, x: &[f64]) {
        let v = self.parametrization.x_to_param(x);
        self.mesh_flipped = self.mesh.is_flipped(&v);
        if self.mesh_flipped {
            log::debug!("Mesh flipped");
            return;
        }
        self.target_failed = match self.target.set_vertices(&v) {
            Ok(()) => false,
            Err(e) => {
                log::warn!("Failed to update the target: {}", e);
                true
            }
        };
        if let Some(gate) = self.contact.as_mut() {
            gate.update_constraint_set(&v);
        }
        self.mesh.vertices = v;
    }

    fn compute_value(&self) -> f64 {
        if self.mesh_flipped {
            return 0.0;
        }
        if self.target_failed {
            return f64::INFINITY;
        }
        let v = &self.mesh.vertices;
        let target = self.params.target_weight * self.target.energy();
        let volume = match (&self.volume, &self.params.volume) {
            (Some(f), Some(p)) => p.weight * f.energy(v),
            _ => 0.0,
        };
        let smooth = self
            .smoother
            .as_ref()
            .map_or(0.0, |s| self.smoothing_weight * s.energy(v));
        let barrier = self.contact.as_ref().map_or(0.0, |g| g.barrier_energy(v));
        log::debug!(
            "target = {:.6e}, volume = {:.6e}, smooth = {:.6e}, barrier = {:.6e}",
            target,
            volume,
            smooth,
            barrier
        );
        target + volume + smooth + barrier
    }

    fn target_gradient(&self) -> Vec<f64> {
        let mut g = self.target.shape_gradient();
        g.iter_mut().for_each(|g| *g *= self.params.target_weight);
        g
    }

    fn smoothing_gradient(&self) -> Vec<f64> {
        let v = &self.mesh.vertices;
        let mut g = vec![0.0; v.len()];
        if let Some(s) = &self.smoother {
            s.add_energy_gradient(v, &mut g);
            g.iter_mut().for_each(|g| *g *= self.smoothing_weight);
        }
        g
    }

    /// Gradient with respect to the vertex positions.
    fn compute_vertex_gradient(&self) -> Vec<f64> {
        let v = &self.mesh.vertices;
        if self.mesh_flipped || self.target_failed {
            return vec![0.0; v.len()];
        }
        let mut grad = self.target_gradient();
        let target_norm = norm(&grad);

        let mut volume = vec![0.0; v.len()];
        if let (Some(f), Some(p)) = (&self.volume, &self.params.volume) {
            f.add_energy_gradient(v, &mut volume);
            volume.iter_mut().for_each(|g| *g *= p.weight);
        }
        let smooth = self.smoothing_gradient();
        let barrier = match &self.contact {
            Some(gate) => gate.barrier_gradient(v),
            None => vec![0.0; v.len()],
        };
        log::debug!(
            "‖∇target‖ = {:.3e}, ‖∇volume‖ = {:.3e}, ‖∇smooth‖ = {:.3e}, ‖∇barrier‖ = {:.3e}",
            target_norm,
            norm(&volume),
            norm(&smooth),
            norm(&barrier)
        );
        for (i, g) in grad.iter_mut().enumerate() {
            *g += volume[i] + smooth[i] + barrier[i];
        }
        grad
    }

    /// Rebalances the smoothing weight against the target.
    fn adjust_smoothing_weight(&mut self, x: &[f64]) {
        let period = match &self.params.boundary_smoothing {
            Some(s) => match s.adjust_weight_period {
                Some(p) if p > 0 => p,
                _ => return,
            },
            None => return,
        };
        if self.iter == 0 || self.iter % period != 0 || self.mesh_flipped {
            return;
        }
        let target = self.parametrization.dparam_to_dx(&self.target_gradient());
        let smooth = self.parametrization.dparam_to_dx(&self.smoothing_gradient());
        let smooth_norm = norm(&smooth);
        if smooth_norm == 0.0 {
            return;
        }
        let coeff = self
            .params
            .boundary_smoothing
            .as_ref()
            .map_or(1.0, |s| s.adjustment_coeff);
        self.smoothing_weight *= norm(&target) / smooth_norm * coeff;
        log::info!("Smoothing weight updated to {:.6e}", self.smoothing_weight);
        // Mesh state is unchanged, only the stored objective is stale.
        self.cache.reset(x);
    }

    /// Replaces the topology and rebuilds every structure derived from it.
    ///
    /// On error the problem is left on the previous topology.
    fn rebuild(&mut self, mesh: Mesh) -> Result<(), Error> {
        let inverted = mesh.inverted_cells(&mesh.vertices);
        if !inverted.is_empty() {
            return Err(Error::InvertedMesh { elements: inverted });
        }
        let contact = build_contact(&mesh, &self.params, self.contact_backend.as_ref())?;
        let parametrization = build_parametrization(&mesh, &self.params, contact.as_ref());
        if let Err(e) = self.target.reinitialize(&mesh) {
            if let Err(restore) = self.target.reinitialize(&self.mesh) {
                log::error!("Failed to restore the target on the previous mesh: {}", restore);
            }
            return Err(e);
        }
        self.volume = build_volume(&mesh, &self.params);
        self.smoother = build_smoother(&mesh, &self.params);
        self.relaxer.reinitialize(&mesh);
        self.parametrization = parametrization;
        self.contact = contact;
        self.cache.clear();
        self.mesh_flipped = false;
        self.target_failed = false;
        self.mesh = mesh;
        Ok(())
    }
}

impl OptimizationProblem for ShapeProblem {
    fn num_variables(&self) -> usize {
        self.parametrization.num_variables()
    }

    fn initial_point(&self) -> Vec<f64> {
        self.parametrization.param_to_x(&self.mesh.vertices)
    }

    fn value(&mut self, x: &[f64]) -> f64 {
        if let Some(v) = self.cache.value(x) {
            return v;
        }
        self.solution_changed(x);
        let v = self.compute_value();
        self.cache.set_value(x, v);
        v
    }

    fn gradient(&mut self, x: &[f64]) -> Vec<f64> {
        if let Some(g) = self.cache.gradient(x) {
            return g.to_vec();
        }
        self.solution_changed(x);
        let g = self
            .parametrization
            .dparam_to_dx(&self.compute_vertex_gradient());
        self.cache.set_gradient(x, g.clone());
        g
    }

    fn is_step_valid(&self, _x0: &[f64], x1: &[f64]) -> bool {
        !self.mesh.is_flipped(&self.parametrization.x_to_param(x1))
    }

    fn is_step_collision_free(&self, x0: &[f64], x1: &[f64]) -> bool {
        match &self.contact {
            Some(gate) => gate.is_step_collision_free(
                &self.parametrization.x_to_param(x0),
                &self.parametrization.x_to_param(x1),
            ),
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
                let v0 = self.parametrization.x_to_param(x0);
                let v1 = self.parametrization.x_to_param(&lerp(x0, x1, alpha));
                alpha * gate.collision_free_stepsize(&v0, &v1)
            }
            None => alpha,
        }
    }

    fn line_search_begin(&mut self, x0: &[f64], x1: &[f64]) {
        if self.contact.is_none() {
            return;
        }
        let v0 = self.parametrization.x_to_param(x0);
        let v1 = self.parametrization.x_to_param(x1);
        if let Some(gate) = self.contact.as_mut() {
            gate.line_search_begin(&v0, &v1);
        }
    }

    fn line_search_end(&mut self) {
        if let Some(gate) = self.contact.as_mut() {
            gate.line_search_end();
        }
    }

    fn solution_changed(&mut self, x: &[f64]) {
        if self.cache.is_current(x) {
            return;
        }
        self.cache.reset(x);
        self.update_state(x);
    }

    fn post_step(&mut self, _iter: usize, x: &[f64]) {
        self.adjust_smoothing_weight(x);
        self.iter += 1;
        if let Some(gate) = &self.contact {
            log::trace!(
                "Minimum contact distance {:.3e}",
                gate.minimum_distance(&self.parametrization.x_to_param(x))
            );
        }
    }

    /// Relaxes the interior toward the boundary of `new_x`, shortening the
    /// step until the relaxation converges to an unflipped mesh.
    fn smoothing(&mut self, x: &[f64], new_x: &mut Vec<f64>) -> bool {
        if !self.params.smoothing_parameters.enabled {
            return true;
        }
        let dim = self.mesh.dim;
        let v = self.parametrization.x_to_param(x);
        let boundary = self.mesh.boundary_vertices();
        let mut rate = 1.0;
        for _ in 0..MAX_RELAXATION_ATTEMPTS {
            log::trace!("Relaxing interior with step fraction {}", rate);
            let tmp = self.parametrization.x_to_param(&lerp(x, new_x, rate));
            let targets: Vec<f64> = boundary
                .iter()
                .flat_map(|&b| tmp[b * dim..(b + 1) * dim].iter().cloned())
                .collect();
            match self.relaxer.relax(&v, &boundary, &targets) {
                Ok(relaxed) if relaxed.converged && !self.mesh.is_flipped(&relaxed.vertices) => {
                    log::debug!("Interior relaxation succeeded with step fraction {}", rate);
                    *new_x = self.parametrization.param_to_x(&relaxed.vertices);
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Interior relaxation failed: {}", e);
                    return false;
                }
            }
            rate *= 0.5;
        }
        log::warn!(
            "Interior relaxation failed after {} attempts",
            MAX_RELAXATION_ATTEMPTS
        );
        false
    }

    fn remesh(&mut self, iter: usize, x: &mut Vec<f64>) -> Result<RemeshOutcome, Error> {
        let remesh_params = match &self.params.remesh {
            Some(p) => p.clone(),
            None => return Ok(RemeshOutcome::NotNeeded),
        };
        let inverted = self.mesh.inverted_cells(&self.mesh.vertices);
        if !inverted.is_empty() {
            return Err(Error::InvertedMesh { elements: inverted });
        }
        let quality = self.mesh.quality(&self.mesh.vertices);
        let min_quality = quality.iter().cloned().fold(f64::INFINITY, f64::min);
        log::debug!(
            "Mesh worst quality: {:.3e}, average quality: {:.3e}",
            min_quality,
            quality.iter().sum::<f64>() / quality.len() as f64
        );
        if self.monitor.update(&remesh_params, min_quality) == RemeshPhase::Running {
            return Ok(RemeshOutcome::NotNeeded);
        }

        log::info!("Remeshing at iteration {}", iter);
        let dir = &remesh_params.output_dir;
        std::fs::create_dir_all(dir)?;
        let mut remeshed = Vec::new();
        for body in self.mesh.body_id_set() {
            let submesh = self.mesh.submesh(body);
            let before = remesh::before_remesh_path(dir, iter, body, self.mesh.dim);
            if self.mesh.dim == 2 {
                write_obj(&submesh, &before)?;
            } else {
                write_medit(&submesh, &before)?;
            }
            let after = remesh::after_remesh_path(dir, iter, body);
            if !self.regenerator.regenerate(&before, &after) {
                log::warn!("Remeshing body {} failed, keeping the current mesh", body);
                return Ok(RemeshOutcome::Failed);
            }
            remeshed.push((body, after));
        }

        let geometry = remesh::remeshed_geometry(&self.params.geometry, &remeshed)?;
        let meshes = geometry
            .iter()
            .map(|entry| self.loader.load(entry))
            .collect::<Result<Vec<_>, _>>()?;
        let mesh = Mesh::merge(&meshes)?;

        self.rebuild(mesh)?;
        self.monitor.reset();
        self.params.geometry = geometry;
        *x = self.parametrization.param_to_x(&self.mesh.vertices);

        let quality = self.mesh.quality(&self.mesh.vertices);
        log::info!(
            "Remeshed to {} vertices, worst quality: {:.3e}, average quality: {:.3e}",
            self.mesh.num_vertices(),
            quality.iter().cloned().fold(f64::INFINITY, f64::min),
            quality.iter().sum::<f64>() / quality.len() as f64
        );
        Ok(RemeshOutcome::Remeshed)
    }

    fn init_lagging(&mut self, x: &[f64]) {
        if self.contact.is_none() {
            return;
        }
        let v = self.parametrization.x_to_param(x);
        if let Some(gate) = self.contact.as_mut() {
            gate.reset_constraint_set(&v);
        }
        if self.cache.is_current(x) {
            self.cache.reset(x);
        } else {
            self.cache.clear();
        }
    }

    fn update_lagging(&mut self, x: &[f64]) {
        self.init_lagging(x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{BoundarySmoothingParams, VolumeParams};
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    /// Squared distance of every vertex from a fixed point.
    struct Spread {
        center: Vec<f64>,
        vertices: Vec<f64>,
    }

    impl Spread {
        fn boxed(mesh: &Mesh) -> Box<dyn TargetFunctional> {
            Box::new(Spread {
                center: vec![0.5; mesh.dim],
                vertices: mesh.vertices.clone(),
            })
        }
    }

    impl TargetFunctional for Spread {
        fn set_vertices(&mut self, vertices: &[f64]) -> Result<(), Error> {
            self.vertices = vertices.to_vec();
            Ok(())
        }
        fn energy(&self) -> f64 {
            let dim = self.center.len();
            self.vertices
                .iter()
                .enumerate()
                .map(|(i, x)| 0.5 * (x - self.center[i % dim]).powi(2))
                .sum()
        }
        fn shape_gradient(&self) -> Vec<f64> {
            let dim = self.center.len();
            self.vertices
                .iter()
                .enumerate()
                .map(|(i, x)| x - self.center[i % dim])
                .collect()
        }
        fn reinitialize(&mut self, mesh: &Mesh) -> Result<(), Error> {
            self.vertices = mesh.vertices.clone();
            Ok(())
        }
    }

    fn all_terms() -> ShapeOptParams {
        ShapeOptParams {
            target_weight: 2.0,
            volume: Some(VolumeParams {
                weight: 10.0,
                min: 1.1,
                max: 2.0,
            }),
            boundary_smoothing: Some(BoundarySmoothingParams {
                weight: 0.5,
                scale_invariant: false,
                ..Default::default()
            }),
            dirichlet_boundary_ids: vec![LEFT],
            ..Default::default()
        }
    }

    fn problem(params: ShapeOptParams) -> ShapeProblem {
        let mesh = unit_square_tri_mesh(2);
        ShapeProblem::new(mesh.clone(), Spread::boxed(&mesh), params).unwrap()
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut p = problem(all_terms());
        let mut x = p.initial_point();
        // Move off the symmetric rest shape so every term has a gradient.
        x[8] += 0.05;
        x[4] += 0.1;
        let g = p.gradient(&x);
        let h = 1e-6;
        for &dof in &[8, 9, 2, 3, 4, 5] {
            let mut xp = x.clone();
            xp[dof] += h;
            let fp = p.value(&xp);
            xp[dof] -= 2.0 * h;
            let fm = p.value(&xp);
            assert_relative_eq!(g[dof], (fp - fm) / (2.0 * h), max_relative = 1e-5, epsilon = 1e-7);
        }
    }

    #[test]
    fn fixed_vertices_get_no_gradient() {
        let mut p = problem(all_terms());
        let x = p.initial_point();
        let g = p.gradient(&x);
        // Left side vertices 0, 3, 6.
        for v in [0, 3, 6] {
            assert_eq!(g[2 * v], 0.0);
            assert_eq!(g[2 * v + 1], 0.0);
        }
    }

    #[test]
    fn flipped_design_is_rejected_and_zeroed() {
        let mut p = problem(all_terms());
        let x0 = p.initial_point();
        let mut x1 = x0.clone();
        // Push the middle vertex through the right side.
        x1[8] = 1.6;
        assert!(!p.is_step_valid(&x0, &x1));
        assert!(p.max_step_size(&x0, &x1) < 1.0);
        assert_eq!(p.value(&x1), 0.0);
        assert!(p.is_mesh_flipped());
        assert!(p.gradient(&x1).iter().all(|&g| g == 0.0));
        assert!(p.value(&x0) > 0.0);
        assert!(!p.is_mesh_flipped());
    }

    #[test]
    fn cache_follows_the_design() {
        let mut p = problem(ShapeOptParams::default());
        let x0 = p.initial_point();
        let f0 = p.value(&x0);
        let mut x1 = x0.clone();
        x1[9] += 0.1;
        let f1 = p.value(&x1);
        assert!(f1 != f0);
        assert_eq!(p.mesh().vertices[9], x1[9]);
        assert_eq!(p.value(&x0), f0);
    }

    #[test]
    fn relaxation_moves_interior_with_boundary() {
        let mut p = problem(ShapeOptParams::default());
        let x = p.initial_point();
        let mut new_x = x.clone();
        // Stretch the right side, vertices 2, 5, 8.
        for v in [2, 5, 8] {
            new_x[2 * v] += 0.2;
        }
        assert!(p.smoothing(&x, &mut new_x));
        assert_relative_eq!(new_x[4], 1.2, epsilon = 1e-12);
        // The middle vertex follows part of the way.
        assert!(new_x[8] > 0.5 && new_x[8] < 0.7);
        assert!(!p.mesh().is_flipped(&new_x));
    }

    #[test]
    fn smoothing_weight_adjustment() {
        let mut params = all_terms();
        if let Some(s) = params.boundary_smoothing.as_mut() {
            s.adjust_weight_period = Some(1);
            s.adjustment_coeff = 0.1;
        }
        let mut p = problem(params);
        let mut x = p.initial_point();
        x[8] += 0.05;
        p.solution_changed(&x);
        let w0 = p.smoothing_weight();
        // Never adjusted on the first step.
        p.post_step(0, &x);
        assert_eq!(p.smoothing_weight(), w0);
        p.post_step(1, &x);
        let w1 = p.smoothing_weight();
        assert!(w1 != w0);
        let target = p.parametrization().dparam_to_dx(&p.target_gradient());
        let smooth = p.parametrization().dparam_to_dx(&p.smoothing_gradient());
        // After rebalancing the smoothing gradient is a tenth of the target gradient.
        assert_relative_eq!(norm(&smooth), 0.1 * norm(&target), max_relative = 1e-10);
    }

    #[test]
    fn no_remesh_without_configuration() {
        let mut p = problem(ShapeOptParams::default());
        let mut x = p.initial_point();
        assert_eq!(p.remesh(0, &mut x).unwrap(), RemeshOutcome::NotNeeded);
    }

    #[test]
    fn inverted_input_mesh_is_an_error() {
        let mut mesh = unit_square_tri_mesh(1);
        mesh.vertices[0] = 2.0;
        mesh.vertices[1] = 2.0;
        assert!(matches!(
            ShapeProblem::new(mesh.clone(), Spread::boxed(&mesh), ShapeOptParams::default()),
            Err(Error::InvertedMesh { .. })
        ));
    }
}
