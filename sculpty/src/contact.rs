//! Contact handling between boundary primitives.
//!
//! Proximity queries, barrier potentials and continuous collision detection
//! are provided by a [`CollisionBackend`]. The [`ContactGate`] owns the policy
//! around it: when to rebuild the active constraint set, when broad phase
//! candidates can be reused, and how barrier terms enter an objective.

pub mod point_edge;

pub use point_edge::PointEdge2d;

use std::sync::Arc;

use crate::mesh::Mesh;
use crate::params::{BroadPhaseMethod, CcdParams, ContactParams};
use crate::{inf_norm, Error, Triplet};

/// Boundary vertices, edges and faces of a mesh taking part in contact.
///
/// Collision vertices are numbered compactly; `full_ids` maps them back to
/// mesh vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionMesh {
    dim: usize,
    full_ids: Vec<usize>,
    edges: Vec<[usize; 2]>,
    faces: Vec<[usize; 3]>,
}

impl CollisionMesh {
    pub fn new(mesh: &Mesh) -> Self {
        let full_ids = mesh.boundary_vertices();
        let mut to_local = vec![usize::MAX; mesh.num_vertices()];
        for (i, &v) in full_ids.iter().enumerate() {
            to_local[v] = i;
        }
        let mut edges = Vec::new();
        let mut faces = Vec::new();
        for facet in mesh.boundary_facets() {
            let f: Vec<usize> = facet.iter().map(|&v| to_local[v]).collect();
            match f.len() {
                2 => edges.push([f[0], f[1]]),
                m => {
                    // Fan triangulation of the facet loop.
                    for k in 1..m - 1 {
                        faces.push([f[0], f[k], f[k + 1]]);
                    }
                    for k in 0..m {
                        let e = [f[k].min(f[(k + 1) % m]), f[k].max(f[(k + 1) % m])];
                        if !edges.contains(&e) {
                            edges.push(e);
                        }
                    }
                }
            }
        }
        CollisionMesh {
            dim: mesh.dim,
            full_ids,
            edges,
            faces,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_vertices(&self) -> usize {
        self.full_ids.len()
    }

    /// Mesh vertex index of each collision vertex.
    pub fn full_ids(&self) -> &[usize] {
        &self.full_ids
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Extracts collision vertex positions from full mesh positions.
    pub fn vertices(&self, full: &[f64]) -> Vec<f64> {
        let dim = self.dim;
        self.full_ids
            .iter()
            .flat_map(|&v| full[v * dim..(v + 1) * dim].iter().cloned())
            .collect()
    }

    /// Scatters a gradient over collision vertices into the full DOF space.
    pub fn to_full_dofs(&self, surface: &[f64], num_full_dofs: usize) -> Vec<f64> {
        let dim = self.dim;
        let mut full = vec![0.0; num_full_dofs];
        for (i, &v) in self.full_ids.iter().enumerate() {
            for d in 0..dim {
                full[v * dim + d] += surface[i * dim + d];
            }
        }
        full
    }

    /// Full DOF index of coordinate `d` of collision vertex `i`.
    pub fn full_dof(&self, i: usize, d: usize) -> usize {
        self.full_ids[i] * self.dim + d
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    VertexEdge,
    EdgeEdge,
    FaceVertex,
}

/// A pair of primitives closer than the activation distance.
#[derive(Clone, Debug, PartialEq)]
pub struct ProximityConstraint {
    pub kind: ConstraintKind,
    /// Collision vertices involved, point first for point-primitive pairs.
    pub vertices: Vec<usize>,
    /// Distance at the time the set was built.
    pub distance: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
    pub constraints: Vec<ProximityConstraint>,
}

impl ConstraintSet {
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// Broad phase candidate pairs (primitive indices into the collision mesh).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidates {
    /// (vertex, edge)
    pub vertex_edge: Vec<(usize, usize)>,
    /// (edge, edge)
    pub edge_edge: Vec<(usize, usize)>,
    /// (face, vertex)
    pub face_vertex: Vec<(usize, usize)>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.vertex_edge.len() + self.edge_edge.len() + self.face_vertex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.vertex_edge.clear();
        self.edge_edge.clear();
        self.face_vertex.clear();
    }
}

/// Proximity, barrier and CCD queries on a collision mesh.
///
/// Positions passed to these functions are collision vertex positions as
/// returned by [`CollisionMesh::vertices`]. Where `candidates` is `Some`, the
/// query is restricted to those pairs instead of running a fresh broad phase.
pub trait CollisionBackend: Send + Sync {
    fn build_constraints(
        &self,
        mesh: &CollisionMesh,
        vertices: &[f64],
        dhat: f64,
        candidates: Option<&Candidates>,
    ) -> ConstraintSet;

    fn barrier_potential(
        &self,
        mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
        dhat: f64,
    ) -> f64;

    /// Gradient with respect to collision vertex positions.
    fn barrier_potential_gradient(
        &self,
        mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
        dhat: f64,
    ) -> Vec<f64>;

    /// Hessian triplets indexed by collision vertex DOFs.
    fn barrier_potential_hessian(
        &self,
        mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
        dhat: f64,
    ) -> Vec<Triplet>;

    fn has_intersections(&self, mesh: &CollisionMesh, vertices: &[f64]) -> bool;

    fn is_step_collision_free(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        candidates: Option<&Candidates>,
        ccd: &CcdParams,
    ) -> bool;

    /// Largest fraction of the step `v0 → v1` that stays collision free.
    fn collision_free_stepsize(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        candidates: Option<&Candidates>,
        ccd: &CcdParams,
    ) -> f64;

    fn construct_collision_candidates(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        inflation_radius: f64,
        method: BroadPhaseMethod,
    ) -> Candidates;

    /// Smallest distance over the given constraints, infinite if there are none.
    fn minimum_distance(
        &self,
        mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
    ) -> f64;
}

/// Policy layer deciding when proximity data is rebuilt or reused.
///
/// All positions given to the gate are full mesh positions.
pub struct ContactGate {
    backend: Arc<dyn CollisionBackend>,
    mesh: CollisionMesh,
    params: ContactParams,
    constraints: ConstraintSet,
    /// Surface the current constraint set was built from.
    cached_surface: Option<Vec<f64>>,
    candidates: Candidates,
    use_cached_candidates: bool,
}

impl std::fmt::Debug for ContactGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactGate")
            .field("mesh", &self.mesh)
            .field("params", &self.params)
            .field("num_constraints", &self.constraints.len())
            .field("num_candidates", &self.candidates.len())
            .field("use_cached_candidates", &self.use_cached_candidates)
            .finish()
    }
}

impl ContactGate {
    /// Creates a gate with the built in backend for the mesh dimension.
    pub fn new(mesh: &Mesh, params: ContactParams) -> Result<Self, Error> {
        match mesh.dim {
            2 => {
                let backend = PointEdge2d::new(params.ccd.broad_phase);
                Ok(Self::with_backend(mesh, params, Box::new(backend)))
            }
            dim => Err(Error::UnsupportedDimension { dim }),
        }
    }

    pub fn with_backend(
        mesh: &Mesh,
        params: ContactParams,
        backend: Box<dyn CollisionBackend>,
    ) -> Self {
        Self::with_shared_backend(mesh, params, Arc::from(backend))
    }

    /// Like [`ContactGate::with_backend`] but shares the backend with other gates.
    pub fn with_shared_backend(
        mesh: &Mesh,
        params: ContactParams,
        backend: Arc<dyn CollisionBackend>,
    ) -> Self {
        ContactGate {
            backend,
            mesh: CollisionMesh::new(mesh),
            params,
            constraints: ConstraintSet::default(),
            cached_surface: None,
            candidates: Candidates::default(),
            use_cached_candidates: false,
        }
    }

    pub fn collision_mesh(&self) -> &CollisionMesh {
        &self.mesh
    }

    pub fn backend(&self) -> &Arc<dyn CollisionBackend> {
        &self.backend
    }

    pub fn params(&self) -> &ContactParams {
        &self.params
    }

    pub fn constraint_set(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn is_using_cached_candidates(&self) -> bool {
        self.use_cached_candidates
    }

    /// Rebuilds the constraint set unless it was already built from the same surface.
    pub fn update_constraint_set(&mut self, full: &[f64]) {
        let surface = self.mesh.vertices(full);
        if self.cached_surface.as_deref() == Some(&surface[..]) {
            return;
        }
        let candidates = if self.use_cached_candidates {
            Some(&self.candidates)
        } else {
            None
        };
        self.constraints =
            self.backend
                .build_constraints(&self.mesh, &surface, self.params.dhat, candidates);
        log::trace!("Built {} contact constraints", self.constraints.len());
        self.cached_surface = Some(surface);
    }

    /// Forgets the cached surface and rebuilds the constraint set from scratch.
    pub fn reset_constraint_set(&mut self, full: &[f64]) {
        self.cached_surface = None;
        self.update_constraint_set(full);
    }

    /// Barrier potential scaled by the barrier stiffness.
    pub fn barrier_energy(&self, full: &[f64]) -> f64 {
        let surface = self.mesh.vertices(full);
        self.params.barrier_stiffness
            * self
                .backend
                .barrier_potential(&self.mesh, &surface, &self.constraints, self.params.dhat)
    }

    /// Gradient of [`ContactGate::barrier_energy`] in the full DOF space.
    pub fn barrier_gradient(&self, full: &[f64]) -> Vec<f64> {
        let surface = self.mesh.vertices(full);
        let mut grad = self.backend.barrier_potential_gradient(
            &self.mesh,
            &surface,
            &self.constraints,
            self.params.dhat,
        );
        grad.iter_mut()
            .for_each(|g| *g *= self.params.barrier_stiffness);
        self.mesh.to_full_dofs(&grad, full.len())
    }

    /// Appends the scaled barrier Hessian in full DOF indices.
    pub fn add_barrier_hessian_triplets(&self, full: &[f64], scale: f64, triplets: &mut Vec<Triplet>) {
        let surface = self.mesh.vertices(full);
        let dim = self.mesh.dim();
        let s = scale * self.params.barrier_stiffness;
        triplets.extend(
            self.backend
                .barrier_potential_hessian(&self.mesh, &surface, &self.constraints, self.params.dhat)
                .into_iter()
                .map(|t| {
                    Triplet::new(
                        self.mesh.full_dof(t.row / dim, t.row % dim),
                        self.mesh.full_dof(t.col / dim, t.col % dim),
                        s * t.val,
                    )
                }),
        );
    }

    pub fn is_intersection_free(&self, full: &[f64]) -> bool {
        !self
            .backend
            .has_intersections(&self.mesh, &self.mesh.vertices(full))
    }

    fn cached_candidates(&self) -> Option<&Candidates> {
        if self.use_cached_candidates {
            Some(&self.candidates)
        } else {
            None
        }
    }

    /// Whether the linear trajectory `x0 → x1` is free of collisions.
    ///
    /// A zero step is trivially collision free since `x0` is assumed intersection free.
    pub fn is_step_collision_free(&self, x0: &[f64], x1: &[f64]) -> bool {
        let v0 = self.mesh.vertices(x0);
        let v1 = self.mesh.vertices(x1);
        let diff: Vec<f64> = v1.iter().zip(v0.iter()).map(|(a, b)| a - b).collect();
        if inf_norm(&diff) == 0.0 {
            debug_assert!(self.is_intersection_free(x0));
            return true;
        }
        self.backend.is_step_collision_free(
            &self.mesh,
            &v0,
            &v1,
            self.cached_candidates(),
            &self.params.ccd,
        )
    }

    /// Largest fraction of `x0 → x1` that is collision free.
    pub fn collision_free_stepsize(&self, x0: &[f64], x1: &[f64]) -> f64 {
        let v0 = self.mesh.vertices(x0);
        let v1 = self.mesh.vertices(x1);
        self.backend.collision_free_stepsize(
            &self.mesh,
            &v0,
            &v1,
            self.cached_candidates(),
            &self.params.ccd,
        )
    }

    /// Builds broad phase candidates for the whole trajectory `x0 → x1` and
    /// reuses them until [`ContactGate::line_search_end`].
    pub fn line_search_begin(&mut self, x0: &[f64], x1: &[f64]) {
        let v0 = self.mesh.vertices(x0);
        let v1 = self.mesh.vertices(x1);
        // Slightly less than half so pairs exactly at the boundary are kept.
        let inflation = self.params.dhat / 1.99;
        self.candidates = self.backend.construct_collision_candidates(
            &self.mesh,
            &v0,
            &v1,
            inflation,
            self.params.ccd.broad_phase,
        );
        self.use_cached_candidates = true;
    }

    pub fn line_search_end(&mut self) {
        self.candidates.clear();
        self.use_cached_candidates = false;
    }

    /// Smallest distance among the active constraints.
    pub fn minimum_distance(&self, full: &[f64]) -> f64 {
        self.backend
            .minimum_distance(&self.mesh, &self.mesh.vertices(full), &self.constraints)
    }

    /// Mesh vertices closer than `threshold` to another boundary primitive.
    pub fn vertices_within(&self, full: &[f64], threshold: f64) -> Vec<usize> {
        let set = self
            .backend
            .build_constraints(&self.mesh, &self.mesh.vertices(full), threshold, None);
        let mut verts: Vec<usize> = set
            .constraints
            .iter()
            .filter(|c| c.kind != ConstraintKind::EdgeEdge)
            .map(|c| self.mesh.full_ids[c.vertices[0]])
            .collect();
        verts.sort_unstable();
        verts.dedup();
        verts
    }
}
