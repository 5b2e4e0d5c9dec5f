//! Planar contact between boundary vertices and boundary edges.
//!
//! Every proximity pair is a vertex against a non-incident edge. Distances
//! are unsigned point-segment distances, the barrier is the log barrier
//! `b(d) = -(d - d̂)² ln(d / d̂)` on `0 < d < d̂`, and CCD is conservative
//! advancement along the linear trajectory.

use ahash::AHashMap;

use crate::contact::{
    Candidates, CollisionBackend, CollisionMesh, ConstraintKind, ConstraintSet, ProximityConstraint,
};
use crate::dual::{DScalar1, DScalar2, DiffScalar};
use crate::params::{BroadPhaseMethod, CcdParams};
use crate::Triplet;

/// Fraction of the initial separation conservative advancement stops at when computing step sizes.
const STEPSIZE_MIN_SEPARATION: f64 = 0.1;

/// Vertex-edge contact in two dimensions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PointEdge2d {
    /// Broad phase used when no cached candidates are given.
    pub broad_phase: BroadPhaseMethod,
}

impl Default for PointEdge2d {
    fn default() -> Self {
        PointEdge2d::new(BroadPhaseMethod::default())
    }
}

type P2 = [f64; 2];

fn point(v: &[f64], i: usize) -> P2 {
    [v[2 * i], v[2 * i + 1]]
}

fn lerp2(a: P2, b: P2, t: f64) -> P2 {
    [a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])]
}

/// Point-segment distance written against [`DiffScalar`] on `[p, a, b]`.
fn point_edge_distance<T: DiffScalar>(x: &[T]) -> T {
    let e = [x[4].clone() - x[2].clone(), x[5].clone() - x[3].clone()];
    let pa = [x[0].clone() - x[2].clone(), x[1].clone() - x[3].clone()];
    let len2 = e[0].clone() * e[0].clone() + e[1].clone() * e[1].clone();
    let proj = pa[0].clone() * e[0].clone() + pa[1].clone() * e[1].clone();
    let t = if len2.real() > 0.0 {
        proj.real() / len2.real()
    } else {
        0.0
    };
    if t <= 0.0 {
        (pa[0].clone() * pa[0].clone() + pa[1].clone() * pa[1].clone()).sqrt()
    } else if t >= 1.0 {
        let pb = [x[0].clone() - x[4].clone(), x[1].clone() - x[5].clone()];
        (pb[0].clone() * pb[0].clone() + pb[1].clone() * pb[1].clone()).sqrt()
    } else {
        let cross = e[0].clone() * pa[1].clone() - e[1].clone() * pa[0].clone();
        cross.abs() * len2.sqrt().recip()
    }
}

fn barrier<T: DiffScalar>(d: T, dhat: f64) -> T {
    if d.real() >= dhat {
        return T::zero();
    }
    let diff = d.clone() - T::constant(dhat);
    -(diff.clone() * diff) * d.scale(1.0 / dhat).ln()
}

fn distance(p: P2, a: P2, b: P2) -> f64 {
    point_edge_distance(&[p[0], p[1], a[0], a[1], b[0], b[1]])
}

fn pair_coords(v: &[f64], p: usize, edge: [usize; 2]) -> [f64; 6] {
    [
        v[2 * p],
        v[2 * p + 1],
        v[2 * edge[0]],
        v[2 * edge[0] + 1],
        v[2 * edge[1]],
        v[2 * edge[1] + 1],
    ]
}

fn norm2(a: P2) -> f64 {
    (a[0] * a[0] + a[1] * a[1]).sqrt()
}

/// Conservative advancement of a point against a segment.
///
/// Returns the fraction of the trajectory that keeps the distance above
/// `min_sep`, or `1.0` if the whole trajectory does.
#[allow(clippy::too_many_arguments)]
fn additive_ccd(
    p0: P2,
    a0: P2,
    b0: P2,
    p1: P2,
    a1: P2,
    b1: P2,
    min_sep: f64,
    tolerance: f64,
    max_iterations: usize,
) -> f64 {
    let dp = [p1[0] - p0[0], p1[1] - p0[1]];
    let da = [a1[0] - a0[0], a1[1] - a0[1]];
    let db = [b1[0] - b0[0], b1[1] - b0[1]];
    // Points on the segment are convex combinations of its ends, so the
    // distance changes no faster than the largest relative end speed.
    let l = norm2([dp[0] - da[0], dp[1] - da[1]]).max(norm2([dp[0] - db[0], dp[1] - db[1]]));
    if l == 0.0 {
        return 1.0;
    }
    let mut d = distance(p0, a0, b0);
    if d <= min_sep {
        return 0.0;
    }
    let mut t = 0.0;
    for _ in 0..max_iterations {
        let dt = 0.9 * (d - min_sep) / l;
        if t + dt >= 1.0 {
            return 1.0;
        }
        t += dt;
        d = distance(lerp2(p0, p1, t), lerp2(a0, a1, t), lerp2(b0, b1, t));
        if dt < tolerance || d <= min_sep {
            break;
        }
    }
    t
}

fn orient(a: P2, b: P2, c: P2) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: P2, b: P2, p: P2) -> bool {
    p[0] >= a[0].min(b[0]) && p[0] <= a[0].max(b[0]) && p[1] >= a[1].min(b[1]) && p[1] <= a[1].max(b[1])
}

fn segments_intersect(p1: P2, p2: P2, q1: P2, q2: P2) -> bool {
    let o1 = orient(p1, p2, q1);
    let o2 = orient(p1, p2, q2);
    let o3 = orient(q1, q2, p1);
    let o4 = orient(q1, q2, p2);
    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }
    (o1 == 0.0 && on_segment(p1, p2, q1))
        || (o2 == 0.0 && on_segment(p1, p2, q2))
        || (o3 == 0.0 && on_segment(q1, q2, p1))
        || (o4 == 0.0 && on_segment(q1, q2, p2))
}

/// Bounding box of the points of a trajectory inflated by `r`.
fn swept_box(points: &[P2], r: f64) -> [P2; 2] {
    let mut lo = [f64::INFINITY; 2];
    let mut hi = [f64::NEG_INFINITY; 2];
    for p in points {
        for d in 0..2 {
            lo[d] = lo[d].min(p[d] - r);
            hi[d] = hi[d].max(p[d] + r);
        }
    }
    [lo, hi]
}

fn boxes_overlap(a: &[P2; 2], b: &[P2; 2]) -> bool {
    (0..2).all(|d| a[0][d] <= b[1][d] && b[0][d] <= a[1][d])
}

/// Rejects vertex-edge pairs that share a vertex.
type PairFilter<'a> = dyn Fn(usize, usize) -> bool + 'a;

fn brute_force_pairs(
    vertex_boxes: &[[P2; 2]],
    edge_boxes: &[[P2; 2]],
    keep: &PairFilter,
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (e, ebox) in edge_boxes.iter().enumerate() {
        for (p, vbox) in vertex_boxes.iter().enumerate() {
            if keep(p, e) && boxes_overlap(vbox, ebox) {
                pairs.push((p, e));
            }
        }
    }
    pairs
}

/// Buckets edge boxes in a uniform grid with cells as large as the largest box,
/// so every box touches at most four cells.
fn hash_grid_pairs(
    vertex_boxes: &[[P2; 2]],
    edge_boxes: &[[P2; 2]],
    keep: &PairFilter,
) -> Vec<(usize, usize)> {
    let cell = vertex_boxes
        .iter()
        .chain(edge_boxes.iter())
        .map(|b| (b[1][0] - b[0][0]).max(b[1][1] - b[0][1]))
        .fold(0.0_f64, f64::max);
    if !(cell > 0.0 && cell.is_finite()) {
        return brute_force_pairs(vertex_boxes, edge_boxes, keep);
    }
    let range = |b: &[P2; 2], d: usize| {
        ((b[0][d] / cell).floor() as i64)..=((b[1][d] / cell).floor() as i64)
    };

    let mut grid: AHashMap<(i64, i64), Vec<usize>> = AHashMap::new();
    for (e, ebox) in edge_boxes.iter().enumerate() {
        for i in range(ebox, 0) {
            for j in range(ebox, 1) {
                grid.entry((i, j)).or_default().push(e);
            }
        }
    }

    let mut pairs = Vec::new();
    for (p, vbox) in vertex_boxes.iter().enumerate() {
        let mut found = Vec::new();
        for i in range(vbox, 0) {
            for j in range(vbox, 1) {
                if let Some(edges) = grid.get(&(i, j)) {
                    found.extend(edges.iter().cloned());
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        pairs.extend(
            found
                .into_iter()
                .filter(|&e| keep(p, e) && boxes_overlap(vbox, &edge_boxes[e]))
                .map(|e| (p, e)),
        );
    }
    pairs
}

/// Sorts edge boxes by their lower x bound and sweeps each vertex box over them.
fn sweep_pairs(
    vertex_boxes: &[[P2; 2]],
    edge_boxes: &[[P2; 2]],
    keep: &PairFilter,
) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..edge_boxes.len()).collect();
    order.sort_by(|&a, &b| edge_boxes[a][0][0].total_cmp(&edge_boxes[b][0][0]));
    let mut pairs = Vec::new();
    for (p, vbox) in vertex_boxes.iter().enumerate() {
        for &e in order.iter().take_while(|&&e| edge_boxes[e][0][0] <= vbox[1][0]) {
            if keep(p, e) && boxes_overlap(vbox, &edge_boxes[e]) {
                pairs.push((p, e));
            }
        }
    }
    pairs
}

impl PointEdge2d {
    pub fn new(broad_phase: BroadPhaseMethod) -> Self {
        PointEdge2d { broad_phase }
    }

    fn vertex_edge_pairs(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        candidates: Option<&Candidates>,
    ) -> Vec<(usize, usize)> {
        match candidates {
            Some(c) => c.vertex_edge.clone(),
            None => {
                self.construct_collision_candidates(mesh, v0, v1, 0.0, self.broad_phase)
                    .vertex_edge
            }
        }
    }

    /// Smallest time of impact over the vertex-edge pairs with the given separation policy.
    fn earliest_impact(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        candidates: Option<&Candidates>,
        ccd: &CcdParams,
        min_sep: impl Fn(f64) -> f64,
    ) -> f64 {
        let mut toi: f64 = 1.0;
        for (p, e) in self.vertex_edge_pairs(mesh, v0, v1, candidates) {
            let [a, b] = mesh.edges()[e];
            let d0 = distance(point(v0, p), point(v0, a), point(v0, b));
            let t = additive_ccd(
                point(v0, p),
                point(v0, a),
                point(v0, b),
                point(v1, p),
                point(v1, a),
                point(v1, b),
                min_sep(d0),
                ccd.tolerance,
                ccd.max_iterations,
            );
            toi = toi.min(t);
            if toi == 0.0 {
                break;
            }
        }
        toi
    }
}

impl CollisionBackend for PointEdge2d {
    fn build_constraints(
        &self,
        mesh: &CollisionMesh,
        vertices: &[f64],
        dhat: f64,
        candidates: Option<&Candidates>,
    ) -> ConstraintSet {
        let pairs = match candidates {
            Some(c) => c.vertex_edge.clone(),
            None => {
                self.construct_collision_candidates(
                    mesh,
                    vertices,
                    vertices,
                    dhat,
                    self.broad_phase,
                )
                .vertex_edge
            }
        };
        let constraints = pairs
            .into_iter()
            .filter_map(|(p, e)| {
                let edge = mesh.edges()[e];
                let d = point_edge_distance(&pair_coords(vertices, p, edge));
                if d < dhat {
                    Some(ProximityConstraint {
                        kind: ConstraintKind::VertexEdge,
                        vertices: vec![p, edge[0], edge[1]],
                        distance: d,
                    })
                } else {
                    None
                }
            })
            .collect();
        ConstraintSet { constraints }
    }

    fn barrier_potential(
        &self,
        _mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
        dhat: f64,
    ) -> f64 {
        constraints
            .constraints
            .iter()
            .map(|c| {
                let d = point_edge_distance(&pair_coords(vertices, c.vertices[0], [c.vertices[1], c.vertices[2]]));
                if d <= 0.0 {
                    f64::INFINITY
                } else {
                    barrier(d, dhat)
                }
            })
            .sum()
    }

    fn barrier_potential_gradient(
        &self,
        _mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
        dhat: f64,
    ) -> Vec<f64> {
        let mut grad = vec![0.0; vertices.len()];
        for c in constraints.constraints.iter() {
            let x = pair_coords(vertices, c.vertices[0], [c.vertices[1], c.vertices[2]]);
            let vars = DScalar1::<na::Const<6>>::variables(&x);
            let d = point_edge_distance(&vars);
            if !(d.real() > 0.0) {
                continue;
            }
            let g = barrier(d, dhat).gradient(6);
            for (k, &v) in c.vertices.iter().enumerate() {
                grad[2 * v] += g[2 * k];
                grad[2 * v + 1] += g[2 * k + 1];
            }
        }
        grad
    }

    fn barrier_potential_hessian(
        &self,
        _mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
        dhat: f64,
    ) -> Vec<Triplet> {
        let mut triplets = Vec::new();
        for c in constraints.constraints.iter() {
            let x = pair_coords(vertices, c.vertices[0], [c.vertices[1], c.vertices[2]]);
            let vars = DScalar2::<na::Const<6>>::variables(&x);
            let d = point_edge_distance(&vars);
            if !(d.real() > 0.0) {
                continue;
            }
            let b = barrier(d, dhat);
            let dofs: Vec<usize> = c
                .vertices
                .iter()
                .flat_map(|&v| [2 * v, 2 * v + 1])
                .collect();
            for (i, &row) in dofs.iter().enumerate() {
                for (j, &col) in dofs.iter().enumerate() {
                    triplets.push(Triplet::new(row, col, b.hessian_entry(i, j)));
                }
            }
        }
        triplets
    }

    fn has_intersections(&self, mesh: &CollisionMesh, vertices: &[f64]) -> bool {
        let edges = mesh.edges();
        for (i, &[a, b]) in edges.iter().enumerate() {
            for &[c, d] in edges[i + 1..].iter() {
                if a == c || a == d || b == c || b == d {
                    continue;
                }
                if segments_intersect(
                    point(vertices, a),
                    point(vertices, b),
                    point(vertices, c),
                    point(vertices, d),
                ) {
                    return true;
                }
            }
        }
        false
    }

    fn is_step_collision_free(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        candidates: Option<&Candidates>,
        ccd: &CcdParams,
    ) -> bool {
        let toi = self.earliest_impact(mesh, v0, v1, candidates, ccd, |d0| {
            ccd.tolerance.min(0.5 * d0)
        });
        toi >= 1.0 && !self.has_intersections(mesh, v1)
    }

    fn collision_free_stepsize(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        candidates: Option<&Candidates>,
        ccd: &CcdParams,
    ) -> f64 {
        self.earliest_impact(mesh, v0, v1, candidates, ccd, |d0| {
            STEPSIZE_MIN_SEPARATION * d0
        })
    }

    fn construct_collision_candidates(
        &self,
        mesh: &CollisionMesh,
        v0: &[f64],
        v1: &[f64],
        inflation_radius: f64,
        method: BroadPhaseMethod,
    ) -> Candidates {
        let n = mesh.num_vertices();
        let vertex_boxes: Vec<[P2; 2]> = (0..n)
            .map(|i| swept_box(&[point(v0, i), point(v1, i)], inflation_radius))
            .collect();
        let edge_boxes: Vec<[P2; 2]> = mesh
            .edges()
            .iter()
            .map(|&[a, b]| {
                swept_box(
                    &[point(v0, a), point(v0, b), point(v1, a), point(v1, b)],
                    inflation_radius,
                )
            })
            .collect();
        let edges = mesh.edges();
        let keep = |p: usize, e: usize| p != edges[e][0] && p != edges[e][1];
        let mut vertex_edge = match method {
            BroadPhaseMethod::BruteForce => {
                brute_force_pairs(&vertex_boxes, &edge_boxes, &keep)
            }
            BroadPhaseMethod::HashGrid | BroadPhaseMethod::SpatialHash => {
                hash_grid_pairs(&vertex_boxes, &edge_boxes, &keep)
            }
            BroadPhaseMethod::SweepAndTiniestQueue => {
                sweep_pairs(&vertex_boxes, &edge_boxes, &keep)
            }
        };
        vertex_edge.sort_unstable();
        Candidates {
            vertex_edge,
            ..Default::default()
        }
    }

    fn minimum_distance(
        &self,
        _mesh: &CollisionMesh,
        vertices: &[f64],
        constraints: &ConstraintSet,
    ) -> f64 {
        constraints
            .constraints
            .iter()
            .map(|c| point_edge_distance(&pair_coords(vertices, c.vertices[0], [c.vertices[1], c.vertices[2]])))
            .fold(f64::INFINITY, f64::min)
    }
}
