mod test_utils;

use std::path::{Path, PathBuf};

use approx::*;
use sculpty::fem::{minimize, DescentStrategy, RemeshOutcome, SolverParams};
use sculpty::io::write_medit;
use sculpty::shape::*;
use sculpty::*;
pub use test_utils::*;

fn stretch_target(mesh: &Mesh) -> Result<ElasticEnergyTarget, Error> {
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
    ElasticEnergyTarget::new(mesh.clone(), soft_material(2), dirichlet, solver)
}

fn stretch_params() -> ShapeOptParams {
    ShapeOptParams {
        dirichlet_boundary_ids: vec![LEFT, RIGHT],
        boundary_smoothing: Some(BoundarySmoothingParams {
            weight: 1e-3,
            ..Default::default()
        }),
        volume: Some(VolumeParams {
            weight: 10.0,
            min: 0.9,
            max: 1.1,
        }),
        ..Default::default()
    }
}

#[test]
fn seam_vertices_move_together() -> Result<(), Error> {
    init_logger();
    // Vertices 4 and 7 of the right square lie on 1 and 2 of the left one.
    let mesh = two_squares(0.0);
    let p = ShapeParametrization::new(
        2,
        mesh.num_vertices(),
        &[],
        build_tied_nodes(&mesh.vertices, 2, 1e-8),
        vec![true, true],
    );
    assert_eq!(p.tied_nodes(), &[[4, 1], [7, 2]]);

    for seed in 0..5 {
        let x: Vec<f64> = mesh
            .vertices
            .iter()
            .zip(random_vector(16, 0.1, seed))
            .map(|(a, b)| a + b)
            .collect();
        let v = p.x_to_param(&x);
        assert_eq!(v[2..4], v[8..10]);
        assert_eq!(v[4..6], v[14..16]);

        let grad = random_vector(16, 1.0, 50 + seed);
        let dx = p.dparam_to_dx(&grad);
        assert_eq!(dx[2], 0.0);
        assert_eq!(dx[5], 0.0);
        assert_eq!(dx[8], grad[8] + grad[2]);
        assert_eq!(dx[15], grad[15] + grad[5]);
    }
    Ok(())
}

#[test]
fn seam_gradient_is_consistent() -> Result<(), Error> {
    let mesh = two_squares(0.0);
    let target = Box::new(Spread::new(&mesh));
    let params = ShapeOptParams {
        boundary_smoothing: Some(BoundarySmoothingParams::default()),
        ..Default::default()
    };
    let mut problem = ShapeProblem::new(mesh.clone(), target, params)?;
    let mut x = problem.initial_point();
    x[9] += 0.05;
    let g = problem.gradient(&x);
    // Duplicates carry no gradient of their own.
    assert_eq!(&g[2..6], &[0.0; 4]);
    // Moving a representative moves its duplicate with it.
    let h = 1e-6;
    for dof in [8, 9, 14, 15] {
        let mut xp = x.clone();
        xp[dof] += h;
        let fp = problem.value(&xp);
        xp[dof] -= 2.0 * h;
        let fm = problem.value(&xp);
        assert_relative_eq!(g[dof], (fp - fm) / (2.0 * h), max_relative = 1e-5, epsilon = 1e-7);
    }
    Ok(())
}

#[test]
fn stretched_plate_optimization() -> Result<(), Error> {
    init_logger();
    let mesh = unit_square_tri_mesh(3);
    let target = Box::new(stretch_target(&mesh)?);
    let mut params = stretch_params();
    params.solver = SolverParams {
        max_iter: 5,
        descent: DescentStrategy::GradientDescent,
        ..Default::default()
    };
    let mut problem = ShapeProblem::new(mesh.clone(), target, params.clone())?;
    let mut x = problem.initial_point();
    let f0 = problem.value(&x);
    let result = minimize(&mut problem, &mut x, &params.solver)?;
    log::info!("{}", result);
    assert!(result.iterations > 0);
    assert!(result.objective.is_finite());
    assert!(!problem.mesh().is_flipped(&x));
    assert!(problem.value(&x) < f0 * 1.5);

    // Loaded sides stay where they are.
    for &v in &[0, 4, 8, 12, 3, 7, 11, 15] {
        assert_eq!(x[2 * v], mesh.vertices[2 * v]);
        assert_eq!(x[2 * v + 1], mesh.vertices[2 * v + 1]);
    }
    Ok(())
}

/// Writes a fixed mesh instead of running an external tool.
struct CannedRemesher {
    mesh: Mesh,
}

impl MeshRegenerator for CannedRemesher {
    fn regenerate(&mut self, input: &Path, output: &Path) -> bool {
        assert!(input.exists());
        write_medit(&self.mesh, output).is_ok()
    }
}

struct BrokenRemesher;

impl MeshRegenerator for BrokenRemesher {
    fn regenerate(&mut self, _input: &Path, _output: &Path) -> bool {
        false
    }
}

fn remesh_params(dir: &Path) -> ShapeOptParams {
    ShapeOptParams {
        remesh: Some(RemeshParams {
            tolerance: 0.0,
            period: 2,
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }),
        geometry: vec![GeometryEntry {
            mesh: PathBuf::from("plate.mesh"),
            volume_selection: 0,
            skip_transformation: false,
        }],
        ..stretch_params()
    }
}

#[test]
fn periodic_remesh_rebuilds_everything() -> Result<(), Error> {
    init_logger();
    let dir = scratch_dir("remesh");
    let mesh = unit_square_tri_mesh(2);
    let target = Box::new(stretch_target(&mesh)?);
    let remesher = Box::new(CannedRemesher {
        mesh: unit_square_tri_mesh(3),
    });
    let mut problem = ShapeProblem::new(mesh, target, remesh_params(&dir))?.with_remesher(remesher);
    let mut x = problem.initial_point();

    assert_eq!(problem.remesh(0, &mut x)?, RemeshOutcome::NotNeeded);
    assert_eq!(x.len(), 18);
    assert_eq!(problem.remesh(1, &mut x)?, RemeshOutcome::Remeshed);
    assert!(dir.join("before_remesh_iter1_mesh0.obj").exists());
    assert!(dir.join("after_remesh_iter1_mesh0.mesh").exists());

    assert_eq!(x.len(), 32);
    assert_eq!(problem.num_variables(), 32);
    assert_eq!(problem.mesh().num_cells(), 18);
    assert_eq!(problem.remesh_monitor().iterations_since_remesh(), 0);
    // Tags survive the round trip through the remesher output.
    assert_eq!(
        problem.parametrization().fixed_nodes(),
        vec![0, 3, 4, 7, 8, 11, 12, 15]
    );
    let geometry = &problem.params().geometry[0];
    assert!(geometry.skip_transformation);
    assert_eq!(geometry.mesh, dir.join("after_remesh_iter1_mesh0.mesh"));

    // The new topology is fully usable.
    let g = problem.gradient(&x);
    assert_eq!(g.len(), 32);
    assert!(problem.value(&x).is_finite());
    assert!(problem.target().energy() > 0.0);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn failed_remesh_keeps_the_mesh() -> Result<(), Error> {
    let dir = scratch_dir("remesh_fail");
    let mesh = unit_square_tri_mesh(2);
    let target = Box::new(stretch_target(&mesh)?);
    let mut params = remesh_params(&dir);
    if let Some(r) = params.remesh.as_mut() {
        r.period = 1;
    }
    let mut problem =
        ShapeProblem::new(mesh.clone(), target, params)?.with_remesher(Box::new(BrokenRemesher));
    let mut x = problem.initial_point();
    let before = x.clone();
    assert_eq!(problem.remesh(0, &mut x)?, RemeshOutcome::Failed);
    assert_eq!(x, before);
    assert_eq!(problem.mesh().vertices, mesh.vertices);
    assert_eq!(problem.mesh().cells, mesh.cells);
    assert_eq!(problem.params().geometry[0].mesh, PathBuf::from("plate.mesh"));
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn missing_geometry_entry_is_an_error() -> Result<(), Error> {
    let dir = scratch_dir("remesh_missing");
    let mesh = unit_square_tri_mesh(2);
    let target = Box::new(stretch_target(&mesh)?);
    let mut params = remesh_params(&dir);
    params.geometry[0].volume_selection = 3;
    if let Some(r) = params.remesh.as_mut() {
        r.period = 1;
    }
    let remesher = Box::new(CannedRemesher {
        mesh: unit_square_tri_mesh(3),
    });
    let mut problem = ShapeProblem::new(mesh.clone(), target, params)?.with_remesher(remesher);
    let mut x = problem.initial_point();
    match problem.remesh(0, &mut x) {
        Err(Error::MissingGeometry { body_id: 0 }) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(problem.mesh().num_vertices(), mesh.num_vertices());
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// Squared distance of every vertex from the center of the unit square.
struct Spread {
    vertices: Vec<f64>,
}

impl Spread {
    fn new(mesh: &Mesh) -> Self {
        Spread {
            vertices: mesh.vertices.clone(),
        }
    }
}

impl TargetFunctional for Spread {
    fn set_vertices(&mut self, vertices: &[f64]) -> Result<(), Error> {
        self.vertices = vertices.to_vec();
        Ok(())
    }
    fn energy(&self) -> f64 {
        self.vertices.iter().map(|x| 0.5 * (x - 0.5).powi(2)).sum()
    }
    fn shape_gradient(&self) -> Vec<f64> {
        self.vertices.iter().map(|x| x - 0.5).collect()
    }
    fn reinitialize(&mut self, mesh: &Mesh) -> Result<(), Error> {
        self.vertices = mesh.vertices.clone();
        Ok(())
    }
}

/// Accepts only meshes with `accepted` vertices, after taking the new vertices.
struct PickyTarget {
    vertices: Vec<f64>,
    accepted: usize,
}

impl TargetFunctional for PickyTarget {
    fn set_vertices(&mut self, vertices: &[f64]) -> Result<(), Error> {
        self.vertices = vertices.to_vec();
        Ok(())
    }
    fn energy(&self) -> f64 {
        self.vertices.iter().map(|x| 0.5 * (x - 0.5).powi(2)).sum()
    }
    fn shape_gradient(&self) -> Vec<f64> {
        self.vertices.iter().map(|x| x - 0.5).collect()
    }
    fn reinitialize(&mut self, mesh: &Mesh) -> Result<(), Error> {
        self.vertices = mesh.vertices.clone();
        if mesh.num_vertices() == self.accepted {
            Ok(())
        } else {
            Err(Error::LinearSolveFailed)
        }
    }
}

#[test]
fn failed_rebuild_leaves_the_problem_untouched() -> Result<(), Error> {
    let dir = scratch_dir("remesh_rebuild");
    let mesh = unit_square_tri_mesh(2);
    let target = Box::new(PickyTarget {
        vertices: mesh.vertices.clone(),
        accepted: mesh.num_vertices(),
    });
    let remesher = Box::new(CannedRemesher {
        mesh: unit_square_tri_mesh(3),
    });
    let mut problem = ShapeProblem::new(mesh.clone(), target, remesh_params(&dir))?.with_remesher(remesher);
    let mut x = problem.initial_point();
    let energy = problem.target().energy();
    let fixed = problem.parametrization().fixed_nodes();

    assert_eq!(problem.remesh(0, &mut x)?, RemeshOutcome::NotNeeded);
    match problem.remesh(1, &mut x) {
        Err(Error::LinearSolveFailed) => {}
        other => panic!("unexpected result: {:?}", other),
    }

    assert_eq!(x.len(), 18);
    assert_eq!(problem.num_variables(), 18);
    assert_eq!(problem.mesh().cells, mesh.cells);
    assert_eq!(problem.parametrization().fixed_nodes(), fixed);
    assert_eq!(problem.params().geometry[0].mesh, PathBuf::from("plate.mesh"));
    // The target is back on the old mesh.
    assert_eq!(problem.target().energy(), energy);
    assert_eq!(problem.target().shape_gradient().len(), 18);
    // Not counted as a completed remesh.
    assert_eq!(problem.remesh_monitor().iterations_since_remesh(), 2);
    assert!(problem.value(&x).is_finite());

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
