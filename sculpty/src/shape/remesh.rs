//! Quality driven regeneration of the mesh topology.
//!
//! The optimization runs until the mesh degrades or a fixed number of
//! iterations elapses, then each body is exported, handed to an external
//! remeshing tool and loaded back. Nothing in memory changes until every new
//! submesh is available.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::io::read_medit;
use crate::mesh::Mesh;
use crate::params::{GeometryEntry, RemeshParams};
use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemeshPhase {
    Running,
    Remesh,
}

impl Default for RemeshPhase {
    fn default() -> Self {
        RemeshPhase::Running
    }
}

/// Tracks when the mesh needs to be regenerated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemeshMonitor {
    phase: RemeshPhase,
    iterations_since_remesh: usize,
}

impl RemeshMonitor {
    pub fn phase(&self) -> RemeshPhase {
        self.phase
    }

    pub fn iterations_since_remesh(&self) -> usize {
        self.iterations_since_remesh
    }

    /// Counts one more iteration and decides whether to remesh given the worst element quality.
    pub fn update(&mut self, params: &RemeshParams, min_quality: f64) -> RemeshPhase {
        self.iterations_since_remesh += 1;
        let periodic = params.period > 0 && self.iterations_since_remesh % params.period == 0;
        self.phase = if min_quality < params.tolerance || periodic {
            RemeshPhase::Remesh
        } else {
            RemeshPhase::Running
        };
        self.phase
    }

    /// Back to running after a completed transition.
    pub fn reset(&mut self) {
        *self = RemeshMonitor::default();
    }
}

/// Produces a new mesh file from an exported one.
pub trait MeshRegenerator {
    /// Returns `false` if the tool failed to produce `output`.
    fn regenerate(&mut self, input: &Path, output: &Path) -> bool;
}

/// Runs `executable input output` and waits for it to finish.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalRemesher {
    pub executable: PathBuf,
}

impl MeshRegenerator for ExternalRemesher {
    fn regenerate(&mut self, input: &Path, output: &Path) -> bool {
        log::info!(
            "Running {} {} {}",
            self.executable.display(),
            input.display(),
            output.display()
        );
        match Command::new(&self.executable).arg(input).arg(output).status() {
            Ok(status) if status.success() => true,
            Ok(status) => {
                log::warn!("Remeshing tool exited with {}", status);
                false
            }
            Err(e) => {
                log::warn!("Failed to run {}: {}", self.executable.display(), e);
                false
            }
        }
    }
}

/// Loads the mesh described by a geometry entry.
pub trait MeshLoader {
    fn load(&self, entry: &GeometryEntry) -> Result<Mesh, Error>;
}

/// Reads MEDIT files, labelling every cell with the entry's body.
#[derive(Copy, Clone, Debug, Default)]
pub struct MeditLoader;

impl MeshLoader for MeditLoader {
    fn load(&self, entry: &GeometryEntry) -> Result<Mesh, Error> {
        let mesh = read_medit(&entry.mesh)?;
        let n = mesh.num_cells();
        mesh.with_body_ids(vec![entry.volume_selection; n])
    }
}

/// Snapshot of a body before remeshing. Planar meshes are written as OBJ, volume meshes as MEDIT.
pub fn before_remesh_path(dir: &Path, iter: usize, body: usize, dim: usize) -> PathBuf {
    let ext = if dim == 2 { "obj" } else { "mesh" };
    dir.join(format!("before_remesh_iter{}_mesh{}.{}", iter, body, ext))
}

pub fn after_remesh_path(dir: &Path, iter: usize, body: usize) -> PathBuf {
    dir.join(format!("after_remesh_iter{}_mesh{}.mesh", iter, body))
}

/// Points the geometry entries of the remeshed bodies at their new files.
///
/// Entries of other bodies are kept as they are.
pub fn remeshed_geometry(
    geometry: &[GeometryEntry],
    remeshed: &[(usize, PathBuf)],
) -> Result<Vec<GeometryEntry>, Error> {
    let mut seen = Vec::new();
    for entry in geometry {
        if seen.contains(&entry.volume_selection) {
            return Err(Error::DuplicateBodyId {
                body_id: entry.volume_selection,
            });
        }
        seen.push(entry.volume_selection);
    }
    let mut out = geometry.to_vec();
    for (body, path) in remeshed {
        let entry = out
            .iter_mut()
            .find(|e| e.volume_selection == *body)
            .ok_or(Error::MissingGeometry { body_id: *body })?;
        entry.mesh = path.clone();
        // The tool output already holds the current shape.
        entry.skip_transformation = true;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tolerance: f64, period: usize) -> RemeshParams {
        RemeshParams {
            tolerance,
            period,
            ..Default::default()
        }
    }

    #[test]
    fn low_quality_triggers_remesh() {
        let mut monitor = RemeshMonitor::default();
        assert_eq!(monitor.update(&params(0.1, 0), 0.5), RemeshPhase::Running);
        assert_eq!(monitor.update(&params(0.1, 0), 0.05), RemeshPhase::Remesh);
        assert_eq!(monitor.iterations_since_remesh(), 2);
        monitor.reset();
        assert_eq!(monitor.phase(), RemeshPhase::Running);
        assert_eq!(monitor.iterations_since_remesh(), 0);
    }

    #[test]
    fn periodic_remesh() {
        let mut monitor = RemeshMonitor::default();
        let p = params(0.0, 3);
        let phases: Vec<_> = (0..6).map(|_| monitor.update(&p, 1.0)).collect();
        use RemeshPhase::*;
        assert_eq!(phases, vec![Running, Running, Remesh, Running, Running, Remesh]);
    }

    #[test]
    fn snapshot_names() {
        let dir = Path::new("out");
        assert_eq!(
            before_remesh_path(dir, 4, 1, 2),
            Path::new("out/before_remesh_iter4_mesh1.obj")
        );
        assert_eq!(
            before_remesh_path(dir, 4, 1, 3),
            Path::new("out/before_remesh_iter4_mesh1.mesh")
        );
        assert_eq!(
            after_remesh_path(dir, 4, 0),
            Path::new("out/after_remesh_iter4_mesh0.mesh")
        );
    }

    #[test]
    fn geometry_rewrite() {
        let entry = |body: usize| GeometryEntry {
            mesh: PathBuf::from(format!("body{}.mesh", body)),
            volume_selection: body,
            skip_transformation: false,
        };
        let geometry = vec![entry(0), entry(1)];
        let out = remeshed_geometry(&geometry, &[(1, PathBuf::from("new.mesh"))]).unwrap();
        assert_eq!(out[0], geometry[0]);
        assert_eq!(out[1].mesh, PathBuf::from("new.mesh"));
        assert!(out[1].skip_transformation);

        match remeshed_geometry(&geometry, &[(2, PathBuf::from("new.mesh"))]) {
            Err(Error::MissingGeometry { body_id: 2 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match remeshed_geometry(&[entry(0), entry(0)], &[]) {
            Err(Error::DuplicateBodyId { body_id: 0 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_executable_reports_failure() {
        let mut remesher = ExternalRemesher {
            executable: PathBuf::from("/nonexistent/remesher"),
        };
        assert!(!remesher.regenerate(Path::new("a.obj"), Path::new("b.mesh")));
    }
}
