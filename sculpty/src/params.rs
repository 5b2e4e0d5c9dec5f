//! Configuration structures.
//!
//! Every structure can be read from RON text. Missing fields fall back to
//! their defaults so configuration files only need to list what differs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fem::SolverParams;
use crate::Error;

/// Material model parameters for the elasticity tensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MaterialParams {
    YoungPoisson {
        #[serde(alias = "E")]
        young: f64,
        nu: f64,
    },
    Lame {
        lambda: f64,
        mu: f64,
    },
    /// Upper triangle of the Voigt stiffness matrix, row by row.
    Tensor { entries: Vec<f64> },
}

impl Default for MaterialParams {
    fn default() -> Self {
        MaterialParams::YoungPoisson {
            young: 1e5,
            nu: 0.3,
        }
    }
}

/// Broad phase used to find collision candidates.
///
/// `HashGrid` and `SpatialHash` both bucket boxes in a uniform grid,
/// `SweepAndTiniestQueue` sorts boxes along the first axis and sweeps.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadPhaseMethod {
    #[serde(alias = "HG", alias = "hash_grid")]
    HashGrid,
    #[serde(alias = "BF", alias = "brute_force")]
    BruteForce,
    #[serde(alias = "SH", alias = "spatial_hash")]
    SpatialHash,
    #[serde(alias = "STQ", alias = "sweep_and_tiniest_queue")]
    SweepAndTiniestQueue,
}

impl Default for BroadPhaseMethod {
    fn default() -> Self {
        BroadPhaseMethod::HashGrid
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcdParams {
    pub broad_phase: BroadPhaseMethod,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for CcdParams {
    fn default() -> Self {
        CcdParams {
            broad_phase: BroadPhaseMethod::default(),
            tolerance: 1e-6,
            max_iterations: 1_000_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactParams {
    pub enabled: bool,
    /// Distance below which the barrier becomes active.
    pub dhat: f64,
    pub barrier_stiffness: f64,
    #[serde(alias = "CCD")]
    pub ccd: CcdParams,
}

impl Default for ContactParams {
    fn default() -> Self {
        ContactParams {
            enabled: false,
            dhat: 1e-3,
            barrier_stiffness: 1e5,
            ccd: CcdParams::default(),
        }
    }
}

/// Soft bounds on the total volume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeParams {
    pub weight: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for VolumeParams {
    fn default() -> Self {
        VolumeParams {
            weight: 1.0,
            min: 0.0,
            max: f64::INFINITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySmoothingParams {
    pub weight: f64,
    pub scale_invariant: bool,
    pub power: f64,
    /// Rebalance the weight against the target gradient every this many iterations.
    pub adjust_weight_period: Option<usize>,
    pub adjustment_coeff: f64,
}

impl Default for BoundarySmoothingParams {
    fn default() -> Self {
        BoundarySmoothingParams {
            weight: 1.0,
            scale_invariant: true,
            power: 2.0,
            adjust_weight_period: None,
            adjustment_coeff: 1.0,
        }
    }
}

/// Parameters of the interior mesh relaxation that follows a boundary update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlimParams {
    pub enabled: bool,
    pub min_iter: usize,
    /// Defaults to 20 in 2D and 50 in 3D.
    pub max_iter: Option<usize>,
    pub tol: f64,
    pub soft_p: f64,
    pub exp_factor: f64,
}

impl Default for SlimParams {
    fn default() -> Self {
        SlimParams {
            enabled: true,
            min_iter: 2,
            max_iter: None,
            tol: 1e-8,
            soft_p: 1e5,
            exp_factor: 5.0,
        }
    }
}

impl SlimParams {
    pub fn max_iter_for(&self, dim: usize) -> usize {
        self.max_iter
            .unwrap_or(if dim == 2 { 20 } else { 50 })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeshParams {
    /// Remesh when the worst scaled Jacobian drops below this value.
    pub tolerance: f64,
    /// Remesh every `period` iterations. Zero disables periodic remeshing.
    pub period: usize,
    /// Remeshing tool invoked as `executable input output`.
    pub executable: PathBuf,
    /// Directory receiving the before and after snapshots.
    pub output_dir: PathBuf,
}

impl Default for RemeshParams {
    fn default() -> Self {
        RemeshParams {
            tolerance: 0.1,
            period: 0,
            executable: PathBuf::from("remesh"),
            output_dir: PathBuf::from("."),
        }
    }
}

/// One mesh file making up the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryEntry {
    pub mesh: PathBuf,
    pub volume_selection: usize,
    /// Set once the mesh file already holds the transformed geometry.
    pub skip_transformation: bool,
}

impl Default for GeometryEntry {
    fn default() -> Self {
        GeometryEntry {
            mesh: PathBuf::new(),
            volume_selection: 0,
            skip_transformation: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeOptParams {
    pub target_weight: f64,
    pub volume: Option<VolumeParams>,
    pub boundary_smoothing: Option<BoundarySmoothingParams>,
    pub smoothing_parameters: SlimParams,
    /// Bodies whose shape is optimized. Empty means every body.
    pub volume_selection: Vec<usize>,
    /// Boundary tags whose facets may move. Used when `volume_selection` is empty.
    pub surface_selection: Vec<i32>,
    pub fix_dirichlet: bool,
    pub dirichlet_boundary_ids: Vec<i32>,
    pub neumann_boundary_ids: Vec<i32>,
    pub fix_contact_surface: bool,
    pub fix_contact_surface_tol: f64,
    /// Per axis flags, axes marked `false` are not optimized. Empty means all free.
    pub dimensions: Vec<bool>,
    /// Vertices closer than this at rest are tied together.
    pub correspondence_threshold: f64,
    pub contact: ContactParams,
    pub solver: SolverParams,
    pub remesh: Option<RemeshParams>,
    pub geometry: Vec<GeometryEntry>,
}

impl Default for ShapeOptParams {
    fn default() -> Self {
        ShapeOptParams {
            target_weight: 1.0,
            volume: None,
            boundary_smoothing: None,
            smoothing_parameters: SlimParams::default(),
            volume_selection: Vec::new(),
            surface_selection: Vec::new(),
            fix_dirichlet: true,
            dirichlet_boundary_ids: Vec::new(),
            neumann_boundary_ids: Vec::new(),
            fix_contact_surface: false,
            fix_contact_surface_tol: 1e-3,
            dimensions: Vec::new(),
            correspondence_threshold: 1e-8,
            contact: ContactParams::default(),
            solver: SolverParams::default(),
            remesh: None,
            geometry: Vec::new(),
        }
    }
}

impl ShapeOptParams {
    pub fn from_ron_str(s: &str) -> Result<Self, Error> {
        ron::de::from_str(s).map_err(|e| Error::InvalidConfig {
            reason: e.to_string(),
        })
    }

    /// Loads the parameters from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    /// Saves the parameters to the given path as a RON file.
    pub fn save_as_ron(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let f = std::fs::File::create(path)?;
        ron::ser::to_writer_pretty(f, self, ron::ser::PrettyConfig::new()).map_err(|e| {
            Error::InvalidConfig {
                reason: e.to_string(),
            }
        })
    }

    /// Free dimension flags padded to `dim` entries.
    pub fn free_dimensions(&self, dim: usize) -> Vec<bool> {
        if self.dimensions.len() < dim {
            vec![true; dim]
        } else {
            self.dimensions[..dim].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_struct() {
        let params = ShapeOptParams::from_ron_str("()").unwrap();
        assert_eq!(params, ShapeOptParams::default());
        assert!(params.fix_dirichlet);
        assert_eq!(params.correspondence_threshold, 1e-8);
        assert!(params.remesh.is_none());
        assert_eq!(params.smoothing_parameters.max_iter_for(2), 20);
        assert_eq!(params.smoothing_parameters.max_iter_for(3), 50);
    }

    #[test]
    fn partial_config() {
        let text = r#"(
            target_weight: 2.0,
            boundary_smoothing: Some((weight: 0.1, adjust_weight_period: Some(5))),
            contact: (enabled: true, dhat: 1e-4, CCD: (broad_phase: BF)),
            dimensions: [true, false],
            remesh: Some((tolerance: 0.2, period: 10)),
            geometry: [(mesh: "a.msh", volume_selection: 1)],
        )"#;
        let params = ShapeOptParams::from_ron_str(text).unwrap();
        assert_eq!(params.target_weight, 2.0);
        let smoothing = params.boundary_smoothing.clone().unwrap();
        assert_eq!(smoothing.weight, 0.1);
        assert!(smoothing.scale_invariant);
        assert_eq!(smoothing.adjust_weight_period, Some(5));
        assert!(params.contact.enabled);
        assert_eq!(params.contact.ccd.broad_phase, BroadPhaseMethod::BruteForce);
        assert_eq!(params.contact.ccd.tolerance, 1e-6);
        assert_eq!(params.free_dimensions(2), vec![true, false]);
        assert_eq!(params.free_dimensions(3), vec![true; 3]);
        let remesh = params.remesh.unwrap();
        assert_eq!(remesh.period, 10);
        assert_eq!(params.geometry[0].volume_selection, 1);
        assert!(!params.geometry[0].skip_transformation);
    }

    #[test]
    fn material_aliases() {
        let m: MaterialParams = ron::de::from_str("YoungPoisson(E: 10.0, nu: 0.2)").unwrap();
        assert_eq!(m, MaterialParams::YoungPoisson { young: 10.0, nu: 0.2 });
        let m: MaterialParams = ron::de::from_str("Lame(lambda: 1.0, mu: 2.0)").unwrap();
        assert_eq!(m, MaterialParams::Lame { lambda: 1.0, mu: 2.0 });
    }

    #[test]
    fn malformed_config_is_an_error() {
        match ShapeOptParams::from_ron_str("(target_weight: \"heavy\")") {
            Err(Error::InvalidConfig { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
