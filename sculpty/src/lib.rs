pub mod assembly;
pub mod basis;
pub mod contact;
pub mod dof;
pub mod dual;
mod energy;
pub mod energy_models;
pub mod fem;
pub mod io;
pub mod mesh;
pub mod params;
pub mod shape;

// Mesh builders shared by the unit tests and the integration tests under `tests/`.
pub mod test_utils;

pub use self::assembly::ElasticAssembler;
pub use self::dof::{CoordinateMode, DofMap};
pub use self::energy::*;
pub use self::energy_models::elasticity::{ElasticityTensor, SaintVenantElasticity, StressSample};
pub use self::fem::{ElasticProblem, OptimizationProblem};
pub use self::mesh::Mesh;
pub use self::params::*;
pub use self::shape::ShapeProblem;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Size mismatch error")]
    SizeMismatch,
    #[error("Invalid parameter: {name:?}")]
    InvalidParameter { name: String },
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("Unsupported dimension: {dim}")]
    UnsupportedDimension { dim: usize },
    #[error("Degenerate reference element detected: {:?}", .degens[0])]
    DegenerateReferenceElement { degens: Vec<usize> },
    #[error("Inverted mesh: {} inverted elements", .elements.len())]
    InvertedMesh { elements: Vec<usize> },
    #[error("Linear solve failed")]
    LinearSolveFailed,
    #[error("Multiple geometry entries found for body {body_id}")]
    DuplicateBodyId { body_id: usize },
    #[error("No geometry entry found for body {body_id}")]
    MissingGeometry { body_id: usize },
    #[error("Malformed mesh file: {reason}")]
    MalformedMesh { reason: String },
    #[error("Error during mesh IO")]
    MeshIOError {
        #[from]
        source: geo::io::Error,
    },
    #[error("File I/O Error")]
    FileIOError {
        #[from]
        source: std::io::Error,
    },
    #[error("Error during main non-linear solve step: {result}")]
    NLSolveError { result: fem::SolveResult },
}

/// Infinity norm of a slice.
pub fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Euclidean norm of a slice.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(a, b)| a * b).sum()
}

/// Computes `a + alpha * (b - a)`.
pub(crate) fn lerp(a: &[f64], b: &[f64], alpha: f64) -> Vec<f64> {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(&a, &b)| a + alpha * (b - a))
        .collect()
}
