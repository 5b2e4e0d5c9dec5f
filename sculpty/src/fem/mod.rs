//! Optimization problems built on the finite element energies and a
//! reference line search driver to minimize them.

pub mod elastic;
pub mod problem;
pub mod solver;

pub use elastic::{dirichlet_from_tag, ElasticProblem};
pub use problem::{ObjectiveCache, OptimizationProblem, RemeshOutcome};
pub use solver::{minimize, DescentStrategy, LineSearch, SolveResult, SolverParams, Status};
