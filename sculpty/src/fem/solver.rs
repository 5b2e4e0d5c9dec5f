//! Reference line search driver for [`OptimizationProblem`]s.

use serde::{Deserialize, Serialize};
use sprs::{FillInReduction, SymmetryCheck};
use sprs_ldl::Ldl;

use super::problem::{OptimizationProblem, RemeshOutcome};
use crate::{dot, norm, Error};

/// Relative slack on the sufficient decrease test absorbing roundoff in the objective.
const DECREASE_SLACK: f64 = 1e-12;

#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum LineSearch {
    /// Backtracking line search method decreases the step `α` by `rho` to
    /// Satisfy the sufficient decrease condition:
    /// f(xₖ + αpₖ) ≤ f(xₖ) + cα∇fₖᵀpₖ
    BackTracking { c: f64, rho: f64 },
    None,
}

impl Default for LineSearch {
    fn default() -> LineSearch {
        LineSearch::default_backtracking()
    }
}

impl LineSearch {
    pub const fn default_backtracking() -> Self {
        LineSearch::BackTracking { c: 1e-4, rho: 0.5 }
    }
    /// Gets the factor by which the step size should be decreased.
    pub fn step_factor(&self) -> f64 {
        match self {
            LineSearch::BackTracking { rho, .. } => *rho,
            LineSearch::None => 1.0,
        }
    }

    // Gets the coefficient for the Armijo condition.
    pub fn armijo_coeff(&self) -> f64 {
        match self {
            LineSearch::BackTracking { c, .. } => *c,
            LineSearch::None => 1.0,
        }
    }
}

/// How the search direction is computed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescentStrategy {
    /// Solve with the problem Hessian, falling back to the gradient when unavailable.
    Newton,
    GradientDescent,
}

impl Default for DescentStrategy {
    fn default() -> Self {
        DescentStrategy::Newton
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Maximum number of iterations permitted.
    pub max_iter: u32,
    /// Gradient norm tolerance.
    pub grad_tol: f64,
    pub line_search: LineSearch,
    pub descent: DescentStrategy,
    /// Line search gives up once the step fraction drops below this.
    pub min_step: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        SolverParams {
            max_iter: 100,
            grad_tol: 1e-8,
            line_search: LineSearch::default(),
            descent: DescentStrategy::default(),
            min_step: 1e-10,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    MaximumIterationsExceeded,
    LineSearchFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveResult {
    /// Number of successful iterations.
    pub iterations: u32,
    /// Solve status.
    pub status: Status,
    /// Objective at the returned point.
    pub objective: f64,
}

impl std::fmt::Display for SolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Solves `H p = -g`, returning `None` if the factorization fails or `p` is not a descent direction.
fn newton_direction(hess: &sprs::CsMat<f64>, g: &[f64]) -> Option<Vec<f64>> {
    let ldl = Ldl::new()
        .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
        .check_symmetry(SymmetryCheck::DontCheckSymmetry)
        .numeric(hess.to_csc().view())
        .ok()?;
    let rhs: Vec<f64> = g.iter().map(|&g| -g).collect();
    let p = ldl.solve(&rhs[..]);
    if p.iter().all(|p| p.is_finite()) && dot(&p, g) < 0.0 {
        Some(p)
    } else {
        None
    }
}

/// Minimizes `problem` starting from `x`, which holds the solution on return.
///
/// Each iteration computes a search direction, brackets the trial episode with
/// `line_search_begin`/`line_search_end`, clamps the step with `max_step_size`
/// and backtracks until the Armijo condition holds at a valid, collision free
/// point. Accepted points go through `smoothing`, `solution_changed`,
/// `post_step` and finally `remesh`, which may resize `x`.
pub fn minimize<P: OptimizationProblem + ?Sized>(
    problem: &mut P,
    x: &mut Vec<f64>,
    params: &SolverParams,
) -> Result<SolveResult, Error> {
    if x.len() != problem.num_variables() {
        return Err(Error::SizeMismatch);
    }

    problem.init_lagging(x);
    problem.solution_changed(x);

    log_debug_stats_header();

    let mut iterations = 0;
    let result = loop {
        let g = problem.gradient(x);
        let f = problem.value(x);
        let g_norm = norm(&g);

        if g_norm <= params.grad_tol {
            break SolveResult {
                iterations,
                status: Status::Success,
                objective: f,
            };
        }

        if iterations >= params.max_iter {
            break SolveResult {
                iterations,
                status: Status::MaximumIterationsExceeded,
                objective: f,
            };
        }

        let p = match params.descent {
            DescentStrategy::Newton => problem
                .hessian(x)
                .and_then(|h| newton_direction(&h, &g)),
            DescentStrategy::GradientDescent => None,
        }
        .unwrap_or_else(|| {
            log::trace!("Using steepest descent direction");
            g.iter().map(|&g| -g).collect()
        });

        let gp = dot(&g, &p);
        let x_full: Vec<f64> = x.iter().zip(p.iter()).map(|(&x, &p)| x + p).collect();

        problem.line_search_begin(x, &x_full);

        let rho = params.line_search.step_factor();
        let c = params.line_search.armijo_coeff();
        let mut alpha = problem.max_step_size(x, &x_full);
        let mut ls_count = 0;
        let mut accepted = None;
        while alpha >= params.min_step {
            ls_count += 1;
            let trial: Vec<f64> = x
                .iter()
                .zip(p.iter())
                .map(|(&x, &p)| x + alpha * p)
                .collect();
            if problem.is_step_valid(x, &trial) && problem.is_step_collision_free(x, &trial) {
                let f_trial = problem.value(&trial);
                if rho >= 1.0 || f_trial <= f + c * alpha * gp + DECREASE_SLACK * f.abs() {
                    accepted = Some(trial);
                    break;
                }
            }
            if rho >= 1.0 {
                break;
            }
            alpha *= rho;
        }

        problem.line_search_end();

        let mut x_next = match accepted {
            Some(x_next) => x_next,
            None => {
                break SolveResult {
                    iterations,
                    status: Status::LineSearchFailed,
                    objective: f,
                }
            }
        };

        if !problem.smoothing(x, &mut x_next) {
            log::warn!("Smoothing failed to produce a valid mesh");
            break SolveResult {
                iterations,
                status: Status::LineSearchFailed,
                objective: f,
            };
        }

        iterations += 1;

        log_debug_stats(iterations, ls_count, f, g_norm, alpha, x, &x_next);

        *x = x_next;
        problem.solution_changed(x);
        problem.post_step(iterations as usize, x);
        problem.update_lagging(x);

        if problem.remesh(iterations as usize, x)? == RemeshOutcome::Remeshed {
            problem.init_lagging(x);
            problem.solution_changed(x);
        }
    };

    Ok(result)
}

/*
 * Status print routines.
 * i       - iteration number
 * f       - objective value
 * g-2     - 2-norm of the gradient
 * d-2     - 2-norm of the step
 * alpha   - accepted step fraction
 * ls #    - number of line search steps
 */
fn log_debug_stats_header() {
    log::debug!("    i |     f      |    g-2     |    d-2     |   alpha    | ls # ");
    log::debug!("------+------------+------------+------------+------------+------");
}

fn log_debug_stats(
    iterations: u32,
    ls_steps: u32,
    f: f64,
    g_norm: f64,
    alpha: f64,
    x_prev: &[f64],
    x: &[f64],
) {
    log::debug!(
        "{i:>5} | {f:10.3e} | {g:10.3e} | {d:10.3e} | {alpha:10.3e} | {ls:>4} ",
        i = iterations,
        f = f,
        g = g_norm,
        d = x_prev
            .iter()
            .zip(x.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt(),
        alpha = alpha,
        ls = ls_steps
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `f(x) = Σ (x_i - i)⁴ + (x_i - i)²` with an optional wall at `x_0 ≤ wall`.
    struct Quartic {
        n: usize,
        wall: Option<f64>,
        changed: usize,
    }

    impl OptimizationProblem for Quartic {
        fn num_variables(&self) -> usize {
            self.n
        }
        fn value(&mut self, x: &[f64]) -> f64 {
            x.iter()
                .enumerate()
                .map(|(i, &x)| {
                    let d = x - i as f64;
                    d.powi(4) + d * d
                })
                .sum()
        }
        fn gradient(&mut self, x: &[f64]) -> Vec<f64> {
            x.iter()
                .enumerate()
                .map(|(i, &x)| {
                    let d = x - i as f64;
                    4.0 * d.powi(3) + 2.0 * d
                })
                .collect()
        }
        fn hessian(&mut self, x: &[f64]) -> Option<sprs::CsMat<f64>> {
            let mut h = sprs::TriMat::new((self.n, self.n));
            for (i, &x) in x.iter().enumerate() {
                let d = x - i as f64;
                h.add_triplet(i, i, 12.0 * d * d + 2.0);
            }
            Some(h.to_csr())
        }
        fn is_step_valid(&self, _x0: &[f64], x1: &[f64]) -> bool {
            self.wall.map_or(true, |w| x1[0] <= w)
        }
        fn max_step_size(&self, x0: &[f64], x1: &[f64]) -> f64 {
            let mut alpha = 1.0;
            for _ in 0..64 {
                let t: Vec<f64> = x0.iter().zip(x1).map(|(a, b)| a + alpha * (b - a)).collect();
                if self.is_step_valid(x0, &t) {
                    return alpha;
                }
                alpha *= 0.5;
            }
            0.0
        }
        fn solution_changed(&mut self, _x: &[f64]) {
            self.changed += 1;
        }
    }

    #[test]
    fn newton_converges() {
        let mut problem = Quartic {
            n: 4,
            wall: None,
            changed: 0,
        };
        let mut x = problem.initial_point();
        let result = minimize(&mut problem, &mut x, &SolverParams::default()).unwrap();
        assert_eq!(result.status, Status::Success);
        for (i, &x) in x.iter().enumerate() {
            assert_relative_eq!(x, i as f64, epsilon = 1e-6);
        }
        assert!(problem.changed > 1);
        assert_eq!(format!("{}", result), format!("{:?}", result));
    }

    #[test]
    fn gradient_descent_respects_validity() {
        let mut problem = Quartic {
            n: 2,
            wall: Some(-0.5),
            changed: 0,
        };
        let mut x = vec![-1.0, 0.0];
        let params = SolverParams {
            descent: DescentStrategy::GradientDescent,
            max_iter: 50,
            ..Default::default()
        };
        let result = minimize(&mut problem, &mut x, &params).unwrap();
        // The wall blocks the minimizer of the first coordinate.
        assert_ne!(result.status, Status::Success);
        assert!(x[0] <= -0.5);
        assert!(result.objective < 4.0);
    }

    #[test]
    fn wrong_initial_size_is_an_error() {
        let mut problem = Quartic {
            n: 3,
            wall: None,
            changed: 0,
        };
        let mut x = vec![0.0; 2];
        assert!(minimize(&mut problem, &mut x, &SolverParams::default()).is_err());
    }

    #[test]
    fn params_from_ron() {
        let params: SolverParams =
            ron::de::from_str("(max_iter: 5, line_search: BackTracking(c: 0.1, rho: 0.8))").unwrap();
        assert_eq!(params.max_iter, 5);
        assert_eq!(params.line_search.step_factor(), 0.8);
        assert_eq!(params.line_search.armijo_coeff(), 0.1);
        assert_eq!(params.descent, DescentStrategy::Newton);
        assert_eq!(LineSearch::None.step_factor(), 1.0);
    }
}
