use crate::Error;

/// Result of asking a problem to remesh itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemeshOutcome {
    /// Mesh quality is fine and the period has not elapsed.
    NotNeeded,
    /// Topology was regenerated and every derived structure rebuilt.
    Remeshed,
    /// The external tool failed. The in-memory mesh is untouched.
    Failed,
}

/// Contract between an objective and a line search based optimizer.
///
/// Evaluation methods take `&mut self` since implementations memoize values
/// and keep proximity data in sync with the queried point.
pub trait OptimizationProblem {
    /// Returns the number of unknowns for the problem.
    fn num_variables(&self) -> usize;

    /// Constructs the initial point for the problem.
    ///
    /// The returned `Vec` must have `num_variables` elements.
    fn initial_point(&self) -> Vec<f64> {
        vec![0.0; self.num_variables()]
    }

    fn value(&mut self, x: &[f64]) -> f64;

    fn gradient(&mut self, x: &[f64]) -> Vec<f64>;

    /// Sparse Hessian at `x`, if the problem provides second order information.
    fn hessian(&mut self, _x: &[f64]) -> Option<sprs::CsMat<f64>> {
        None
    }

    /// Rejects steps that produce degenerate or inverted elements.
    fn is_step_valid(&self, x0: &[f64], x1: &[f64]) -> bool;

    fn is_step_collision_free(&self, _x0: &[f64], _x1: &[f64]) -> bool {
        true
    }

    /// Largest `α` in `[0, 1]` such that `x0 + α(x1 - x0)` is a valid, collision free point.
    fn max_step_size(&self, _x0: &[f64], _x1: &[f64]) -> f64 {
        1.0
    }

    /// Marks the start of a line search along `x0 → x1`.
    fn line_search_begin(&mut self, _x0: &[f64], _x1: &[f64]) {}

    fn line_search_end(&mut self) {}

    /// Called once a step is accepted and `x` becomes the current solution.
    fn solution_changed(&mut self, x: &[f64]);

    fn post_step(&mut self, _iter: usize, _x: &[f64]) {}

    /// Post-processes an accepted step `x → new_x` in place.
    ///
    /// Returns `false` if no acceptable point could be produced.
    fn smoothing(&mut self, _x: &[f64], _new_x: &mut Vec<f64>) -> bool {
        true
    }

    /// Regenerates the discretization if needed, rewriting `x` for the new topology.
    fn remesh(&mut self, _iter: usize, _x: &mut Vec<f64>) -> Result<RemeshOutcome, Error> {
        Ok(RemeshOutcome::NotNeeded)
    }

    /// Rebuilds lagged quantities from scratch at `x`.
    fn init_lagging(&mut self, _x: &[f64]) {}

    fn update_lagging(&mut self, _x: &[f64]) {}
}

/// Memoized objective value and gradient.
///
/// Both are tagged with the exact point they were computed at, so a query at
/// any other point misses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectiveCache {
    x: Option<Vec<f64>>,
    value: Option<f64>,
    gradient: Option<Vec<f64>>,
}

impl ObjectiveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cache is tagged with `x`.
    pub fn is_current(&self, x: &[f64]) -> bool {
        self.x.as_deref() == Some(x)
    }

    /// Drops stored results and tags the cache with `x`.
    pub fn reset(&mut self, x: &[f64]) {
        self.x = Some(x.to_vec());
        self.value = None;
        self.gradient = None;
    }

    /// Drops stored results and the tag.
    pub fn clear(&mut self) {
        self.x = None;
        self.value = None;
        self.gradient = None;
    }

    pub fn value(&self, x: &[f64]) -> Option<f64> {
        if self.is_current(x) {
            self.value
        } else {
            None
        }
    }

    pub fn gradient(&self, x: &[f64]) -> Option<&[f64]> {
        if self.is_current(x) {
            self.gradient.as_deref()
        } else {
            None
        }
    }

    /// Stores the value for `x`, retagging the cache first if needed.
    pub fn set_value(&mut self, x: &[f64], value: f64) {
        if !self.is_current(x) {
            self.reset(x);
        }
        self.value = Some(value);
    }

    pub fn set_gradient(&mut self, x: &[f64], gradient: Vec<f64>) {
        if !self.is_current(x) {
            self.reset(x);
        }
        self.gradient = Some(gradient);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_misses_at_other_points() {
        let mut cache = ObjectiveCache::new();
        assert_eq!(cache.value(&[1.0]), None);
        cache.set_value(&[1.0], 3.0);
        cache.set_gradient(&[1.0], vec![2.0]);
        assert_eq!(cache.value(&[1.0]), Some(3.0));
        assert_eq!(cache.gradient(&[1.0]), Some(&[2.0][..]));
        assert_eq!(cache.value(&[1.5]), None);

        // Storing at a new point evicts both entries.
        cache.set_value(&[1.5], 4.0);
        assert_eq!(cache.gradient(&[1.5]), None);
        assert_eq!(cache.value(&[1.0]), None);

        cache.clear();
        assert!(!cache.is_current(&[1.5]));
    }
}
